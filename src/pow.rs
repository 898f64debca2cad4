//! Proof-of-work nonce search.
//!
//! The search walks nonces upward from zero until the block hash starts with
//! the difficulty prefix. It is unbounded, so it checks its cancellation token
//! and optional deadline once per batch of attempts.

use std::time::{Duration, Instant};

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, PowError};
use crate::hasher::{self, HASH_HEX_LEN};
use crate::models::Vote;

/// Attempts between cancellation and deadline checks.
const CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub hash: String,
    pub attempts: u64,
}

#[derive(Debug, Clone)]
pub struct ProofOfWork {
    difficulty: String,
    timeout: Option<Duration>,
}

impl ProofOfWork {
    pub fn new(difficulty: impl Into<String>) -> Result<Self, ConfigError> {
        let difficulty = difficulty.into();
        if difficulty.len() > HASH_HEX_LEN || difficulty.chars().any(|c| c != '0') {
            return Err(ConfigError::InvalidDifficulty(difficulty));
        }
        Ok(Self {
            difficulty,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn difficulty(&self) -> &str {
        &self.difficulty
    }

    pub fn meets_difficulty(&self, hash: &str) -> bool {
        hash.starts_with(&self.difficulty)
    }

    /// Returns the first nonce whose hash meets the difficulty.
    pub fn solve(
        &self,
        previous_hash: &str,
        votes: &[Vote],
        timestamp: u64,
        cancel: &CancellationToken,
    ) -> Result<Solution, PowError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut nonce: u64 = 0;

        loop {
            if nonce % CHECK_INTERVAL == 0 {
                if cancel.is_cancelled() {
                    debug!("proof-of-work cancelled after {} attempts", nonce);
                    return Err(PowError::Cancelled);
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Err(PowError::TimedOut { attempts: nonce });
                }
            }

            let hash = hasher::hash_block(nonce, previous_hash, votes, timestamp);
            if self.meets_difficulty(&hash) {
                return Ok(Solution {
                    nonce,
                    hash,
                    attempts: nonce + 1,
                });
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}
