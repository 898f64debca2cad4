use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::hasher;

/// Predecessor hash carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// The closed set of candidates on the ballot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Candidate {
    A,
    B,
}

impl Candidate {
    pub const ALL: [Candidate; 2] = [Candidate::A, Candidate::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Candidate::A => "A",
            Candidate::B => "B",
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Candidate {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Candidate::A),
            "B" | "b" => Ok(Candidate::B),
            other => Err(LedgerError::InvalidCandidate(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub voter_id: String,
    pub candidate: Candidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voter_display_name: Option<String>,
    /// Milliseconds since the Unix epoch. Provisional while pending.
    pub timestamp: u64,
}

impl Vote {
    pub fn new(voter_id: String, candidate: Candidate, voter_display_name: Option<String>) -> Self {
        Self {
            voter_id,
            candidate,
            voter_display_name,
            timestamp: now_millis(),
        }
    }
}

/// A block that has completed proof-of-work but is not yet on the chain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProposedBlock {
    pub votes: Vec<Vote>,
    pub merkle_root: Option<String>,
    pub nonce: u64,
    pub previous_hash: String,
    pub timestamp: u64,
    pub hash: String,
}

impl ProposedBlock {
    pub fn compute_hash(&self) -> String {
        hasher::hash_block(self.nonce, &self.previous_hash, &self.votes, self.timestamp)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub votes: Vec<Vote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    pub nonce: u64,
    pub previous_hash: String,
    pub timestamp: u64,
    pub hash: String,
}

impl Block {
    /// Seals a proposal at `index`. Every vote takes the block timestamp.
    pub fn from_proposal(index: u64, proposed: ProposedBlock) -> Self {
        let timestamp = proposed.timestamp;
        let votes = proposed
            .votes
            .into_iter()
            .map(|vote| Vote { timestamp, ..vote })
            .collect();

        Self {
            index,
            votes,
            merkle_root: proposed.merkle_root,
            nonce: proposed.nonce,
            previous_hash: proposed.previous_hash,
            timestamp,
            hash: proposed.hash,
        }
    }

    pub fn compute_hash(&self) -> String {
        hasher::hash_block(self.nonce, &self.previous_hash, &self.votes, self.timestamp)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 1
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
