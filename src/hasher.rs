//! Content hashing for blocks.
//!
//! Blocks are hashed over a canonical JSON document: `serde_json::Value`
//! objects keep their keys sorted, so identical fields always produce the
//! same bytes and the same digest.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::models::Vote;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

pub fn hash_block(nonce: u64, previous_hash: &str, votes: &[Vote], timestamp: u64) -> String {
    let votes: Vec<Value> = votes.iter().map(canonical_vote).collect();
    let document = json!({
        "nonce": nonce,
        "previous_hash": previous_hash,
        "votes": votes,
        "timestamp": timestamp,
    });
    hash_str(&document.to_string())
}

pub fn hash_str(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonical_vote(vote: &Vote) -> Value {
    let mut value = json!({
        "voter_id": vote.voter_id,
        "candidate": vote.candidate.as_str(),
        "timestamp": vote.timestamp,
    });
    if let (Some(name), Some(map)) = (&vote.voter_display_name, value.as_object_mut()) {
        map.insert("voter_display_name".to_string(), Value::String(name.clone()));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, GENESIS_PREVIOUS_HASH};

    fn vote(id: &str, candidate: Candidate) -> Vote {
        Vote {
            voter_id: id.to_string(),
            candidate,
            voter_display_name: None,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn digest_is_hex_sha256() {
        let h = hash_block(0, GENESIS_PREVIOUS_HASH, &[], 0);
        assert_eq!(h.len(), HASH_HEX_LEN);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn same_fields_same_hash() {
        let votes = vec![vote("alice", Candidate::A), vote("bob", Candidate::B)];
        let a = hash_block(7, GENESIS_PREVIOUS_HASH, &votes, 123);
        let b = hash_block(7, GENESIS_PREVIOUS_HASH, &votes.clone(), 123);
        assert_eq!(a, b);
    }

    #[test]
    fn every_field_is_covered() {
        let votes = vec![vote("alice", Candidate::A)];
        let base = hash_block(1, GENESIS_PREVIOUS_HASH, &votes, 10);

        assert_ne!(base, hash_block(2, GENESIS_PREVIOUS_HASH, &votes, 10));
        assert_ne!(base, hash_block(1, &"1".repeat(64), &votes, 10));
        assert_ne!(base, hash_block(1, GENESIS_PREVIOUS_HASH, &[], 10));
        assert_ne!(base, hash_block(1, GENESIS_PREVIOUS_HASH, &votes, 11));

        let mut renamed = votes.clone();
        renamed[0].voter_display_name = Some("Alice".into());
        assert_ne!(base, hash_block(1, GENESIS_PREVIOUS_HASH, &renamed, 10));
    }

    #[test]
    fn vote_order_matters() {
        let forward = vec![vote("alice", Candidate::A), vote("bob", Candidate::B)];
        let reversed: Vec<_> = forward.iter().rev().cloned().collect();
        assert_ne!(
            hash_block(0, GENESIS_PREVIOUS_HASH, &forward, 0),
            hash_block(0, GENESIS_PREVIOUS_HASH, &reversed, 0)
        );
    }

    #[test]
    fn known_string_digest() {
        assert_eq!(
            hash_str("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
