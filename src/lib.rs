//! Append-only vote ledger for a two-candidate poll.
//!
//! Votes collect in a pending pool, get sealed into blocks by a small
//! proof-of-work search, and are admitted to the chain by a three-validator
//! majority.

pub mod api;
pub mod config;
pub mod consensus;
pub mod error;
pub mod hasher;
pub mod ledger;
pub mod merkle;
pub mod models;
pub mod pow;
pub mod views;

pub use config::{Config, LedgerConfig};
pub use consensus::{QuorumPanel, Validator, VerdictSource};
pub use error::{LedgerError, PowError};
pub use ledger::{RoundOutcome, SubmitOutcome, VoteLedger};
pub use models::{Block, Candidate, ProposedBlock, Vote};
