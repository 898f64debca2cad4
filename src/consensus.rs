//! Validator panel and majority-rule admission.
//!
//! A panel holds exactly three validators. Each one asks its verdict source
//! about a proposal; the proposal is admitted when at least two approve.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::debug;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::LedgerError;
use crate::merkle::merkle_root;
use crate::models::ProposedBlock;
use crate::pow::ProofOfWork;

pub const PANEL_SIZE: usize = 3;
pub const REQUIRED_APPROVALS: usize = PANEL_SIZE / 2 + 1;

/// Something able to vote on a proposed block.
pub trait VerdictSource: Send + Sync {
    fn verdict(&self, block: &ProposedBlock) -> bool;

    fn kind(&self) -> &'static str;
}

/// Re-derives the block hash from its fields and checks it against the
/// stored hash, the difficulty prefix and the Merkle root.
#[derive(Debug, Clone)]
pub struct DeterministicRecompute {
    pow: ProofOfWork,
}

impl DeterministicRecompute {
    pub fn new(pow: ProofOfWork) -> Self {
        Self { pow }
    }
}

impl VerdictSource for DeterministicRecompute {
    fn verdict(&self, block: &ProposedBlock) -> bool {
        if block.compute_hash() != block.hash || !self.pow.meets_difficulty(&block.hash) {
            return false;
        }
        match &block.merkle_root {
            Some(root) => {
                let ids: Vec<&str> = block.votes.iter().map(|v| v.voter_id.as_str()).collect();
                merkle_root(&ids).as_ref() == Some(root)
            }
            None => true,
        }
    }

    fn kind(&self) -> &'static str {
        "deterministic"
    }
}

/// Coin-flip verdicts. A simulation stand-in, not a security mechanism.
#[derive(Debug, Clone)]
pub struct SimulatedRandom {
    approval_probability: f64,
}

impl SimulatedRandom {
    pub fn new(approval_probability: f64) -> Self {
        let p = if approval_probability.is_nan() {
            0.5
        } else {
            approval_probability.clamp(0.0, 1.0)
        };
        Self {
            approval_probability: p,
        }
    }
}

impl VerdictSource for SimulatedRandom {
    fn verdict(&self, _block: &ProposedBlock) -> bool {
        rand::thread_rng().gen_bool(self.approval_probability)
    }

    fn kind(&self) -> &'static str {
        "random"
    }
}

type Endorsement = dyn Fn(&ProposedBlock) -> bool + Send + Sync;

/// Defers the verdict to an outside party.
#[derive(Clone)]
pub struct ExternalSigner {
    endorse: Arc<Endorsement>,
}

impl ExternalSigner {
    pub fn new<F>(endorse: F) -> Self
    where
        F: Fn(&ProposedBlock) -> bool + Send + Sync + 'static,
    {
        Self {
            endorse: Arc::new(endorse),
        }
    }
}

impl VerdictSource for ExternalSigner {
    fn verdict(&self, block: &ProposedBlock) -> bool {
        (self.endorse)(block)
    }

    fn kind(&self) -> &'static str {
        "external"
    }
}

const NO_VERDICT: u8 = 0;
const REJECTED: u8 = 1;
const ACCEPTED: u8 = 2;

pub struct Validator {
    identity: String,
    source: Arc<dyn VerdictSource>,
    last_verdict: AtomicU8,
}

impl Validator {
    pub fn new(identity: impl Into<String>, source: Arc<dyn VerdictSource>) -> Self {
        Self {
            identity: identity.into(),
            source,
            last_verdict: AtomicU8::new(NO_VERDICT),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn last_verdict(&self) -> Option<bool> {
        match self.last_verdict.load(Ordering::Acquire) {
            ACCEPTED => Some(true),
            REJECTED => Some(false),
            _ => None,
        }
    }

    fn judge(&self, block: &ProposedBlock) -> bool {
        let accepted = self.source.verdict(block);
        let stored = if accepted { ACCEPTED } else { REJECTED };
        self.last_verdict.store(stored, Ordering::Release);
        accepted
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("identity", &self.identity)
            .field("kind", &self.source.kind())
            .field("last_verdict", &self.last_verdict())
            .finish()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidatorVerdict {
    pub identity: String,
    pub accepted: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct QuorumDecision {
    pub verdicts: Vec<ValidatorVerdict>,
    pub approvals: usize,
    pub required: usize,
    pub accepted: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidatorStatus {
    pub identity: String,
    pub kind: &'static str,
    pub last_verdict: Option<bool>,
}

#[derive(Debug)]
pub struct QuorumPanel {
    validators: Vec<Validator>,
}

impl QuorumPanel {
    pub fn new(validators: Vec<Validator>) -> Result<Self, LedgerError> {
        if validators.len() != PANEL_SIZE {
            return Err(LedgerError::Panel(format!(
                "expected {} validators, got {}",
                PANEL_SIZE,
                validators.len()
            )));
        }
        Ok(Self { validators })
    }

    /// Three validators sharing one verdict source.
    pub fn uniform(source: Arc<dyn VerdictSource>) -> Self {
        let validators = ["validator-a", "validator-b", "validator-c"]
            .into_iter()
            .map(|identity| Validator::new(identity, Arc::clone(&source)))
            .collect();
        Self { validators }
    }

    pub fn deterministic(pow: ProofOfWork) -> Self {
        Self::uniform(Arc::new(DeterministicRecompute::new(pow)))
    }

    pub fn simulated(approval_probability: f64) -> Self {
        Self::uniform(Arc::new(SimulatedRandom::new(approval_probability)))
    }

    /// Collects every verdict, then applies majority rule.
    pub fn evaluate(&self, block: &ProposedBlock) -> QuorumDecision {
        let verdicts: Vec<ValidatorVerdict> = self
            .validators
            .par_iter()
            .map(|validator| ValidatorVerdict {
                identity: validator.identity.clone(),
                accepted: validator.judge(block),
            })
            .collect();

        let approvals = verdicts.iter().filter(|v| v.accepted).count();
        let accepted = approvals >= REQUIRED_APPROVALS;
        debug!(
            "quorum on {}: {}/{} approvals",
            block.hash, approvals, PANEL_SIZE
        );

        QuorumDecision {
            verdicts,
            approvals,
            required: REQUIRED_APPROVALS,
            accepted,
        }
    }

    pub fn status(&self) -> Vec<ValidatorStatus> {
        self.validators
            .iter()
            .map(|v| ValidatorStatus {
                identity: v.identity.clone(),
                kind: v.source.kind(),
                last_verdict: v.last_verdict(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher;
    use crate::models::{Candidate, Vote, GENESIS_PREVIOUS_HASH};
    use tokio_util::sync::CancellationToken;

    struct Fixed(bool);

    impl VerdictSource for Fixed {
        fn verdict(&self, _block: &ProposedBlock) -> bool {
            self.0
        }

        fn kind(&self) -> &'static str {
            "fixed"
        }
    }

    fn panel(verdicts: [bool; 3]) -> QuorumPanel {
        let validators = verdicts
            .iter()
            .enumerate()
            .map(|(i, &v)| Validator::new(format!("v{i}"), Arc::new(Fixed(v))))
            .collect();
        QuorumPanel::new(validators).unwrap()
    }

    fn mined_block(pow: &ProofOfWork) -> ProposedBlock {
        let votes = vec![
            Vote {
                voter_id: "alice".into(),
                candidate: Candidate::A,
                voter_display_name: None,
                timestamp: 10,
            },
            Vote {
                voter_id: "bob".into(),
                candidate: Candidate::B,
                voter_display_name: None,
                timestamp: 10,
            },
        ];
        let solution = pow
            .solve(GENESIS_PREVIOUS_HASH, &votes, 10, &CancellationToken::new())
            .unwrap();
        ProposedBlock {
            merkle_root: merkle_root(&["alice", "bob"]),
            votes,
            nonce: solution.nonce,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            timestamp: 10,
            hash: solution.hash,
        }
    }

    #[test]
    fn two_of_three_accepts() {
        let block = mined_block(&ProofOfWork::new("0").unwrap());
        let decision = panel([true, true, false]).evaluate(&block);
        assert!(decision.accepted);
        assert_eq!(decision.approvals, 2);
    }

    #[test]
    fn one_of_three_rejects() {
        let block = mined_block(&ProofOfWork::new("0").unwrap());
        let decision = panel([true, false, false]).evaluate(&block);
        assert!(!decision.accepted);
        assert_eq!(decision.approvals, 1);
        assert_eq!(decision.required, 2);
    }

    #[test]
    fn verdicts_are_recorded() {
        let panel = panel([true, false, true]);
        assert!(panel.status().iter().all(|s| s.last_verdict.is_none()));

        panel.evaluate(&mined_block(&ProofOfWork::new("0").unwrap()));
        let last: Vec<_> = panel.status().into_iter().map(|s| s.last_verdict).collect();
        assert_eq!(last, vec![Some(true), Some(false), Some(true)]);
    }

    #[test]
    fn panel_must_have_three() {
        let two = vec![
            Validator::new("a", Arc::new(Fixed(true))),
            Validator::new("b", Arc::new(Fixed(true))),
        ];
        assert!(matches!(QuorumPanel::new(two), Err(LedgerError::Panel(_))));
    }

    #[test]
    fn recompute_accepts_honest_block() {
        let pow = ProofOfWork::new("0").unwrap();
        let source = DeterministicRecompute::new(pow.clone());
        assert!(source.verdict(&mined_block(&pow)));
    }

    #[test]
    fn recompute_rejects_tampering() {
        let pow = ProofOfWork::new("0").unwrap();
        let source = DeterministicRecompute::new(pow.clone());

        let mut flipped = mined_block(&pow);
        flipped.votes[1].candidate = Candidate::A;
        assert!(!source.verdict(&flipped));

        let mut bad_root = mined_block(&pow);
        bad_root.merkle_root = Some(hasher::hash_str("mallory"));
        assert!(!source.verdict(&bad_root));

        let mut bad_nonce = mined_block(&pow);
        bad_nonce.nonce += 1;
        assert!(!source.verdict(&bad_nonce));
    }

    #[test]
    fn random_extremes_are_fixed() {
        let block = mined_block(&ProofOfWork::new("").unwrap());
        assert!(QuorumPanel::simulated(1.0).evaluate(&block).accepted);
        assert!(!QuorumPanel::simulated(0.0).evaluate(&block).accepted);
    }

    #[test]
    fn external_signer_is_consulted() {
        let block = mined_block(&ProofOfWork::new("").unwrap());
        let expected_hash = block.hash.clone();
        let signer = ExternalSigner::new(move |b| b.hash == expected_hash);
        let panel = QuorumPanel::uniform(Arc::new(signer));
        assert!(panel.evaluate(&block).accepted);
        assert_eq!(panel.status()[0].kind, "external");
    }
}
