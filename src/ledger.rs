//! The vote ledger: confirmed chain, pending pool and proposal rounds.
//!
//! All mutable state sits behind one async mutex. A proposal round snapshots
//! the pending pool under the lock, mines and judges the snapshot without the
//! lock held, then re-takes it to commit. At most one round is in flight.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{DuplicatePolicy, LedgerConfig, RejectionPolicy, ValidatorKind};
use crate::consensus::{QuorumDecision, QuorumPanel, ValidatorStatus};
use crate::error::{ChainFault, LedgerError, Result};
use crate::merkle::merkle_root;
use crate::models::{now_millis, Block, Candidate, ProposedBlock, Vote, GENESIS_PREVIOUS_HASH};
use crate::pow::ProofOfWork;
use crate::views::{self, ChainPage, Results};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundOutcome {
    Committed { block: Block },
    Rejected {
        decision: QuorumDecision,
        requeued: usize,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Accepted into the pending pool; no round was run.
    Pending { pending: usize },
    Committed { block: Block },
    Rejected {
        decision: QuorumDecision,
        requeued: usize,
    },
    /// Accepted, but the round it started did not finish.
    Deferred { pending: usize, reason: String },
}

impl From<RoundOutcome> for SubmitOutcome {
    fn from(outcome: RoundOutcome) -> Self {
        match outcome {
            RoundOutcome::Committed { block } => SubmitOutcome::Committed { block },
            RoundOutcome::Rejected { decision, requeued } => {
                SubmitOutcome::Rejected { decision, requeued }
            }
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub length: usize,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

struct LedgerState {
    chain: Vec<Block>,
    pending: Vec<Vote>,
    confirmed_voters: HashSet<String>,
    in_flight: Option<InFlight>,
    rounds: u64,
}

struct InFlight {
    round: u64,
    cancel: CancellationToken,
}

impl LedgerState {
    fn tip_hash(&self) -> &str {
        self.chain
            .last()
            .map(|b| b.hash.as_str())
            .unwrap_or(GENESIS_PREVIOUS_HASH)
    }

    fn is_duplicate(&self, voter_id: &str, policy: DuplicatePolicy) -> bool {
        self.confirmed_voters.contains(voter_id)
            || (policy == DuplicatePolicy::Strict
                && self.pending.iter().any(|v| v.voter_id == voter_id))
    }

    /// Drops pending votes that could no longer be sealed: ids already
    /// confirmed, and repeats of an earlier pending id.
    fn prune_pending(&mut self) {
        let mut seen = HashSet::new();
        let confirmed = &self.confirmed_voters;
        self.pending.retain(|v| {
            let keep = !confirmed.contains(&v.voter_id) && seen.insert(v.voter_id.clone());
            if !keep {
                debug!("pruned duplicate pending vote from {}", v.voter_id);
            }
            keep
        });
    }

    fn begin_round(&mut self) -> Result<Snapshot> {
        if self.in_flight.is_some() {
            return Err(LedgerError::ProposalInProgress);
        }
        self.prune_pending();

        let timestamp = now_millis();
        let votes = self
            .pending
            .iter()
            .cloned()
            .map(|vote| Vote { timestamp, ..vote })
            .collect();
        let cancel = CancellationToken::new();
        self.rounds += 1;
        self.in_flight = Some(InFlight {
            round: self.rounds,
            cancel: cancel.clone(),
        });

        Ok(Snapshot {
            round: self.rounds,
            previous_hash: self.tip_hash().to_string(),
            votes,
            timestamp,
            cancel,
        })
    }

    /// Frees the in-flight slot if `round` still holds it.
    fn finish_round(&mut self, round: u64) {
        if self.in_flight.as_ref().is_some_and(|f| f.round == round) {
            self.in_flight = None;
        }
    }

    fn is_stale(&self, proposed: &ProposedBlock) -> bool {
        let sealed = proposed.votes.len();
        self.tip_hash() != proposed.previous_hash
            || self.pending.len() < sealed
            || self
                .pending
                .iter()
                .zip(&proposed.votes)
                .any(|(queued, proposed)| queued.voter_id != proposed.voter_id)
    }

    fn commit_block(&mut self, proposed: ProposedBlock) -> Block {
        let sealed = proposed.votes.len();
        let block = Block::from_proposal(self.chain.len() as u64 + 1, proposed);

        self.pending.drain(..sealed);
        self.confirmed_voters
            .extend(block.votes.iter().map(|v| v.voter_id.clone()));
        self.chain.push(block.clone());
        block
    }

    fn ready(&self, threshold: Option<usize>) -> bool {
        threshold.is_some_and(|t| self.pending.len() >= t) && self.in_flight.is_none()
    }
}

struct Snapshot {
    round: u64,
    previous_hash: String,
    votes: Vec<Vote>,
    timestamp: u64,
    cancel: CancellationToken,
}

/// Releases a round that is dropped before it settles: the proof-of-work is
/// cancelled and the in-flight slot is freed.
struct RoundGuard {
    inner: Arc<Inner>,
    round: u64,
    cancel: CancellationToken,
    armed: bool,
}

impl RoundGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.cancel();
        let round = self.round;
        match self.inner.state.try_lock() {
            Ok(mut state) => state.finish_round(round),
            Err(_) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let inner = Arc::clone(&self.inner);
                    handle.spawn(async move {
                        inner.state.lock().await.finish_round(round);
                    });
                }
            }
        }
        debug!("proposal round {} dropped before settling", round);
    }
}

struct Round {
    snapshot: Snapshot,
    guard: RoundGuard,
}

struct Inner {
    state: Mutex<LedgerState>,
    pow: ProofOfWork,
    panel: QuorumPanel,
    config: LedgerConfig,
}

/// Shared handle to one ledger instance.
#[derive(Clone)]
pub struct VoteLedger {
    inner: Arc<Inner>,
}

impl VoteLedger {
    /// Creates a ledger and mines its genesis block.
    pub async fn new(config: LedgerConfig, panel: QuorumPanel) -> Result<Self> {
        let pow = ProofOfWork::new(config.difficulty.clone())?.with_timeout(config.mining_timeout);

        let timestamp = now_millis();
        let genesis_pow = pow.clone();
        let solution = tokio::task::spawn_blocking(move || {
            genesis_pow.solve(GENESIS_PREVIOUS_HASH, &[], timestamp, &CancellationToken::new())
        })
        .await
        .map_err(|e| LedgerError::Worker(e.to_string()))??;

        let genesis = Block {
            index: 1,
            votes: Vec::new(),
            merkle_root: None,
            nonce: solution.nonce,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            timestamp,
            hash: solution.hash,
        };
        info!(
            "genesis block mined: hash={} nonce={} difficulty={:?}",
            genesis.hash,
            genesis.nonce,
            pow.difficulty()
        );

        let state = LedgerState {
            chain: vec![genesis],
            pending: Vec::new(),
            confirmed_voters: HashSet::new(),
            in_flight: None,
            rounds: 0,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                pow,
                panel,
                config,
            }),
        })
    }

    /// Creates a ledger with the validator panel named by the config.
    pub async fn from_config(config: LedgerConfig) -> Result<Self> {
        let panel = match config.validators {
            ValidatorKind::Deterministic => {
                QuorumPanel::deterministic(ProofOfWork::new(config.difficulty.clone())?)
            }
            ValidatorKind::Random => QuorumPanel::simulated(config.approval_probability),
        };
        Self::new(config, panel).await
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    pub async fn submit_vote(
        &self,
        voter_id: &str,
        candidate: &str,
        display_name: Option<String>,
    ) -> Result<SubmitOutcome> {
        let voter_id = voter_id.trim();
        if voter_id.is_empty() {
            return Err(LedgerError::MissingVoterId);
        }
        let candidate: Candidate = candidate.parse()?;
        let display_name = display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let round = {
            let mut state = self.inner.state.lock().await;
            if state.is_duplicate(voter_id, self.inner.config.duplicate_policy) {
                debug!("rejected duplicate vote from {}", voter_id);
                return Err(LedgerError::DuplicateVoter(voter_id.to_string()));
            }

            state
                .pending
                .push(Vote::new(voter_id.to_string(), candidate, display_name));
            debug!(
                "vote from {} for {} pending ({} in pool)",
                voter_id,
                candidate,
                state.pending.len()
            );

            if !state.ready(self.inner.config.threshold) {
                return Ok(SubmitOutcome::Pending {
                    pending: state.pending.len(),
                });
            }
            info!(
                "pending pool reached {} votes, proposing block",
                state.pending.len()
            );
            self.start_round(&mut state)?
        };

        let outcome = match self.run_round(round).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("proposal round did not finish: {}", err);
                return Ok(SubmitOutcome::Deferred {
                    pending: self.pending_count().await,
                    reason: err.to_string(),
                });
            }
        };

        if matches!(outcome, RoundOutcome::Committed { .. }) {
            self.drain_ready().await;
        }
        Ok(outcome.into())
    }

    /// Runs one proposal round over the whole pending pool.
    pub async fn propose_block(&self) -> Result<RoundOutcome> {
        let round = self.start_round(&mut *self.inner.state.lock().await)?;
        let outcome = self.run_round(round).await?;
        if matches!(outcome, RoundOutcome::Committed { .. }) {
            self.drain_ready().await;
        }
        Ok(outcome)
    }

    /// Explicit mining trigger; a quorum rejection is an error.
    pub async fn mine(&self) -> Result<Block> {
        match self.propose_block().await? {
            RoundOutcome::Committed { block } => Ok(block),
            RoundOutcome::Rejected { decision, .. } => Err(LedgerError::ConsensusRejected {
                approvals: decision.approvals,
                required: decision.required,
            }),
        }
    }

    pub async fn propose_and_validate(&self) -> Result<bool> {
        Ok(matches!(
            self.propose_block().await?,
            RoundOutcome::Committed { .. }
        ))
    }

    /// Cancels the in-flight proof-of-work. Returns whether one was running.
    pub async fn cancel_mining(&self) -> bool {
        let state = self.inner.state.lock().await;
        match &state.in_flight {
            Some(in_flight) => {
                info!("cancelling proof-of-work for round {}", in_flight.round);
                in_flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_mining(&self) -> bool {
        self.inner.state.lock().await.in_flight.is_some()
    }

    pub async fn get_chain_page(&self, page: usize, page_size: usize) -> ChainPage {
        let state = self.inner.state.lock().await;
        views::chain_page(&state.chain, page, page_size)
    }

    pub async fn get_page(&self, page: usize, page_size: usize) -> Vec<Block> {
        let state = self.inner.state.lock().await;
        views::page(&state.chain, page, page_size).to_vec()
    }

    pub async fn get_block(&self, index: u64) -> Result<Block> {
        let state = self.inner.state.lock().await;
        index
            .checked_sub(1)
            .and_then(|i| state.chain.get(i as usize))
            .cloned()
            .ok_or(LedgerError::BlockNotFound(index))
    }

    pub async fn get_results(&self) -> Results {
        views::tally(&self.inner.state.lock().await.chain)
    }

    pub async fn blocks(&self) -> Vec<Block> {
        self.inner.state.lock().await.chain.clone()
    }

    pub async fn chain_len(&self) -> usize {
        self.inner.state.lock().await.chain.len()
    }

    pub async fn pending_votes(&self) -> Vec<Vote> {
        self.inner.state.lock().await.pending.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    pub fn validator_status(&self) -> Vec<ValidatorStatus> {
        self.inner.panel.status()
    }

    pub async fn verify_chain(&self) -> ChainReport {
        let state = self.inner.state.lock().await;
        let result = verify_chain(&state.chain, &self.inner.pow);
        ChainReport {
            length: state.chain.len(),
            valid: result.is_ok(),
            fault: result.err().map(|f| f.to_string()),
        }
    }

    /// Keeps proposing while votes that arrived during the last round still
    /// fill the threshold.
    async fn drain_ready(&self) {
        loop {
            let round = {
                let mut state = self.inner.state.lock().await;
                if !state.ready(self.inner.config.threshold) {
                    return;
                }
                match self.start_round(&mut state) {
                    Ok(round) => round,
                    Err(_) => return,
                }
            };
            match self.run_round(round).await {
                Ok(RoundOutcome::Committed { .. }) => continue,
                Ok(RoundOutcome::Rejected { .. }) => return,
                Err(err) => {
                    warn!("follow-up proposal round did not finish: {}", err);
                    return;
                }
            }
        }
    }

    /// Claims the in-flight slot. The returned guard frees it again if the
    /// round is dropped before it settles.
    fn start_round(&self, state: &mut LedgerState) -> Result<Round> {
        let snapshot = state.begin_round()?;
        let guard = RoundGuard {
            inner: Arc::clone(&self.inner),
            round: snapshot.round,
            cancel: snapshot.cancel.clone(),
            armed: true,
        };
        Ok(Round { snapshot, guard })
    }

    async fn run_round(&self, round: Round) -> Result<RoundOutcome> {
        let Round { snapshot, mut guard } = round;
        let judged = self.mine_and_judge(snapshot).await;

        let mut state = self.inner.state.lock().await;
        state.finish_round(guard.round);
        guard.disarm();
        let (proposed, decision) = judged?;

        if state.is_stale(&proposed) {
            warn!("discarding stale proposal {}", proposed.hash);
            return Err(LedgerError::StaleProposal);
        }

        if decision.accepted {
            let block = state.commit_block(proposed);
            info!(
                "block {} committed with {} votes: hash={} ({}/{} approvals)",
                block.index,
                block.votes.len(),
                block.hash,
                decision.approvals,
                decision.verdicts.len()
            );
            return Ok(RoundOutcome::Committed { block });
        }

        let requeued = match self.inner.config.rejection_policy {
            RejectionPolicy::Discard => {
                state.pending.drain(..proposed.votes.len());
                0
            }
            RejectionPolicy::Requeue => proposed.votes.len(),
        };
        warn!(
            "proposal {} rejected ({}/{} approvals), {} votes requeued",
            proposed.hash, decision.approvals, decision.required, requeued
        );
        Ok(RoundOutcome::Rejected { decision, requeued })
    }

    async fn mine_and_judge(&self, snapshot: Snapshot) -> Result<(ProposedBlock, QuorumDecision)> {
        let Snapshot {
            previous_hash,
            votes,
            timestamp,
            cancel,
            ..
        } = snapshot;

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || -> Result<(ProposedBlock, QuorumDecision)> {
            let solution = inner.pow.solve(&previous_hash, &votes, timestamp, &cancel)?;
            debug!(
                "proof-of-work found nonce {} after {} attempts",
                solution.nonce, solution.attempts
            );

            let merkle_root = if inner.config.merkle {
                let ids: Vec<&str> = votes.iter().map(|v| v.voter_id.as_str()).collect();
                merkle_root(&ids)
            } else {
                None
            };
            let proposed = ProposedBlock {
                votes,
                merkle_root,
                nonce: solution.nonce,
                previous_hash,
                timestamp,
                hash: solution.hash,
            };
            let decision = inner.panel.evaluate(&proposed);
            Ok((proposed, decision))
        })
        .await
        .map_err(|e| LedgerError::Worker(e.to_string()))?
    }
}

/// Walks the chain checking indices, links, hashes, work, Merkle roots and
/// voter uniqueness.
pub fn verify_chain(chain: &[Block], pow: &ProofOfWork) -> Result<(), ChainFault> {
    if chain.is_empty() {
        return Err(ChainFault::Empty);
    }

    let mut voters = HashSet::new();
    let mut previous_hash = GENESIS_PREVIOUS_HASH;

    for (position, block) in chain.iter().enumerate() {
        let expected = position as u64 + 1;
        if block.index != expected {
            return Err(ChainFault::IndexGap {
                expected,
                found: block.index,
            });
        }
        let index = block.index;
        if block.previous_hash != previous_hash {
            return Err(ChainFault::BrokenLink { index });
        }
        if block.compute_hash() != block.hash {
            return Err(ChainFault::HashMismatch { index });
        }
        if !pow.meets_difficulty(&block.hash) {
            return Err(ChainFault::InsufficientWork { index });
        }
        if let Some(root) = &block.merkle_root {
            let ids: Vec<&str> = block.votes.iter().map(|v| v.voter_id.as_str()).collect();
            if merkle_root(&ids).as_ref() != Some(root) {
                return Err(ChainFault::MerkleMismatch { index });
            }
        }
        for vote in &block.votes {
            if !voters.insert(vote.voter_id.as_str()) {
                return Err(ChainFault::DuplicateVoter {
                    index,
                    voter_id: vote.voter_id.clone(),
                });
            }
        }
        previous_hash = &block.hash;
    }

    Ok(())
}
