use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("proof-of-work cancelled")]
    Cancelled,

    #[error("proof-of-work timed out after {attempts} attempts")]
    TimedOut { attempts: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("difficulty prefix {0:?} must be made of '0' characters only")]
    InvalidDifficulty(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("voter id is required")]
    MissingVoterId,

    #[error("invalid candidate {0:?}")]
    InvalidCandidate(String),

    #[error("voter {0:?} has already voted")]
    DuplicateVoter(String),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("consensus rejected the proposal: {approvals} of {required} required approvals")]
    ConsensusRejected { approvals: usize, required: usize },

    #[error("mining cancelled")]
    MiningCancelled,

    #[error("mining timed out after {attempts} attempts")]
    MiningTimedOut { attempts: u64 },

    #[error("ledger changed while the proposal was being mined")]
    StaleProposal,

    #[error("a block proposal is already in progress")]
    ProposalInProgress,

    #[error("mining worker failed: {0}")]
    Worker(String),

    #[error("invalid validator panel: {0}")]
    Panel(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<PowError> for LedgerError {
    fn from(err: PowError) -> Self {
        match err {
            PowError::Cancelled => LedgerError::MiningCancelled,
            PowError::TimedOut { attempts } => LedgerError::MiningTimedOut { attempts },
        }
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// First integrity violation found while walking the chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainFault {
    #[error("chain is empty")]
    Empty,

    #[error("expected block index {expected}, found {found}")]
    IndexGap { expected: u64, found: u64 },

    #[error("block {index} does not link to its predecessor")]
    BrokenLink { index: u64 },

    #[error("block {index} hash does not match its contents")]
    HashMismatch { index: u64 },

    #[error("block {index} hash does not meet the difficulty")]
    InsufficientWork { index: u64 },

    #[error("block {index} merkle root does not match its voters")]
    MerkleMismatch { index: u64 },

    #[error("voter {voter_id:?} appears again in block {index}")]
    DuplicateVoter { index: u64, voter_id: String },
}
