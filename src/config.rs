//! Runtime configuration read from environment variables.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Which earlier votes a new submission is checked against.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Confirmed blocks and the pending pool.
    Strict,
    /// Confirmed blocks only.
    Confirmed,
}

/// What happens to a proposal's votes when the quorum rejects it.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RejectionPolicy {
    Discard,
    Requeue,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorKind {
    Deterministic,
    Random,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub difficulty: String,
    /// Pending-pool size that triggers a proposal. `None` means proposals
    /// only happen through an explicit trigger.
    pub threshold: Option<usize>,
    pub duplicate_policy: DuplicatePolicy,
    pub rejection_policy: RejectionPolicy,
    pub merkle: bool,
    pub mining_timeout: Option<Duration>,
    pub validators: ValidatorKind,
    pub approval_probability: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: "00".to_string(),
            threshold: Some(1),
            duplicate_policy: DuplicatePolicy::Strict,
            rejection_policy: RejectionPolicy::Requeue,
            merkle: true,
            mining_timeout: None,
            validators: ValidatorKind::Deterministic,
            approval_probability: 0.5,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub ledger: LedgerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ledger: LedgerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars().collect())
    }

    /// Builds a config from a variable map; unset keys keep their defaults.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let get = |key: &str| lookup(&vars, key);

        if let Some(host) = get("SERVER_HOST") {
            config.host = host.to_string();
        }
        if let Some(port) = get("SERVER_PORT") {
            config.port = parse("SERVER_PORT", port)?;
        }

        let ledger = &mut config.ledger;
        if let Some(difficulty) = get("LEDGER_DIFFICULTY") {
            if difficulty.chars().any(|c| c != '0') {
                return Err(ConfigError::InvalidDifficulty(difficulty.to_string()));
            }
            ledger.difficulty = difficulty.to_string();
        }
        if let Some(threshold) = get("LEDGER_THRESHOLD") {
            let threshold: usize = parse("LEDGER_THRESHOLD", threshold)?;
            ledger.threshold = (threshold > 0).then_some(threshold);
        }
        if let Some(policy) = get("LEDGER_DUPLICATE_POLICY") {
            ledger.duplicate_policy = match policy.to_ascii_lowercase().as_str() {
                "strict" => DuplicatePolicy::Strict,
                "confirmed" => DuplicatePolicy::Confirmed,
                _ => {
                    return Err(invalid(
                        "LEDGER_DUPLICATE_POLICY",
                        policy,
                        "expected strict or confirmed",
                    ))
                }
            };
        }
        if let Some(policy) = get("LEDGER_REJECTION_POLICY") {
            ledger.rejection_policy = match policy.to_ascii_lowercase().as_str() {
                "discard" => RejectionPolicy::Discard,
                "requeue" => RejectionPolicy::Requeue,
                _ => {
                    return Err(invalid(
                        "LEDGER_REJECTION_POLICY",
                        policy,
                        "expected discard or requeue",
                    ))
                }
            };
        }
        if let Some(merkle) = get("LEDGER_MERKLE") {
            ledger.merkle = parse("LEDGER_MERKLE", merkle)?;
        }
        if let Some(timeout) = get("LEDGER_MINING_TIMEOUT_MS") {
            let ms: u64 = parse("LEDGER_MINING_TIMEOUT_MS", timeout)?;
            ledger.mining_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(kind) = get("LEDGER_VALIDATORS") {
            ledger.validators = match kind.to_ascii_lowercase().as_str() {
                "deterministic" => ValidatorKind::Deterministic,
                "random" => ValidatorKind::Random,
                _ => {
                    return Err(invalid(
                        "LEDGER_VALIDATORS",
                        kind,
                        "expected deterministic or random",
                    ))
                }
            };
        }
        if let Some(p) = get("LEDGER_APPROVAL_PROBABILITY") {
            let p: f64 = parse("LEDGER_APPROVAL_PROBABILITY", p)?;
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(
                    "LEDGER_APPROVAL_PROBABILITY",
                    &p.to_string(),
                    "must be within 0..=1",
                ));
            }
            ledger.approval_probability = p;
        }

        Ok(config)
    }
}

fn lookup<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
