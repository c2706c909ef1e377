//! Error taxonomy for the automation engine.
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures they can act on:
//!
//! - `ValidationError` - rejected synchronously at construction, never persisted
//! - `AuthorizationError` - terminal per attempt, never retried
//! - `EvaluationError` - recoverable, the tick is skipped without a ledger record
//! - `ExecutionError` - transient failures are retried with backoff
//! - `PersistenceError` - retried a bounded number of times, then surfaced

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{AccountId, Address, StrategyId};

/// Malformed input rejected at creation time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid address: '{0}'. Expected 32-byte hex ed25519 key")]
    InvalidAddress(String),

    #[error("Signer set must not be empty")]
    EmptySignerSet,

    #[error("Threshold {threshold} out of range for {signers} signer(s)")]
    ThresholdOutOfRange { threshold: u32, signers: usize },

    #[error("Owner {0} is not a member of the signer set")]
    OwnerNotSigner(Address),

    #[error("Single-owner account must have exactly one signer and threshold 1 (got {signers} signer(s), threshold {threshold})")]
    SingleAccountShape { signers: usize, threshold: u32 },

    #[error("Delegation chain must contain at least one link")]
    EmptyChain,

    #[error("Delegation chain broken at link {index}: delegate does not match next delegator")]
    BrokenChain { index: usize },

    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Target allocation must sum to 100, got {0}")]
    AllocationSum(Decimal),

    #[error("Strategy name must not be empty")]
    EmptyName,

    #[error("Delegation account {0} already exists")]
    DuplicateAccount(AccountId),

    #[error("Portfolio drift trigger needs a reference allocation (explicit or from a rebalance action)")]
    MissingReferenceAllocation,
}

/// An action could not be authorized.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthorizationError {
    #[error("Delegation account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Delegation account {0} has been revoked")]
    Revoked(AccountId),

    #[error("Insufficient signatures: {valid} valid, threshold {threshold}")]
    InsufficientSignatures { valid: usize, threshold: u32 },

    #[error("Approval collection failed: {0}")]
    ApprovalUnavailable(String),
}

/// A tick could not be evaluated. Always recoverable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Snapshot feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Snapshot is stale: age {age_secs}s exceeds max {max_age_secs}s")]
    StaleSnapshot { age_secs: i64, max_age_secs: i64 },

    #[error("Snapshot timestamp is {ahead_secs}s in the future")]
    FutureSnapshot { ahead_secs: i64 },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("No price for asset {0} in snapshot")]
    MissingPrice(String),

    #[error("No value for metric {0} in snapshot")]
    MissingMetric(String),

    #[error("Snapshot carries no portfolio allocation")]
    MissingAllocation,
}

/// Failure talking to the execution layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    /// Network blips, congestion, nonce races. Retried with backoff.
    #[error("Transient execution failure: {0}")]
    Transient(String),

    /// The layer refused the action outright. Never retried.
    #[error("Execution rejected: {0}")]
    Rejected(String),

    #[error("Execution layer timed out after {0}ms")]
    Timeout(u64),
}

impl ExecutionError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Storage or fetch failure in the delegation store or ledger sinks.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Errors from the delegation module's storage-facing operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DelegationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Delegation chain not found: {0}")]
    ChainNotFound(String),

    #[error("Delegation account not found: {0}")]
    AccountNotFound(AccountId),
}

/// Errors from strategy registry operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Strategy not found: {0}")]
    NotFound(StrategyId),

    #[error("Owning delegation account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Strategy {0} already exists")]
    AlreadyExists(StrategyId),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Top-level error for engine wiring and commands.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Delegation(#[from] DelegationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::cli::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_transience() {
        assert!(ExecutionError::Transient("rpc".into()).is_transient());
        assert!(ExecutionError::Timeout(500).is_transient());
        assert!(!ExecutionError::Rejected("slippage".into()).is_transient());
    }

    #[test]
    fn test_error_messages_are_descriptive() {
        let e = AuthorizationError::InsufficientSignatures {
            valid: 1,
            threshold: 2,
        };
        assert_eq!(e.to_string(), "Insufficient signatures: 1 valid, threshold 2");

        let e = ValidationError::ThresholdOutOfRange {
            threshold: 4,
            signers: 3,
        };
        assert!(e.to_string().contains("Threshold 4"));
    }
}
