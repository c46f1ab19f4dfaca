//! Crate-wide error type for ledgerdb.
//!
//! One variant per failure kind recognized by the transaction manager and
//! its collaborators. Only [`LedgerError::DeadlockDetected`] is handled
//! automatically (abort + bounded retry); every other variant aborts the
//! transaction and surfaces to the caller.

use crate::core::concurrency::ResourceKey;

/// Main error type for ledgerdb operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// A wait-for cycle was found on `acquire`; the requester is the victim.
    /// Recoverable by the transaction manager via abort + retry.
    #[error("deadlock detected: txn {txn_id} aborted acquiring {resource:?}")]
    DeadlockDetected { txn_id: u64, resource: ResourceKey },

    /// `acquire`/`upgrade` exceeded the configured timeout. Non-retriable.
    #[error("lock timeout: txn {txn_id} waiting on {resource:?}")]
    LockTimeout { txn_id: u64, resource: ResourceKey },

    /// Invalid input: negative balance, non-positive amount, or an
    /// operation attempted on a non-active transaction.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A routed operation named an account id that storage has no record
    /// of, on the node it was routed to.
    #[error("account {account_id} not found on {node}")]
    AccountNotFound { node: String, account_id: u64 },

    /// Insufficient funds for a debit. Fatal for the transaction, never
    /// retried.
    #[error("business rule violated: {0}")]
    BusinessRule(String),

    /// The storage adapter failed during a read or commit-flush.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// The routing/config file could not be parsed or was missing a
    /// required field.
    #[error("config error: {0}")]
    Config(String),

    /// Underlying I/O failure (reading a config file, a CSV, or a
    /// file-backed store).
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageFailure(format!("serialization error: {err}"))
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<csv::Error> for LedgerError {
    fn from(err: csv::Error) -> Self {
        Self::Io(format!("csv error: {err}"))
    }
}
