//! Error types for the fidelity ledger library.

use crate::models::{BonusId, TransactionId, UserId};

/// Convenience alias for results produced by this crate.
pub type Result<T> = core::result::Result<T, FidelityError>;

/// All errors that can occur when using the fidelity ledger.
#[derive(Debug, thiserror::Error)]
pub enum FidelityError {
    /// The referenced user does not exist.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// The referenced transaction does not exist.
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The referenced bonus does not exist in the catalog.
    #[error("bonus not found: {0}")]
    BonusNotFound(BonusId),

    /// The transaction has already been reversed; a ledger entry can be
    /// reversed at most once.
    #[error("transaction already reversed: {0}")]
    AlreadyReversed(TransactionId),

    /// An optimistic-concurrency commit lost the race: the user document
    /// changed between read and write. Retried internally up to a bound;
    /// surfaced when the bound is exhausted.
    #[error("concurrent update conflict on user {0}")]
    Conflict(UserId),

    /// Store backend failed (transport or backend error).
    #[error("store error: {0}")]
    Store(Box<dyn core::error::Error + Send + Sync>),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
