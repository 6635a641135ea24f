//! Enumeration types for constrained values.

use serde::{Deserialize, Serialize};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A regular salon customer earning and redeeming points.
    Customer,
    /// A staff account; excluded from all directory listings and search.
    Admin,
}

/// What kind of balance change a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// The single entry written when an account is first provisioned.
    Creation,
    /// Points earned (non-negative delta).
    Assignment,
    /// Points spent on a prize (negative delta).
    Redemption,
    /// Compensating entry that cancels an earlier transaction.
    Reversal,
}

impl TransactionKind {
    /// Derives the kind from the sign of a delta: non-negative deltas
    /// are assignments, negative ones redemptions.
    #[inline]
    #[must_use]
    pub const fn from_delta(delta: i64) -> Self {
        if delta >= 0_i64 {
            Self::Assignment
        } else {
            Self::Redemption
        }
    }
}
