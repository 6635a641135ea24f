//! Ledger transaction model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TransactionId, TransactionKind, UserId};

/// One immutable record of a balance change.
///
/// Written once and never edited, with a single exception: the
/// `is_reversed` flag flips `false` to `true` exactly once when the
/// entry is compensated. `balance_after` stays a historical snapshot
/// even after reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique identifier.
    pub id: TransactionId,
    /// The user whose balance this entry changed.
    pub user_id: UserId,
    /// When the entry was applied.
    pub date: DateTime<Utc>,
    /// Kind of change.
    pub kind: TransactionKind,
    /// Human-readable description, often a "name (detail)" pair.
    pub description: String,
    /// Signed delta applied to the balance.
    pub points_change: i64,
    /// The user's balance immediately after this entry was applied.
    pub balance_after: i64,
    /// Whether a compensating entry has cancelled this one.
    #[serde(default)]
    pub is_reversed: bool,
    /// For reversal entries: the transaction being compensated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_of: Option<TransactionId>,
    /// Actor tag of the staff member who performed the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<String>,
}
