//! User account model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BonusId, Role, UserId};

/// A loyalty-program user account.
///
/// The `points` balance is kept consistent with the append-only
/// transaction log by committing both through
/// [`Store::commit_entry`](crate::storage::Store::commit_entry); the
/// `version` counter is the compare-and-swap token for that commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique identifier.
    pub id: UserId,
    /// Login name (customers are provisioned as `CL001`, `CL002`, ...).
    pub username: String,
    /// Opaque credential; verification happens outside this crate.
    pub password: String,
    /// Given name (empty until the customer completes initial setup).
    #[serde(default)]
    pub first_name: String,
    /// Family name (empty until the customer completes initial setup).
    #[serde(default)]
    pub last_name: String,
    /// Current points balance. May go negative: the core applies any
    /// delta it is given and leaves floor checks to the caller.
    pub points: i64,
    /// Account role.
    pub role: Role,
    /// When the account was provisioned.
    pub creation_date: DateTime<Utc>,
    /// Whether the customer still has to complete initial setup.
    pub is_initial_login: bool,
    /// Bonuses already granted to this user, each at most once.
    #[serde(default)]
    pub completed_bonuses: BTreeSet<BonusId>,
    /// Optimistic-concurrency counter, bumped by the store on every
    /// committed balance mutation. Defaults to zero for documents
    /// written before versioning existed.
    #[serde(default)]
    pub version: u64,
}

impl User {
    /// Returns the customer's display name: "First Last" when the
    /// profile is filled in, the username otherwise.
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.first_name.is_empty() {
            self.username.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }

    /// Returns `true` for staff accounts.
    #[inline]
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}
