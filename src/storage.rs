//! Pluggable document-store backends for the ledger.
//!
//! This module defines the async [`Store`] trait the ledger and the
//! customer directory ride on, together with the typed query values
//! ([`UserQuery`], [`TransactionQuery`]) and the opaque pagination
//! [`Cursor`]. The backing store is only assumed to offer single-document
//! atomicity plus case-sensitive prefix-range scans; everything richer
//! (case-insensitive search, balance/log consistency) is built on top.

mod memory;

pub use memory::InMemoryStore;

use core::cmp::Ordering;
use core::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Bonus, Role, Transaction, TransactionId, TransactionKind, User, UserId};

/// Field the user listing is ordered by.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    /// Order by account provisioning time.
    #[default]
    CreationDate,
    /// Order by family name.
    LastName,
    /// Order by login name.
    Username,
    /// Order by current points balance.
    Points,
}

impl SortField {
    /// Extracts this field's sort key from a user.
    #[inline]
    #[must_use]
    pub fn key_of(self, user: &User) -> CursorKey {
        match self {
            Self::CreationDate => CursorKey::Time(user.creation_date),
            Self::LastName => CursorKey::Text(user.last_name.clone()),
            Self::Username => CursorKey::Text(user.username.clone()),
            Self::Points => CursorKey::Points(user.points),
        }
    }
}

/// Direction of an ordered scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    /// Smallest key first.
    Ascending,
    /// Largest key first.
    #[default]
    Descending,
}

impl SortDirection {
    /// Orients a natural-order comparison along this direction.
    #[inline]
    #[must_use]
    pub const fn orient(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

/// Text field a prefix filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchField {
    /// The login name.
    Username,
    /// The given name.
    FirstName,
    /// The family name.
    LastName,
}

impl SearchField {
    /// Returns this field's value on a user.
    #[inline]
    #[must_use]
    pub fn value_of(self, user: &User) -> &str {
        match self {
            Self::Username => &user.username,
            Self::FirstName => &user.first_name,
            Self::LastName => &user.last_name,
        }
    }
}

/// Sort-key value captured in a pagination cursor.
///
/// Within a single query every key is the same variant; the derived
/// ordering is only meaningful between keys of the same field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CursorKey {
    /// A textual key (username or last name).
    Text(String),
    /// A timestamp key (creation date).
    Time(DateTime<Utc>),
    /// A numeric key (points balance).
    Points(i64),
}

/// Opaque pagination position: the sort key and id of the last item of
/// the previous page.
///
/// Callers pass it back verbatim; the id doubles as a tie-breaker so the
/// total order is strict and consecutive pages neither duplicate nor
/// skip items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    /// Sort-key value of the last returned item.
    key: CursorKey,
    /// Id of the last returned item (tie-breaker).
    id: UserId,
}

impl Cursor {
    /// Builds the cursor pointing just past `user` in a scan ordered by
    /// `field`.
    #[inline]
    #[must_use]
    pub fn after(user: &User, field: SortField) -> Self {
        Self {
            key: field.key_of(user),
            id: user.id.clone(),
        }
    }

    /// The captured sort-key value.
    #[inline]
    #[must_use]
    pub const fn sort_key(&self) -> &CursorKey {
        &self.key
    }

    /// The captured tie-breaker id.
    #[inline]
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.id
    }
}

/// Case-sensitive prefix filter on a single text field, the
/// `[prefix, prefix + sentinel)` range scan the underlying store offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefixFilter {
    /// Field the prefix applies to.
    pub field: SearchField,
    /// The literal prefix (matched case-sensitively).
    pub value: String,
}

/// Composable query over the user collection.
///
/// Use builder-style methods to chain criteria; every set criterion must
/// hold for a user to be returned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserQuery {
    /// Field the result set is ordered by.
    pub order_by: SortField,
    /// Scan direction.
    pub direction: SortDirection,
    /// Resume position from a previous page, exclusive.
    pub start_after: Option<Cursor>,
    /// Case-sensitive prefix filter.
    pub prefix: Option<PrefixFilter>,
    /// Restrict to accounts with this role.
    pub role: Option<Role>,
    /// Maximum number of users returned; unbounded when absent.
    pub limit: Option<usize>,
}

impl UserQuery {
    /// Creates an unordered, unfiltered query (creation date descending).
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders the result set by the given field.
    #[inline]
    #[must_use]
    pub const fn order_by(mut self, field: SortField) -> Self {
        self.order_by = field;
        self
    }

    /// Sets the scan direction.
    #[inline]
    #[must_use]
    pub const fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Resumes the scan just past the given cursor.
    #[inline]
    #[must_use]
    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// Restricts to users whose `field` starts with `value`
    /// (case-sensitive).
    #[inline]
    #[must_use]
    pub fn prefix<T: Into<String>>(mut self, field: SearchField, value: T) -> Self {
        self.prefix = Some(PrefixFilter {
            field,
            value: value.into(),
        });
        self
    }

    /// Restricts to accounts with the given role.
    #[inline]
    #[must_use]
    pub const fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Caps the number of returned users.
    #[inline]
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of an ordered user scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// The users on this page, in query order.
    pub users: Vec<User>,
    /// Position to resume from, or `None` when the scan is exhausted.
    pub next_cursor: Option<Cursor>,
}

/// Composable query over the transaction log. Results are always newest
/// first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionQuery {
    /// Restrict to entries of this user.
    pub user: Option<UserId>,
    /// Restrict to entries of this kind.
    pub kind: Option<TransactionKind>,
    /// Maximum number of entries returned; unbounded when absent.
    pub limit: Option<usize>,
}

impl TransactionQuery {
    /// Creates an unfiltered query matching the whole log.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to entries of the given user.
    #[inline]
    #[must_use]
    pub fn user(mut self, id: UserId) -> Self {
        self.user = Some(id);
        self
    }

    /// Restricts to entries of the given kind.
    #[inline]
    #[must_use]
    pub const fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Caps the number of returned entries.
    #[inline]
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Async document-store backend the ledger and directory ride on.
///
/// All methods take `&self`; implementations use interior mutability
/// (e.g. a `Mutex`) for thread-safe mutation. The two compound writes,
/// [`Store::commit_entry`] and [`Store::remove_user`], must be applied
/// as all-or-nothing units.
pub trait Store: core::fmt::Debug + Send + Sync {
    /// Fetches a user document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to read.
    fn user(&self, id: &UserId) -> impl Future<Output = Result<Option<User>>> + Send;

    /// Inserts or replaces a user document wholesale. Does not touch the
    /// transaction log; balance changes must go through
    /// [`Store::commit_entry`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to write.
    fn put_user(&self, user: User) -> impl Future<Output = Result<()>> + Send;

    /// Atomically persists `user` (its `version` bumped to
    /// `expected_version + 1`) and appends `entry` to the log, as one
    /// all-or-nothing unit. Succeeds only when the stored document's
    /// version still equals `expected_version`; when no document exists
    /// for `user.id`, an `expected_version` of zero inserts it (account
    /// provisioning).
    ///
    /// Returns the user as persisted.
    ///
    /// # Errors
    ///
    /// Returns [`FidelityError::Conflict`](crate::error::FidelityError::Conflict)
    /// when the version check fails,
    /// [`FidelityError::UserNotFound`](crate::error::FidelityError::UserNotFound)
    /// when the document is absent and `expected_version` is non-zero,
    /// or a backend error.
    fn commit_entry(
        &self,
        user: User,
        expected_version: u64,
        entry: Transaction,
    ) -> impl Future<Output = Result<User>> + Send;

    /// Deletes a user document together with all of its transactions, as
    /// one all-or-nothing unit.
    ///
    /// # Errors
    ///
    /// Returns
    /// [`FidelityError::UserNotFound`](crate::error::FidelityError::UserNotFound)
    /// if the user does not exist, or a backend error.
    fn remove_user(&self, id: &UserId) -> impl Future<Output = Result<()>> + Send;

    /// Runs an ordered, filtered, cursor-paginated scan over the user
    /// collection. The total order is (sort key, id) oriented by the
    /// query direction; `next_cursor` is `None` exactly when no matching
    /// user follows the last returned one. A page emptied by a zero
    /// limit carries its `start_after` position forward unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to read.
    fn users(&self, query: UserQuery) -> impl Future<Output = Result<Page>> + Send;

    /// Fetches a transaction by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to read.
    fn transaction(
        &self,
        id: &TransactionId,
    ) -> impl Future<Output = Result<Option<Transaction>>> + Send;

    /// Atomically flips a transaction's `is_reversed` flag from `false`
    /// to `true` and returns the updated record. The flag flips at most
    /// once; everything else on the record, `balance_after` included,
    /// stays the historical snapshot.
    ///
    /// # Errors
    ///
    /// Returns
    /// [`FidelityError::TransactionNotFound`](crate::error::FidelityError::TransactionNotFound)
    /// if the entry is absent,
    /// [`FidelityError::AlreadyReversed`](crate::error::FidelityError::AlreadyReversed)
    /// if the flag is already set, or a backend error.
    fn mark_reversed(
        &self,
        id: &TransactionId,
    ) -> impl Future<Output = Result<Transaction>> + Send;

    /// Runs a filtered scan over the transaction log, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to read.
    fn transactions(
        &self,
        query: TransactionQuery,
    ) -> impl Future<Output = Result<Vec<Transaction>>> + Send;

    /// Returns the bonus catalog ordered by slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to read.
    fn bonuses(&self) -> impl Future<Output = Result<Vec<Bonus>>> + Send;

    /// Inserts or updates a catalog entry in place (matched by id).
    /// Catalog entries are never deleted or re-numbered.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to write.
    fn put_bonus(&self, bonus: Bonus) -> impl Future<Output = Result<()>> + Send;
}
