//! The points ledger: balance mutations with an append-only history.
//!
//! Every balance change goes through a single compare-and-swap commit
//! ([`Store::commit_entry`]) that writes the new balance and appends the
//! matching [`Transaction`] as one unit, so the running balance can
//! never drift from the log. Reversals, one-time bonuses, and bulk
//! assignment are all built on that same commit.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::Utc;
use futures::future::try_join_all;

use crate::error::{FidelityError, Result};
use crate::models::{
    Bonus, BonusId, Role, Transaction, TransactionId, TransactionKind, User, UserId,
};
use crate::storage::{Store, TransactionQuery, UserQuery};

/// How many times a commit is retried after losing an optimistic
/// concurrency race before the conflict is surfaced to the caller.
const MAX_COMMIT_RETRIES: u32 = 5;

/// Width of the numeric part of generated customer usernames.
const USERNAME_DIGITS: usize = 3;

/// Prefix of generated customer usernames.
const USERNAME_PREFIX: &str = "CL";

/// Length of generated initial credentials.
const PASSWORD_LENGTH: usize = 8;

/// Display name used for transactions whose user has been deleted.
const DELETED_USER_NAME: &str = "Utente Eliminato";

/// A recent log entry joined with the display name of its user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEntry {
    /// The log entry.
    pub transaction: Transaction,
    /// Display name of the user at read time, or a placeholder when the
    /// account has since been deleted.
    pub user_name: String,
}

/// Per-user outcome of a bulk assignment.
#[derive(Debug)]
pub struct BulkOutcome {
    /// The user this outcome belongs to.
    pub user_id: UserId,
    /// The user's new balance, or why the assignment failed. Earlier
    /// successes are never rolled back by a later failure.
    pub result: Result<i64>,
}

/// Dashboard counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Number of customer accounts.
    pub customers: usize,
    /// Number of redemption entries in the log.
    pub redemptions: usize,
    /// Number of assignment entries in the log.
    pub assignments: usize,
}

/// The points ledger over a shared store.
///
/// Cheap to construct; borrow the same store for a
/// [`Directory`](crate::directory::Directory) alongside it.
#[derive(Debug)]
pub struct Ledger<'store, S: Store> {
    /// The backing document store.
    store: &'store S,
}

impl<'store, S: Store> Ledger<'store, S> {
    /// Creates a ledger over the given store.
    #[inline]
    #[must_use]
    pub const fn new(store: &'store S) -> Self {
        Self { store }
    }

    // ── Ledger core ────────────────────────────────────────────────────

    /// Applies a signed delta to a user's balance and appends the
    /// matching log entry, as one atomic commit. The kind is derived
    /// from the delta's sign (non-negative: assignment, negative:
    /// redemption). No floor is enforced; balances may go negative and
    /// callers that want a floor must check before calling.
    ///
    /// Returns the updated user and the appended entry.
    ///
    /// # Errors
    ///
    /// Returns [`FidelityError::UserNotFound`] if the user does not
    /// exist, [`FidelityError::Conflict`] if the commit keeps losing
    /// concurrent races, or a store error.
    #[tracing::instrument(skip_all, fields(user = %user_id, delta))]
    pub async fn apply_delta(
        &self,
        user_id: &UserId,
        delta: i64,
        description: &str,
        actor: Option<&str>,
    ) -> Result<(User, Transaction)> {
        self.apply_entry(
            user_id,
            delta,
            TransactionKind::from_delta(delta),
            description.to_owned(),
            None,
            actor,
        )
        .await
    }

    /// Read-modify-write-append with bounded optimistic retries.
    async fn apply_entry(
        &self,
        user_id: &UserId,
        delta: i64,
        kind: TransactionKind,
        description: String,
        reversal_of: Option<TransactionId>,
        actor: Option<&str>,
    ) -> Result<(User, Transaction)> {
        let mut attempt = 0_u32;
        loop {
            let mut user = self
                .store
                .user(user_id)
                .await?
                .ok_or_else(|| FidelityError::UserNotFound(user_id.clone()))?;
            let expected_version = user.version;
            user.points += delta;
            let entry = Transaction {
                id: TransactionId::random(),
                user_id: user_id.clone(),
                date: Utc::now(),
                kind,
                description: description.clone(),
                points_change: delta,
                balance_after: user.points,
                is_reversed: false,
                reversal_of: reversal_of.clone(),
                performed_by: actor.map(ToOwned::to_owned),
            };
            match self.store.commit_entry(user, expected_version, entry.clone()).await {
                Ok(committed) => return Ok((committed, entry)),
                Err(FidelityError::Conflict(_)) if attempt < MAX_COMMIT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, "commit lost a concurrent race, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ── Reversal ───────────────────────────────────────────────────────

    /// Undoes a previously recorded transaction exactly once: flips its
    /// `is_reversed` flag, then applies the negated delta as a new
    /// reversal entry referencing the original. The original entry's
    /// `balance_after` stays the historical snapshot it always was.
    ///
    /// Returns the user with the compensated balance.
    ///
    /// # Errors
    ///
    /// Returns [`FidelityError::TransactionNotFound`] if the entry is
    /// absent, [`FidelityError::AlreadyReversed`] on a second attempt,
    /// [`FidelityError::UserNotFound`] if the user has been deleted in
    /// the meantime, or a store error.
    #[tracing::instrument(skip_all, fields(transaction = %transaction_id))]
    pub async fn reverse(
        &self,
        transaction_id: &TransactionId,
        actor: Option<&str>,
    ) -> Result<User> {
        // Flag first: the test-and-set is the idempotency guard, so a
        // concurrent second attempt fails before touching the balance.
        let original = self.store.mark_reversed(transaction_id).await?;
        let (user, _entry) = self
            .apply_entry(
                &original.user_id,
                -original.points_change,
                TransactionKind::Reversal,
                format!("Storno: {}", original.description),
                Some(transaction_id.clone()),
                actor,
            )
            .await?;
        Ok(user)
    }

    // ── Bonus tracker ──────────────────────────────────────────────────

    /// Grants a one-time bonus, at most once per (user, bonus) pair.
    /// A second grant is a no-op that returns the user unchanged: the
    /// completion set and the balance travel in the same commit, so
    /// repeated or concurrent invocations can never double-grant.
    ///
    /// # Errors
    ///
    /// Returns [`FidelityError::UserNotFound`] if the user does not
    /// exist, [`FidelityError::Conflict`] if the commit keeps losing
    /// concurrent races, or a store error.
    #[tracing::instrument(skip_all, fields(user = %user_id, bonus = %bonus.id))]
    pub async fn grant_bonus(
        &self,
        user_id: &UserId,
        bonus: &Bonus,
        actor: Option<&str>,
    ) -> Result<User> {
        let mut attempt = 0_u32;
        loop {
            let mut user = self
                .store
                .user(user_id)
                .await?
                .ok_or_else(|| FidelityError::UserNotFound(user_id.clone()))?;
            if user.completed_bonuses.contains(&bonus.id) {
                tracing::debug!("bonus already granted, returning unchanged");
                return Ok(user);
            }
            let expected_version = user.version;
            let _inserted = user.completed_bonuses.insert(bonus.id.clone());
            user.points += bonus.points;
            let entry = Transaction {
                id: TransactionId::random(),
                user_id: user_id.clone(),
                date: Utc::now(),
                kind: TransactionKind::Assignment,
                description: format!("Primi Passi: {}", bonus.name),
                points_change: bonus.points,
                balance_after: user.points,
                is_reversed: false,
                reversal_of: None,
                performed_by: actor.map(ToOwned::to_owned),
            };
            match self.store.commit_entry(user, expected_version, entry).await {
                Ok(committed) => return Ok(committed),
                Err(FidelityError::Conflict(_)) if attempt < MAX_COMMIT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, "bonus commit lost a concurrent race, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Looks up a bonus in the catalog and grants it.
    ///
    /// # Errors
    ///
    /// Returns [`FidelityError::BonusNotFound`] if the catalog has no
    /// such entry, otherwise everything [`Ledger::grant_bonus`] returns.
    pub async fn grant_bonus_by_id(
        &self,
        user_id: &UserId,
        bonus_id: &BonusId,
        actor: Option<&str>,
    ) -> Result<User> {
        let catalog = self.store.bonuses().await?;
        let bonus = catalog
            .iter()
            .find(|candidate| candidate.id == *bonus_id)
            .ok_or_else(|| FidelityError::BonusNotFound(bonus_id.clone()))?;
        self.grant_bonus(user_id, bonus, actor).await
    }

    /// Returns the bonus catalog ordered by slot, seeding the fixed
    /// default catalog on first use.
    ///
    /// # Errors
    ///
    /// Returns a store error if reading or seeding fails.
    pub async fn bonus_catalog(&self) -> Result<Vec<Bonus>> {
        let existing = self.store.bonuses().await?;
        if !existing.is_empty() {
            return Ok(existing);
        }
        tracing::debug!("seeding default bonus catalog");
        for bonus in Bonus::default_catalog() {
            self.store.put_bonus(bonus).await?;
        }
        self.store.bonuses().await
    }

    // ── Bulk coordinator ───────────────────────────────────────────────

    /// Applies the same delta to many users, strictly sequentially and
    /// in the order given. The batch is best-effort, not transactional:
    /// a failure partway through leaves earlier users updated, and the
    /// per-user outcomes report exactly which users were touched.
    #[tracing::instrument(skip_all, fields(count = user_ids.len(), delta))]
    pub async fn assign_to_many(
        &self,
        user_ids: &[UserId],
        delta: i64,
        description: &str,
        actor: Option<&str>,
    ) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let result = self
                .apply_delta(user_id, delta, description, actor)
                .await
                .map(|(user, _entry)| user.points);
            if let Err(err) = result.as_ref() {
                tracing::warn!(user = %user_id, error = %err, "bulk assignment failed for user");
            }
            outcomes.push(BulkOutcome {
                user_id: user_id.clone(),
                result,
            });
        }
        outcomes
    }

    // ── Provisioning ───────────────────────────────────────────────────

    /// Provisions a fresh customer account: the lowest free `CL###`
    /// username, a random credential, a zero balance, and the account's
    /// single creation entry, committed atomically with the document.
    ///
    /// # Errors
    ///
    /// Returns a store error if the scan or the commit fails.
    #[tracing::instrument(skip_all)]
    pub async fn create_customer(&self) -> Result<User> {
        let existing = self.store.users(UserQuery::new()).await?;
        let username = next_username(&existing.users);
        tracing::debug!(username = %username, "provisioning customer");

        let user = User {
            id: UserId::random(),
            username,
            password: random_password(),
            first_name: String::new(),
            last_name: String::new(),
            points: 0_i64,
            role: Role::Customer,
            creation_date: Utc::now(),
            is_initial_login: true,
            completed_bonuses: BTreeSet::new(),
            version: 0_u64,
        };
        let entry = Transaction {
            id: TransactionId::random(),
            user_id: user.id.clone(),
            date: user.creation_date,
            kind: TransactionKind::Creation,
            description: "Creazione account".to_owned(),
            points_change: 0_i64,
            balance_after: 0_i64,
            is_reversed: false,
            reversal_of: None,
            performed_by: None,
        };
        self.store.commit_entry(user, 0, entry).await
    }

    /// Deletes a customer account together with its whole transaction
    /// history, as one batch.
    ///
    /// # Errors
    ///
    /// Returns [`FidelityError::UserNotFound`] if the user does not
    /// exist, or a store error.
    #[tracing::instrument(skip_all, fields(user = %user_id))]
    pub async fn delete_customer(&self, user_id: &UserId) -> Result<()> {
        self.store.remove_user(user_id).await
    }

    // ── History & stats ────────────────────────────────────────────────

    /// Returns a user's full transaction history, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the scan fails.
    pub async fn transactions_for_user(&self, user_id: &UserId) -> Result<Vec<Transaction>> {
        self.store
            .transactions(TransactionQuery::new().user(user_id.clone()))
            .await
    }

    /// Returns the latest log entries across all users, each joined with
    /// the user's display name (user lookups run concurrently; deleted
    /// accounts render as a placeholder).
    ///
    /// # Errors
    ///
    /// Returns a store error if the scan or a lookup fails.
    pub async fn recent_transactions(&self, limit: usize) -> Result<Vec<RecentEntry>> {
        let entries = self
            .store
            .transactions(TransactionQuery::new().limit(limit))
            .await?;

        let unique_ids: HashSet<UserId> =
            entries.iter().map(|entry| entry.user_id.clone()).collect();
        let ids: Vec<UserId> = unique_ids.into_iter().collect();
        let fetched = try_join_all(ids.iter().map(|id| self.store.user(id))).await?;
        let names: HashMap<UserId, String> = ids
            .into_iter()
            .zip(fetched)
            .map(|(id, user)| {
                let name =
                    user.map_or_else(|| DELETED_USER_NAME.to_owned(), |found| found.display_name());
                (id, name)
            })
            .collect();

        Ok(entries
            .into_iter()
            .map(|transaction| {
                let user_name = names
                    .get(&transaction.user_id)
                    .cloned()
                    .unwrap_or_else(|| DELETED_USER_NAME.to_owned());
                RecentEntry {
                    transaction,
                    user_name,
                }
            })
            .collect())
    }

    /// Returns the dashboard counters: customers, redemption entries,
    /// assignment entries.
    ///
    /// # Errors
    ///
    /// Returns a store error if any scan fails.
    pub async fn stats(&self) -> Result<Stats> {
        let customers = self
            .store
            .users(UserQuery::new().role(Role::Customer))
            .await?
            .users
            .len();
        let redemptions = self
            .store
            .transactions(TransactionQuery::new().kind(TransactionKind::Redemption))
            .await?
            .len();
        let assignments = self
            .store
            .transactions(TransactionQuery::new().kind(TransactionKind::Assignment))
            .await?
            .len();
        Ok(Stats {
            customers,
            redemptions,
            assignments,
        })
    }
}

/// Picks the lowest `CL###` username not yet taken (gaps left by deleted
/// accounts are reused).
fn next_username(existing: &[User]) -> String {
    let used: HashSet<u32> = existing
        .iter()
        .filter_map(|user| {
            user.username
                .to_uppercase()
                .strip_prefix(USERNAME_PREFIX)
                .and_then(|digits| digits.parse::<u32>().ok())
        })
        .filter(|number| *number > 0)
        .collect();
    let mut next = 1_u32;
    while used.contains(&next) {
        next += 1;
    }
    format!("{USERNAME_PREFIX}{next:0width$}", width = USERNAME_DIGITS)
}

/// Generates a short random initial credential.
fn random_password() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(PASSWORD_LENGTH)
        .collect()
}
