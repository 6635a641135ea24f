//! Customer directory: ordered browsing and fan-out search.
//!
//! Reads the same store the ledger writes, but never mutates it. The
//! backing store only offers case-sensitive prefix-range scans, so the
//! case-insensitive search a receptionist expects is approximated by
//! fanning out one prefix query per case variant per field and merging
//! the results.

use std::collections::HashMap;

use futures::future::try_join_all;

use crate::error::Result;
use crate::models::{Role, User, UserId};
use crate::storage::{Cursor, Page, SearchField, SortDirection, SortField, Store, UserQuery};

/// Per-query result cap during the search fan-out.
const SEARCH_QUERY_LIMIT: usize = 10;

/// Fields the search fans out over.
const SEARCH_FIELDS: [SearchField; 3] = [
    SearchField::Username,
    SearchField::FirstName,
    SearchField::LastName,
];

/// Read-only directory over a shared store. Admin accounts are never
/// returned.
#[derive(Debug)]
pub struct Directory<'store, S: Store> {
    /// The backing document store.
    store: &'store S,
}

impl<'store, S: Store> Directory<'store, S> {
    /// Creates a directory over the given store.
    #[inline]
    #[must_use]
    pub const fn new(store: &'store S) -> Self {
        Self { store }
    }

    /// Returns one page of the customer listing, ordered by `sort` in
    /// `direction`. Pass the previous page's cursor back verbatim to
    /// fetch the next page; chained pages concatenate to the full
    /// ordered result set with no duplicates or omissions (writes that
    /// land before the cursor position may still be observed or missed,
    /// depending on store semantics). A zero `page_size` is treated as
    /// one, so every page makes progress.
    ///
    /// # Errors
    ///
    /// Returns a store error if the scan fails.
    #[tracing::instrument(skip_all, fields(page_size))]
    pub async fn list_page(
        &self,
        cursor: Option<Cursor>,
        page_size: usize,
        sort: SortField,
        direction: SortDirection,
    ) -> Result<Page> {
        let mut query = UserQuery::new()
            .order_by(sort)
            .direction(direction)
            .role(Role::Customer)
            .limit(page_size.max(1));
        if let Some(position) = cursor {
            query = query.start_after(position);
        }
        self.store.users(query).await
    }

    /// Searches customers by username, first name, or last name prefix,
    /// approximating case-insensitivity: the trimmed term is expanded
    /// into up to four case variants (as-is, lowercase, uppercase,
    /// capitalized) and every (variant, field) pair becomes one prefix
    /// query capped at ten results. The up-to-twelve queries run
    /// concurrently; the first failing sub-query aborts the search.
    /// Results are deduplicated by id; their order is not guaranteed.
    ///
    /// # Errors
    ///
    /// Returns a store error if any sub-query fails.
    #[tracing::instrument(skip_all)]
    pub async fn search(&self, term: &str) -> Result<Vec<User>> {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let variants = case_variants(trimmed);
        tracing::debug!(
            term = %trimmed,
            fan_out = variants.len() * SEARCH_FIELDS.len(),
            "searching customers"
        );

        let mut queries = Vec::with_capacity(variants.len() * SEARCH_FIELDS.len());
        for field in SEARCH_FIELDS {
            for variant in &variants {
                let query = UserQuery::new()
                    .prefix(field, variant.clone())
                    .role(Role::Customer)
                    .limit(SEARCH_QUERY_LIMIT);
                queries.push(self.store.users(query));
            }
        }

        let pages = try_join_all(queries).await?;
        let mut merged: HashMap<UserId, User> = HashMap::new();
        for page in pages {
            for user in page.users {
                let _previous = merged.insert(user.id.clone(), user);
            }
        }
        Ok(merged.into_values().collect())
    }
}

/// Expands a term into its distinct case variants: as-is, lowercase,
/// uppercase, and capitalized-first-letter.
fn case_variants(term: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::with_capacity(4);
    for candidate in [
        term.to_owned(),
        term.to_lowercase(),
        term.to_uppercase(),
        capitalize_first(term),
    ] {
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// Uppercases the first letter and lowercases the rest.
fn capitalize_first(term: &str) -> String {
    let mut chars = term.chars();
    chars.next().map_or_else(String::new, |first| {
        format!("{}{}", first.to_uppercase(), chars.as_str().to_lowercase())
    })
}
