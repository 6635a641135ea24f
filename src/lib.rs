//! Loyalty-points ledger library for a salon fidelity program.
//!
//! Customers earn points for services and redeem them for prizes; staff
//! assign, reverse, and bulk-assign points. The crate keeps each
//! customer's running balance consistent with an append-only
//! transaction history, grants a fixed catalog of one-time bonuses
//! idempotently, and offers cursor-paginated browsing plus fan-out
//! prefix search over the customer base — all on top of a pluggable
//! document [`storage::Store`] that only needs single-document
//! atomicity and prefix-range scans.
//!
//! # Example
//!
//! ```rust
//! use fidelity_rs::directory::Directory;
//! use fidelity_rs::ledger::Ledger;
//! use fidelity_rs::storage::InMemoryStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> fidelity_rs::error::Result<()> {
//! let store = InMemoryStore::new();
//! let ledger = Ledger::new(&store);
//! let directory = Directory::new(&store);
//!
//! let customer = ledger.create_customer().await?;
//! let (customer, _entry) = ledger
//!     .apply_delta(&customer.id, 20, "Taglio Uomo", Some("salone"))
//!     .await?;
//! assert_eq!(customer.points, 20);
//! assert_eq!(directory.search("CL0").await?.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod error;
pub mod ledger;
pub mod models;
pub mod storage;
