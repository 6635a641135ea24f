//! Data models for the loyalty program.
//!
//! This module contains strongly-typed representations of every entity
//! the ledger touches, newtype ID wrappers, and enumeration types for
//! constrained values.

mod bonus;
mod enums;
mod ids;
mod transaction;
mod user;

pub use bonus::Bonus;
pub use enums::{Role, TransactionKind};
pub use ids::{BonusId, TransactionId, UserId};
pub use transaction::Transaction;
pub use user::User;
