//! One-time bonus ("first steps" action) model.

use serde::{Deserialize, Serialize};

use super::BonusId;

/// Number of entries in the default bonus catalog.
const DEFAULT_CATALOG_SIZE: u32 = 10;

/// Points granted per slot in the default catalog (slot n grants n times
/// this value).
const POINTS_PER_SLOT: i64 = 10;

/// A fixed catalog entry granting points once per user.
///
/// The catalog is created at provisioning time; entries are editable in
/// place but never deleted or re-numbered, so `slot` is a stable ordinal
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bonus {
    /// Unique identifier.
    pub id: BonusId,
    /// Display name, e.g. "Primi Passi 3".
    pub name: String,
    /// Free-text description shown to the customer.
    pub description: String,
    /// Points granted when completed.
    pub points: i64,
    /// Stable ordinal position (1-based).
    pub slot: u32,
}

impl Bonus {
    /// Builds the fixed ten-entry "Primi Passi" catalog written at first
    /// provisioning: slot `n` grants `10 * n` points.
    #[must_use]
    pub fn default_catalog() -> Vec<Self> {
        (1..=DEFAULT_CATALOG_SIZE)
            .map(|slot| Self {
                id: BonusId::random(),
                name: format!("Primi Passi {slot}"),
                description: format!("Descrizione per l'azione {slot}."),
                points: POINTS_PER_SLOT * i64::from(slot),
                slot,
            })
            .collect()
    }
}
