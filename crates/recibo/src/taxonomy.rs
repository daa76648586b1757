//! Closed expense category taxonomy.
//!
//! Categories are immutable reference data: a stable snake_case id used in
//! config files and database rows, plus a human-readable display name. The
//! enum is the single source of truth; config loading and model-output
//! validation both resolve against it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryId {
    Advertising,
    CarTruck,
    OfficeExpenses,
    Travel,
    Meals,
    Utilities,
    TaxesLicenses,
    Supplies,
    Other,
}

impl CategoryId {
    pub const ALL: [CategoryId; 9] = [
        CategoryId::Advertising,
        CategoryId::CarTruck,
        CategoryId::OfficeExpenses,
        CategoryId::Travel,
        CategoryId::Meals,
        CategoryId::Utilities,
        CategoryId::TaxesLicenses,
        CategoryId::Supplies,
        CategoryId::Other,
    ];

    /// Stable id, as stored in config files and database rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryId::Advertising => "advertising",
            CategoryId::CarTruck => "car_truck",
            CategoryId::OfficeExpenses => "office_expenses",
            CategoryId::Travel => "travel",
            CategoryId::Meals => "meals",
            CategoryId::Utilities => "utilities",
            CategoryId::TaxesLicenses => "taxes_licenses",
            CategoryId::Supplies => "supplies",
            CategoryId::Other => "other",
        }
    }

    /// Human-readable name shown to users.
    pub fn name(&self) -> &'static str {
        match self {
            CategoryId::Advertising => "Advertising",
            CategoryId::CarTruck => "Car and Truck Expenses",
            CategoryId::OfficeExpenses => "Office Expenses",
            CategoryId::Travel => "Travel",
            CategoryId::Meals => "Meals",
            CategoryId::Utilities => "Utilities",
            CategoryId::TaxesLicenses => "Taxes and Licenses",
            CategoryId::Supplies => "Supplies",
            CategoryId::Other => "Other",
        }
    }

    /// Resolves a stable id back to a category.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == id)
    }

    /// Case-insensitive lookup by stable id or display name.
    ///
    /// Used to validate category names coming back from the model
    /// collaborator; anything that does not resolve is rejected as
    /// `unknown_category` rather than accepted verbatim.
    pub fn from_name_or_id(s: &str) -> Option<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL.iter().copied().find(|c| {
            c.as_str() == wanted || c.name().to_lowercase() == wanted
        })
    }
}

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_roundtrip() {
        for category in CategoryId::ALL {
            assert_eq!(CategoryId::from_id(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_from_name_or_id_accepts_display_names() {
        assert_eq!(
            CategoryId::from_name_or_id("Car and Truck Expenses"),
            Some(CategoryId::CarTruck)
        );
        assert_eq!(
            CategoryId::from_name_or_id("taxes_licenses"),
            Some(CategoryId::TaxesLicenses)
        );
    }

    #[test]
    fn test_from_name_or_id_is_case_insensitive() {
        assert_eq!(
            CategoryId::from_name_or_id("TRAVEL"),
            Some(CategoryId::Travel)
        );
        assert_eq!(
            CategoryId::from_name_or_id("  office expenses "),
            Some(CategoryId::OfficeExpenses)
        );
    }

    #[test]
    fn test_unknown_name_rejected() {
        assert_eq!(CategoryId::from_name_or_id("NotARealCategory"), None);
        assert_eq!(CategoryId::from_id(""), None);
    }

    #[test]
    fn test_serde_uses_stable_ids() {
        let json = serde_json::to_string(&CategoryId::CarTruck).unwrap();
        assert_eq!(json, "\"car_truck\"");
        let back: CategoryId = serde_json::from_str("\"supplies\"").unwrap();
        assert_eq!(back, CategoryId::Supplies);
    }
}
