// Error taxonomy for year selection and the read-only guard
//
// FetchFailure and InvalidSelection are absorbed by the session (degrade, never crash).
// ReadOnlyViolation is always surfaced to the caller.

use serde::Serialize;
use thiserror::Error;

/// Catalog load failed; the catalog degrades to empty
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("failed to fetch academic years for school {school_id}: {reason}")]
pub struct FetchFailure {
    pub school_id: String,
    pub reason: String,
}

/// The "current year" flags for a school are inconsistent
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationError {
    #[error("school {school_id} has no academic year marked current")]
    NoCurrentYear { school_id: String },

    #[error("school {school_id} has {} academic years marked current", .year_ids.len())]
    MultipleCurrentYears {
        school_id: String,
        year_ids: Vec<String>,
    },

    #[error("current academic year {year_id} of school {school_id} is archived")]
    CurrentYearArchived { school_id: String, year_id: String },
}

/// Caller asked to select a year that is not in the active school's catalog
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("academic year {year_id} is not in the catalog of school {school_id:?}")]
pub struct InvalidSelection {
    pub school_id: Option<String>,
    pub year_id: String,
}

/// A year-scoped write was attempted while the selection is read-only
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct ReadOnlyViolation {
    /// Selected year id at the time of the attempt, if any
    pub year_id: Option<String>,
    /// User-facing explanation (the guard message)
    pub message: String,
}

/// Persistence collaborator failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Umbrella error for callers that want a single type
#[derive(Error, Debug)]
pub enum YearGuardError {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    InvalidSelection(#[from] InvalidSelection),

    #[error(transparent)]
    ReadOnly(#[from] ReadOnlyViolation),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl YearGuardError {
    /// True for the one error class that must reach the user untouched
    pub fn is_read_only_violation(&self) -> bool {
        matches!(self, YearGuardError::ReadOnly(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_messages() {
        let err = ConfigurationError::MultipleCurrentYears {
            school_id: "s1".to_string(),
            year_ids: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "school s1 has 2 academic years marked current");

        let err = ConfigurationError::NoCurrentYear { school_id: "s1".to_string() };
        assert!(err.to_string().contains("no academic year marked current"));
    }

    #[test]
    fn test_read_only_violation_displays_message() {
        let violation = ReadOnlyViolation {
            year_id: Some("y1".to_string()),
            message: "You are viewing 2023-2024.".to_string(),
        };
        let err: YearGuardError = violation.into();

        assert!(err.is_read_only_violation());
        assert_eq!(err.to_string(), "You are viewing 2023-2024.");
    }

    #[test]
    fn test_configuration_error_serializes_with_kind_tag() {
        let err = ConfigurationError::CurrentYearArchived {
            school_id: "s1".to_string(),
            year_id: "y1".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "current_year_archived");
        assert_eq!(json["year_id"], "y1");
    }
}
