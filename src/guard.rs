// 🔒 Read-Only Guard - historical years can be viewed, never written
//
// Pure derivation from (selected year, current year). No I/O.
//
// A year is writable only when it is unambiguously the live period:
// selected, equal to the resolved current year, and not archived.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ReadOnlyViolation;
use crate::year::AcademicYear;

pub const NO_SELECTION_MESSAGE: &str =
    "No academic year selected. Data is read-only until a year is chosen.";

/// Where the session sits in Unselected → Active ⇄ Historical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    /// No catalog entries or nothing selected yet
    Unselected,
    /// Selected year is the live year
    Active,
    /// Selected year is past, archived, or the school has no usable current year
    Historical,
}

impl GuardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardState::Unselected => "Unselected",
            GuardState::Active => "Active",
            GuardState::Historical => "Historical",
        }
    }
}

/// Core rule
pub fn is_read_only(selected: Option<&AcademicYear>, current: Option<&AcademicYear>) -> bool {
    match (selected, current) {
        (Some(selected), Some(current)) => {
            selected.id != current.id || !selected.is_writable_candidate()
        }
        _ => true,
    }
}

/// Message shown for a historical selection; always names the year
pub fn historical_message(year: &AcademicYear) -> String {
    format!(
        "You are viewing {}. This year is locked (historical, read-only data). \
         Switch to the current year to make changes.",
        year.name
    )
}

// ============================================================================
// READ-ONLY GUARD
// ============================================================================

/// Evaluated guard for one (selection, current year) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOnlyGuard {
    state: GuardState,
    selected_year_id: Option<String>,
    guard_message: Option<String>,
}

impl ReadOnlyGuard {
    pub fn evaluate(selected: Option<&AcademicYear>, current: Option<&AcademicYear>) -> Self {
        let read_only = is_read_only(selected, current);

        let state = match selected {
            None => GuardState::Unselected,
            Some(_) if read_only => GuardState::Historical,
            Some(_) => GuardState::Active,
        };

        let guard_message = match (read_only, selected) {
            (false, _) => None,
            (true, Some(year)) => Some(historical_message(year)),
            (true, None) => Some(NO_SELECTION_MESSAGE.to_string()),
        };

        ReadOnlyGuard {
            state,
            selected_year_id: selected.map(|y| y.id.clone()),
            guard_message,
        }
    }

    /// Guard for a session with nothing selected
    pub fn unselected() -> Self {
        Self::evaluate(None, None)
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.state != GuardState::Active
    }

    /// Present only while read-only
    pub fn guard_message(&self) -> Option<&str> {
        self.guard_message.as_deref()
    }

    /// Must be called immediately before any year-scoped write
    pub fn assert_writable(&self) -> Result<(), ReadOnlyViolation> {
        if !self.is_read_only() {
            return Ok(());
        }

        let message = self
            .guard_message
            .clone()
            .unwrap_or_else(|| NO_SELECTION_MESSAGE.to_string());

        warn!(
            year_id = self.selected_year_id.as_deref().unwrap_or("-"),
            state = self.state.as_str(),
            "blocked write against read-only academic year"
        );

        Err(ReadOnlyViolation {
            year_id: self.selected_year_id.clone(),
            message,
        })
    }

    /// Boolean form of `assert_writable` for callers that only need to bail out
    pub fn guard_mutation(&self) -> bool {
        self.assert_writable().is_ok()
    }
}

impl Default for ReadOnlyGuard {
    fn default() -> Self {
        Self::unselected()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::year::fixtures::year;

    #[test]
    fn test_selecting_current_year_is_writable() {
        let current = year("b", "s", 2024).current();
        let guard = ReadOnlyGuard::evaluate(Some(&current), Some(&current));

        assert_eq!(guard.state(), GuardState::Active);
        assert!(!guard.is_read_only());
        assert!(guard.guard_message().is_none());
        assert!(guard.assert_writable().is_ok());
        assert!(guard.guard_mutation());
    }

    #[test]
    fn test_selecting_other_year_is_read_only() {
        let past = year("a", "s", 2023);
        let current = year("b", "s", 2024).current();
        let guard = ReadOnlyGuard::evaluate(Some(&past), Some(&current));

        assert_eq!(guard.state(), GuardState::Historical);
        assert!(guard.is_read_only());
        assert!(guard.guard_message().unwrap().contains("2023-2024"));
        assert!(guard.guard_message().unwrap().contains("read-only"));
    }

    #[test]
    fn test_archived_year_is_read_only_even_if_marked_current() {
        let mislabeled = year("a", "s", 2024).current().archived();
        let guard = ReadOnlyGuard::evaluate(Some(&mislabeled), Some(&mislabeled));

        assert!(guard.is_read_only());
        assert_eq!(guard.state(), GuardState::Historical);
    }

    #[test]
    fn test_matching_id_without_current_flag_is_read_only() {
        let unflagged = year("b", "s", 2024);
        let current = year("b", "s", 2024).current();

        assert!(is_read_only(Some(&unflagged), Some(&current)));
        assert!(!is_read_only(Some(&current), Some(&current)));
    }

    #[test]
    fn test_no_current_year_makes_every_selection_read_only() {
        let a = year("a", "s", 2023);
        let b = year("b", "s", 2024).current();

        assert!(is_read_only(Some(&a), None));
        assert!(is_read_only(Some(&b), None));
    }

    #[test]
    fn test_no_selection_is_read_only_and_unselected() {
        let current = year("b", "s", 2024).current();
        let guard = ReadOnlyGuard::evaluate(None, Some(&current));

        assert_eq!(guard.state(), GuardState::Unselected);
        assert!(guard.is_read_only());
        assert_eq!(guard.guard_message(), Some(NO_SELECTION_MESSAGE));
    }

    #[test]
    fn test_assert_writable_fails_iff_read_only() {
        let past = year("a", "s", 2023);
        let archived = year("x", "s", 2021).archived();
        let current = year("b", "s", 2024).current();

        let cases = vec![
            (None, Some(&current)),
            (Some(&past), Some(&current)),
            (Some(&archived), Some(&current)),
            (Some(&current), Some(&current)),
            (Some(&current), None),
            (None, None),
        ];

        for (selected, cur) in cases {
            let guard = ReadOnlyGuard::evaluate(selected, cur);
            assert_eq!(guard.assert_writable().is_err(), guard.is_read_only());
        }
    }

    #[test]
    fn test_violation_carries_year_and_message() {
        let past = year("a", "s", 2023);
        let current = year("b", "s", 2024).current();
        let guard = ReadOnlyGuard::evaluate(Some(&past), Some(&current));

        let violation = guard.assert_writable().unwrap_err();
        assert_eq!(violation.year_id.as_deref(), Some("a"));
        assert_eq!(Some(violation.message.as_str()), guard.guard_message());
    }

    #[test]
    fn test_default_guard_is_unselected() {
        let guard = ReadOnlyGuard::default();
        assert_eq!(guard.state(), GuardState::Unselected);
        assert!(!guard.guard_mutation());
    }
}
