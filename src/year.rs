// 📅 Academic Year Entity - Stable identity per school period
//
// "The year name is a VALUE (can be relabeled), the year UUID is IDENTITY (never changes)"
//
// Every year-scoped record (attendance, registrations, fees) is keyed by the
// year id, so historical data stays addressable after the current year moves on.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// SCHOOL
// ============================================================================

/// School - the tenant every academic year belongs to
///
/// Owned by the school-context collaborator; the guard only references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct School {
    /// Stable identity
    pub id: String,

    /// Short display code (e.g. "NHS")
    pub code: String,

    /// Display name
    pub name: String,
}

impl School {
    pub fn new(id: &str, code: &str, name: &str) -> Self {
        School {
            id: id.to_string(),
            code: code.to_string(),
            name: name.to_string(),
        }
    }
}

// ============================================================================
// ACADEMIC YEAR
// ============================================================================

/// AcademicYear - one school period
///
/// `is_current` and `is_archived` are independent flags. A school has at most one
/// current year; an archived year should never be current, but readers never assume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicYear {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    /// Owning school
    pub school_id: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    /// Display name (e.g. "2024-2025")
    pub name: String,

    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    /// Marked by administrators as the live, writable period
    #[serde(default)]
    pub is_current: bool,

    /// Explicitly closed for edits
    #[serde(default)]
    pub is_archived: bool,
}

impl AcademicYear {
    /// Create new academic year with UUID (neither current nor archived)
    pub fn new(school_id: &str, name: &str, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        AcademicYear {
            id: uuid::Uuid::new_v4().to_string(),
            school_id: school_id.to_string(),
            name: name.to_string(),
            start_date,
            end_date,
            is_current: false,
            is_archived: false,
        }
    }

    /// Builder-style: mark as current
    pub fn current(mut self) -> Self {
        self.is_current = true;
        self
    }

    /// Builder-style: mark as archived
    pub fn archived(mut self) -> Self {
        self.is_archived = true;
        self
    }

    /// Current and not archived: the only shape of year that can ever be written to
    pub fn is_writable_candidate(&self) -> bool {
        self.is_current && !self.is_archived
    }
}

/// Sort years the way the catalog exposes them: most recent start first, ties by id
pub fn sort_years(years: &mut [AcademicYear]) {
    years.sort_by(|a, b| b.start_date.cmp(&a.start_date).then_with(|| a.id.cmp(&b.id)));
}

// ============================================================================
// TESTS
// ============================================================================
