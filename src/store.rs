// Collaborator seams
//
// YearSource: row-level fetch of academic years (the data-access collaborator)
// SelectionStore: durable per-school selection (the storage collaborator)
//
// The session is generic over both, so the guard runs against SQLite in the
// binaries and against these in-memory versions in tests and demos.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::StoreError;
use crate::year::AcademicYear;

// ============================================================================
// TRAITS
// ============================================================================

/// Fetches every academic year row belonging to a school
pub trait YearSource: Send + Sync {
    fn fetch_years(
        &self,
        school_id: &str,
    ) -> impl Future<Output = Result<Vec<AcademicYear>, StoreError>> + Send;
}

/// Session-durable storage of the selected year id, keyed by school id
pub trait SelectionStore: Send + Sync {
    fn load_selection(&self, school_id: &str) -> Result<Option<String>, StoreError>;

    fn save_selection(&self, school_id: &str, year_id: &str) -> Result<(), StoreError>;

    fn clear_selection(&self, school_id: &str) -> Result<(), StoreError>;
}

// ============================================================================
// IN-MEMORY YEAR SOURCE
// ============================================================================

/// Year source backed by a map; clones share the same data
#[derive(Clone, Default)]
pub struct MemoryYearSource {
    years: Arc<RwLock<HashMap<String, Vec<AcademicYear>>>>,
    failing: Arc<RwLock<HashSet<String>>>,
}

impl MemoryYearSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all rows stored for a school
    pub fn set_years(&self, school_id: &str, years: Vec<AcademicYear>) {
        let mut map = self.years.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(school_id.to_string(), years);
    }

    /// Make every fetch for `school_id` fail until `recover` is called
    pub fn fail(&self, school_id: &str) {
        let mut failing = self.failing.write().unwrap_or_else(PoisonError::into_inner);
        failing.insert(school_id.to_string());
    }

    pub fn recover(&self, school_id: &str) {
        let mut failing = self.failing.write().unwrap_or_else(PoisonError::into_inner);
        failing.remove(school_id);
    }

    fn lookup(&self, school_id: &str) -> Result<Vec<AcademicYear>, StoreError> {
        let failing = self.failing.read().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(school_id) {
            return Err(StoreError::Unavailable(format!(
                "academic_years unavailable for {}",
                school_id
            )));
        }

        let map = self.years.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(school_id).cloned().unwrap_or_default())
    }
}

impl YearSource for MemoryYearSource {
    fn fetch_years(
        &self,
        school_id: &str,
    ) -> impl Future<Output = Result<Vec<AcademicYear>, StoreError>> + Send {
        let result = self.lookup(school_id);
        async move { result }
    }
}

// ============================================================================
// IN-MEMORY SELECTION STORE
// ============================================================================

/// Selection store backed by a map; clones share the same data
#[derive(Clone, Default)]
pub struct MemorySelectionStore {
    selections: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySelectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStore for MemorySelectionStore {
    fn load_selection(&self, school_id: &str) -> Result<Option<String>, StoreError> {
        let map = self.selections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(school_id).cloned())
    }

    fn save_selection(&self, school_id: &str, year_id: &str) -> Result<(), StoreError> {
        let mut map = self.selections.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(school_id.to_string(), year_id.to_string());
        Ok(())
    }

    fn clear_selection(&self, school_id: &str) -> Result<(), StoreError> {
        let mut map = self.selections.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(school_id);
        Ok(())
    }
}
