// 🎯 Year Selector - which academic year the session operates against
//
// Holds an identifier, never a year: the year itself is always looked up in
// the live catalog so stale or foreign ids cannot reach the guard.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::YearCatalog;
use crate::error::InvalidSelection;
use crate::store::SelectionStore;
use crate::year::AcademicYear;

/// How a reconciliation settled the selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconciliation {
    /// Previous (in-memory or persisted) choice still exists
    Kept(String),
    /// Previous choice missing; fell back to the current year
    FellBackToCurrent(String),
    /// Nothing usable; selection absent
    Cleared,
}

#[derive(Debug, Clone, Default)]
pub struct YearSelector {
    school_id: Option<String>,
    selected_year_id: Option<String>,
}

impl YearSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over for a newly active school; nothing carries over from the last one
    pub fn reset_for_school(&mut self, school_id: &str) {
        if let Some(previous) = self.school_id.as_deref() {
            if previous != school_id {
                debug!(from = previous, to = school_id, "discarding selection of previous school");
            }
        }
        self.school_id = Some(school_id.to_string());
        self.selected_year_id = None;
    }

    /// Forget everything (session end)
    pub fn clear(&mut self) {
        self.school_id = None;
        self.selected_year_id = None;
    }

    pub fn school_id(&self) -> Option<&str> {
        self.school_id.as_deref()
    }

    pub fn selected_year_id(&self) -> Option<&str> {
        self.selected_year_id.as_deref()
    }

    /// Resolve the selected id against the catalog
    pub fn selected_year<'a>(&self, catalog: &'a YearCatalog) -> Option<&'a AcademicYear> {
        if !self.matches_catalog(catalog) {
            return None;
        }
        self.selected_year_id.as_deref().and_then(|id| catalog.get(id))
    }

    /// Accept `year_id` only if the active school's catalog contains it
    ///
    /// Rejections leave the selection untouched.
    pub fn set_selected_year_id<S: SelectionStore>(
        &mut self,
        catalog: &YearCatalog,
        store: &S,
        year_id: &str,
    ) -> Result<(), InvalidSelection> {
        let school_id = match self.school_id.clone() {
            Some(id) if self.matches_catalog(catalog) && catalog.contains(year_id) => id,
            _ => {
                debug!(
                    school_id = self.school_id.as_deref().unwrap_or("-"),
                    year_id,
                    "rejecting academic year not in catalog"
                );
                return Err(InvalidSelection {
                    school_id: self.school_id.clone(),
                    year_id: year_id.to_string(),
                });
            }
        };

        self.select(store, &school_id, year_id);
        info!(school_id = %school_id, year_id, "academic year selected");
        Ok(())
    }

    /// Jump to the catalog's current year, if there is one
    pub fn select_current_year<S: SelectionStore>(
        &mut self,
        catalog: &YearCatalog,
        store: &S,
    ) -> Option<String> {
        let current_id = catalog.current_year()?.id.clone();
        self.set_selected_year_id(catalog, store, &current_id).ok()?;
        Some(current_id)
    }

    /// Settle the selection after the catalog changed
    ///
    /// previous choice (in memory, else persisted) if still present → current year → absent
    pub fn reconcile<S: SelectionStore>(
        &mut self,
        catalog: &YearCatalog,
        store: &S,
    ) -> Reconciliation {
        let Some(school_id) = self.school_id.clone() else {
            self.selected_year_id = None;
            return Reconciliation::Cleared;
        };

        if !self.matches_catalog(catalog) {
            self.selected_year_id = None;
            return Reconciliation::Cleared;
        }

        let candidate = self
            .selected_year_id
            .clone()
            .or_else(|| self.persisted(store, &school_id));

        let mut vanished = false;
        if let Some(id) = candidate {
            if catalog.contains(&id) {
                self.selected_year_id = Some(id.clone());
                return Reconciliation::Kept(id);
            }
            debug!(school_id = %school_id, year_id = %id, "previous academic year no longer in catalog");
            vanished = true;
        }

        match catalog.current_year() {
            Some(current) => {
                let id = current.id.clone();
                self.select(store, &school_id, &id);
                info!(school_id = %school_id, year_id = %id, "falling back to current academic year");
                Reconciliation::FellBackToCurrent(id)
            }
            None => {
                self.selected_year_id = None;
                // A failed fetch says nothing about whether the year still exists
                if vanished && catalog.last_failure().is_none() {
                    self.forget(store, &school_id);
                }
                Reconciliation::Cleared
            }
        }
    }

    fn matches_catalog(&self, catalog: &YearCatalog) -> bool {
        self.school_id.is_some() && self.school_id.as_deref() == catalog.school_id()
    }

    fn select<S: SelectionStore>(&mut self, store: &S, school_id: &str, year_id: &str) {
        self.selected_year_id = Some(year_id.to_string());

        if let Err(err) = store.save_selection(school_id, year_id) {
            warn!(school_id, year_id, error = %err, "failed to persist academic year selection");
        }
    }

    fn forget<S: SelectionStore>(&self, store: &S, school_id: &str) {
        match store.clear_selection(school_id) {
            Ok(()) => debug!(school_id, "cleared persisted academic year selection"),
            Err(err) => {
                warn!(school_id, error = %err, "failed to clear persisted academic year selection")
            }
        }
    }

    fn persisted<S: SelectionStore>(&self, store: &S, school_id: &str) -> Option<String> {
        match store.load_selection(school_id) {
            Ok(id) => id,
            Err(err) => {
                warn!(school_id, error = %err, "failed to read persisted academic year selection");
                None
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
