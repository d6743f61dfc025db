// 🧭 Year Session - explicit store object for one user session
//
// Data flow:
//   switch_school → YearCatalog loads → YearSelector reconciles → ReadOnlyGuard recomputes
//
// Every change publishes one whole SelectionSnapshot on a watch channel, so the
// selected year and its read-only flag are always observed together.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::catalog::{LoadOutcome, LoadTicket, YearCatalog};
use crate::error::{
    ConfigurationError, FetchFailure, InvalidSelection, ReadOnlyViolation, StoreError,
};
use crate::guard::{GuardState, ReadOnlyGuard, NO_SELECTION_MESSAGE};
use crate::selector::YearSelector;
use crate::store::{SelectionStore, YearSource};
use crate::year::AcademicYear;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Everything a UI surface or mutation collaborator reads, captured at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionSnapshot {
    pub school_id: Option<String>,
    /// Most recent first
    pub years: Vec<AcademicYear>,
    pub current_year: Option<AcademicYear>,
    pub selected_year_id: Option<String>,
    pub selected_year: Option<AcademicYear>,
    pub state: GuardState,
    pub is_read_only: bool,
    /// Present only while read-only
    pub guard_message: Option<String>,
    pub configuration_error: Option<ConfigurationError>,
    pub last_failure: Option<FetchFailure>,
    pub is_loading: bool,
}

impl SelectionSnapshot {
    fn capture(catalog: &YearCatalog, selector: &YearSelector, guard: &ReadOnlyGuard) -> Self {
        let selected_year = selector.selected_year(catalog).cloned();

        SelectionSnapshot {
            school_id: selector.school_id().map(str::to_string),
            years: catalog.years().to_vec(),
            current_year: catalog.current_year().cloned(),
            selected_year_id: selected_year.as_ref().map(|y| y.id.clone()),
            selected_year,
            state: guard.state(),
            is_read_only: guard.is_read_only(),
            guard_message: guard.guard_message().map(str::to_string),
            configuration_error: catalog.configuration_error().cloned(),
            last_failure: catalog.last_failure().cloned(),
            is_loading: catalog.is_loading(),
        }
    }

    /// Snapshot of a session with no active school
    pub fn empty() -> Self {
        Self::capture(&YearCatalog::new(), &YearSelector::new(), &ReadOnlyGuard::unselected())
    }
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Default)]
struct SessionState {
    catalog: YearCatalog,
    selector: YearSelector,
    guard: ReadOnlyGuard,
}

/// Academic-year selection and read-only guard for one session
///
/// Owns its state exclusively; collaborators get it by reference.
pub struct YearSession<S, P> {
    source: S,
    store: P,
    state: RwLock<SessionState>,
    snapshots: watch::Sender<SelectionSnapshot>,
}

impl<S: YearSource, P: SelectionStore> YearSession<S, P> {
    pub fn new(source: S, store: P) -> Self {
        let (snapshots, _) = watch::channel(SelectionSnapshot::empty());

        YearSession {
            source,
            store,
            state: RwLock::new(SessionState::default()),
            snapshots,
        }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    // ========================================================================
    // CATALOG LOADING (async)
    // ========================================================================

    /// Make `school_id` the active school and load its years
    ///
    /// The previous school's selection is discarded. Any load still in flight
    /// for another school is superseded and its result will be dropped.
    pub async fn switch_school(&self, school_id: &str) -> LoadOutcome {
        let ticket = self.begin_switch(school_id);
        self.run_load(ticket).await
    }

    /// Reload the active school's years; `None` when no school is active
    pub async fn refresh(&self) -> Option<LoadOutcome> {
        let ticket = self.begin_refresh()?;
        Some(self.run_load(ticket).await)
    }

    async fn run_load(&self, ticket: LoadTicket) -> LoadOutcome {
        let result = self.source.fetch_years(ticket.school_id()).await;
        self.finish_load(ticket, result)
    }

    fn begin_switch(&self, school_id: &str) -> LoadTicket {
        let mut guard = self.write_state();
        let state = &mut *guard;

        info!(school_id, "switching active school");
        state.selector.reset_for_school(school_id);
        let ticket = state.catalog.begin_load(school_id);
        self.publish(state);
        ticket
    }

    fn begin_refresh(&self) -> Option<LoadTicket> {
        let mut guard = self.write_state();
        let state = &mut *guard;

        let school_id = state.selector.school_id()?.to_string();
        let ticket = state.catalog.begin_load(&school_id);
        self.publish(state);
        Some(ticket)
    }

    fn finish_load(
        &self,
        ticket: LoadTicket,
        result: Result<Vec<AcademicYear>, StoreError>,
    ) -> LoadOutcome {
        let mut guard = self.write_state();
        let state = &mut *guard;

        let outcome = state.catalog.complete(ticket, result);
        if outcome != LoadOutcome::Stale {
            let reconciliation = state.selector.reconcile(&state.catalog, &self.store);
            debug!(?reconciliation, "selection reconciled against catalog");
            self.publish(state);
        }
        outcome
    }

    // ========================================================================
    // SELECTION (sync)
    // ========================================================================

    /// Select a year of the active school; unknown ids are rejected, selection unchanged
    pub fn set_selected_year_id(&self, year_id: &str) -> Result<(), InvalidSelection> {
        let mut guard = self.write_state();
        let state = &mut *guard;

        state
            .selector
            .set_selected_year_id(&state.catalog, &self.store, year_id)?;
        self.publish(state);
        Ok(())
    }

    /// Switch back to the live year; returns its id, or `None` if the school has none
    pub fn select_current_year(&self) -> Option<String> {
        let mut guard = self.write_state();
        let state = &mut *guard;

        let selected = state.selector.select_current_year(&state.catalog, &self.store)?;
        self.publish(state);
        Some(selected)
    }

    /// Drop all selection state and cancel interest in outstanding loads
    pub fn end_session(&self) {
        let mut guard = self.write_state();
        let state = &mut *guard;

        state.catalog.cancel();
        state.selector.clear();
        self.publish(state);
        info!("academic year session ended");
    }

    // ========================================================================
    // ENFORCEMENT
    // ========================================================================

    /// Call immediately before any year-scoped write; abort the write on error
    pub fn assert_writable(&self) -> Result<(), ReadOnlyViolation> {
        self.read_state().guard.assert_writable()
    }

    /// The selected year, if and only if it may be written to
    pub fn writable_year(&self) -> Result<AcademicYear, ReadOnlyViolation> {
        let state = self.read_state();
        state.guard.assert_writable()?;

        // Active guard implies a resolved selection; check anyway
        state
            .selector
            .selected_year(&state.catalog)
            .cloned()
            .ok_or_else(|| ReadOnlyViolation {
                year_id: None,
                message: NO_SELECTION_MESSAGE.to_string(),
            })
    }

    /// Run `write` against the selected year only if it is writable
    ///
    /// On violation `write` never runs, so nothing is partially applied.
    pub fn guard_write<T, E, F>(&self, write: F) -> Result<T, E>
    where
        F: FnOnce(&AcademicYear) -> Result<T, E>,
        E: From<ReadOnlyViolation>,
    {
        let year = self.writable_year()?;
        write(&year)
    }

    // ========================================================================
    // READ ACCESSORS
    // ========================================================================

    /// Latest consistent snapshot
    pub fn snapshot(&self) -> SelectionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receive every future snapshot
    pub fn subscribe(&self) -> watch::Receiver<SelectionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn years(&self) -> Vec<AcademicYear> {
        self.snapshots.borrow().years.clone()
    }

    pub fn current_year(&self) -> Option<AcademicYear> {
        self.snapshots.borrow().current_year.clone()
    }

    pub fn selected_year(&self) -> Option<AcademicYear> {
        self.snapshots.borrow().selected_year.clone()
    }

    pub fn is_read_only(&self) -> bool {
        self.snapshots.borrow().is_read_only
    }

    pub fn guard_message(&self) -> Option<String> {
        self.snapshots.borrow().guard_message.clone()
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Recompute the guard and publish; caller holds the write lock
    fn publish(&self, state: &mut SessionState) {
        let next = ReadOnlyGuard::evaluate(
            state.selector.selected_year(&state.catalog),
            state.catalog.current_year(),
        );

        if next.state() != state.guard.state() {
            info!(
                from = state.guard.state().as_str(),
                to = next.state().as_str(),
                school_id = state.selector.school_id().unwrap_or("-"),
                "academic year guard state changed"
            );
        }
        state.guard = next;

        let snapshot = SelectionSnapshot::capture(&state.catalog, &state.selector, &state.guard);
        self.snapshots.send_replace(snapshot);
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// TESTS
// ============================================================================
