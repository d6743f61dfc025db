// 📚 Year Catalog - authoritative year list for the active school
//
// A load is split into two synchronous halves around the async fetch:
//   begin_load(school)  → LoadTicket   (registers the request as the latest)
//   complete(ticket, …) → LoadOutcome  (applies only if the ticket is still the latest)
//
// Any response whose ticket has been superseded is discarded (stale-response suppression).

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ConfigurationError, FetchFailure, StoreError};
use crate::year::{sort_years, AcademicYear};

// ============================================================================
// CURRENT YEAR RESOLUTION
// ============================================================================

/// Pick the single current year out of a school's rows
///
/// - empty list: no current year, no error (a legitimate empty state)
/// - zero marked current: none + `NoCurrentYear`
/// - several marked current: none + `MultipleCurrentYears` (never guess)
/// - one marked current but archived: that year + `CurrentYearArchived`
pub fn resolve_current_year<'a>(
    school_id: &str,
    years: &'a [AcademicYear],
) -> (Option<&'a AcademicYear>, Option<ConfigurationError>) {
    if years.is_empty() {
        return (None, None);
    }

    let marked: Vec<&AcademicYear> = years.iter().filter(|y| y.is_current).collect();

    match marked.as_slice() {
        [] => (
            None,
            Some(ConfigurationError::NoCurrentYear {
                school_id: school_id.to_string(),
            }),
        ),
        [only] if only.is_archived => (
            Some(*only),
            Some(ConfigurationError::CurrentYearArchived {
                school_id: school_id.to_string(),
                year_id: only.id.clone(),
            }),
        ),
        [only] => (Some(*only), None),
        many => (
            None,
            Some(ConfigurationError::MultipleCurrentYears {
                school_id: school_id.to_string(),
                year_ids: many.iter().map(|y| y.id.clone()).collect(),
            }),
        ),
    }
}

// ============================================================================
// LOAD TICKET / OUTCOME
// ============================================================================

/// Identifies one issued load; only the latest ticket may update the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    school_id: String,
    generation: u64,
}

impl LoadTicket {
    pub fn school_id(&self) -> &str {
        &self.school_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What happened to a completed fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Rows replaced the catalog
    Applied {
        year_count: usize,
        configuration_error: Option<ConfigurationError>,
    },
    /// Fetch failed; catalog is now empty
    Failed(FetchFailure),
    /// A newer load superseded this one; result discarded
    Stale,
}

impl LoadOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, LoadOutcome::Applied { .. })
    }
}

// ============================================================================
// YEAR CATALOG
// ============================================================================

#[derive(Debug, Default)]
pub struct YearCatalog {
    school_id: Option<String>,
    /// Most recent first
    years: Vec<AcademicYear>,
    current_year_id: Option<String>,
    configuration_error: Option<ConfigurationError>,
    last_failure: Option<FetchFailure>,
    /// Generation of the latest issued ticket
    generation: u64,
    /// Generation still awaiting its response
    pending: Option<u64>,
}

impl YearCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a load for `school_id` as the only authoritative one
    ///
    /// Switching to a different school empties the catalog immediately so readers
    /// never see one school's years attributed to another.
    pub fn begin_load(&mut self, school_id: &str) -> LoadTicket {
        self.generation += 1;
        self.pending = Some(self.generation);

        if self.school_id.as_deref() != Some(school_id) {
            self.clear();
            self.school_id = Some(school_id.to_string());
        }

        debug!(school_id, generation = self.generation, "academic year load issued");

        LoadTicket {
            school_id: school_id.to_string(),
            generation: self.generation,
        }
    }

    /// Apply a fetch result if its ticket is still the latest
    pub fn complete(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<AcademicYear>, StoreError>,
    ) -> LoadOutcome {
        if ticket.generation != self.generation
            || self.school_id.as_deref() != Some(ticket.school_id.as_str())
        {
            debug!(
                school_id = %ticket.school_id,
                generation = ticket.generation,
                latest = self.generation,
                "discarding stale academic year response"
            );
            return LoadOutcome::Stale;
        }

        self.pending = None;

        match result {
            Ok(rows) => self.apply(&ticket.school_id, rows),
            Err(err) => {
                let failure = FetchFailure {
                    school_id: ticket.school_id.clone(),
                    reason: err.to_string(),
                };
                warn!(school_id = %ticket.school_id, error = %err, "academic year fetch failed");

                self.clear();
                self.last_failure = Some(failure.clone());
                LoadOutcome::Failed(failure)
            }
        }
    }

    /// Withdraw interest in any outstanding load and forget the school
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.pending = None;
        self.clear();
        self.school_id = None;
    }

    fn apply(&mut self, school_id: &str, rows: Vec<AcademicYear>) -> LoadOutcome {
        let total = rows.len();
        let mut years: Vec<AcademicYear> =
            rows.into_iter().filter(|y| y.school_id == school_id).collect();

        if years.len() != total {
            warn!(
                school_id,
                dropped = total - years.len(),
                "dropping academic year rows owned by another school"
            );
        }

        sort_years(&mut years);

        let (current, configuration_error) = resolve_current_year(school_id, &years);
        let current_year_id = current.map(|y| y.id.clone());

        if let Some(err) = &configuration_error {
            warn!(school_id, error = %err, "academic year configuration error");
        }

        // Replace as a whole
        self.years = years;
        self.current_year_id = current_year_id;
        self.configuration_error = configuration_error.clone();
        self.last_failure = None;

        debug!(school_id, year_count = self.years.len(), "academic year catalog replaced");

        LoadOutcome::Applied {
            year_count: self.years.len(),
            configuration_error,
        }
    }

    fn clear(&mut self) {
        self.years.clear();
        self.current_year_id = None;
        self.configuration_error = None;
        self.last_failure = None;
    }

    // ========================================================================
    // READ ACCESSORS
    // ========================================================================

    pub fn school_id(&self) -> Option<&str> {
        self.school_id.as_deref()
    }

    pub fn years(&self) -> &[AcademicYear] {
        &self.years
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn get(&self, year_id: &str) -> Option<&AcademicYear> {
        self.years.iter().find(|y| y.id == year_id)
    }

    pub fn contains(&self, year_id: &str) -> bool {
        self.get(year_id).is_some()
    }

    pub fn current_year(&self) -> Option<&AcademicYear> {
        self.current_year_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn configuration_error(&self) -> Option<&ConfigurationError> {
        self.configuration_error.as_ref()
    }

    pub fn last_failure(&self) -> Option<&FetchFailure> {
        self.last_failure.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::year::fixtures::year;

    fn loaded(school_id: &str, rows: Vec<AcademicYear>) -> YearCatalog {
        let mut catalog = YearCatalog::new();
        let ticket = catalog.begin_load(school_id);
        catalog.complete(ticket, Ok(rows));
        catalog
    }

    #[test]
    fn test_current_year_is_unique_or_absent() {
        let lists = vec![
            vec![],
            vec![year("a", "s", 2023)],
            vec![year("a", "s", 2023), year("b", "s", 2024).current()],
            vec![year("a", "s", 2023).current(), year("b", "s", 2024).current()],
            vec![year("a", "s", 2023).current().archived()],
            vec![
                year("a", "s", 2022).current(),
                year("b", "s", 2023).current(),
                year("c", "s", 2024).current(),
            ],
        ];

        for years in lists {
            let (current, _) = resolve_current_year("s", &years);
            let marked = years.iter().filter(|y| y.is_current).count();
            match current {
                Some(c) => {
                    assert_eq!(marked, 1);
                    assert!(c.is_current);
                }
                None => assert_ne!(marked, 1),
            }
        }
    }

    #[test]
    fn test_resolve_empty_catalog_is_not_a_configuration_error() {
        let (current, err) = resolve_current_year("s", &[]);
        assert!(current.is_none());
        assert!(err.is_none());
    }

    #[test]
    fn test_resolve_no_current_year() {
        let years = vec![year("a", "s", 2023), year("b", "s", 2024)];
        let (current, err) = resolve_current_year("s", &years);

        assert!(current.is_none());
        assert_eq!(
            err,
            Some(ConfigurationError::NoCurrentYear { school_id: "s".to_string() })
        );
    }

    #[test]
    fn test_multiple_current_years_picks_none() {
        let catalog = loaded(
            "s",
            vec![
                year("a", "s", 2023).archived(),
                year("b", "s", 2024).current(),
                year("c", "s", 2025).current(),
            ],
        );

        assert!(catalog.current_year().is_none());
        match catalog.configuration_error() {
            Some(ConfigurationError::MultipleCurrentYears { year_ids, .. }) => {
                assert_eq!(year_ids.len(), 2);
                assert!(year_ids.contains(&"b".to_string()));
                assert!(year_ids.contains(&"c".to_string()));
            }
            other => panic!("expected MultipleCurrentYears, got {:?}", other),
        }
    }

    #[test]
    fn test_archived_current_year_is_flagged() {
        let catalog = loaded("s", vec![year("a", "s", 2024).current().archived()]);

        assert_eq!(catalog.current_year().map(|y| y.id.as_str()), Some("a"));
        assert!(matches!(
            catalog.configuration_error(),
            Some(ConfigurationError::CurrentYearArchived { .. })
        ));
    }

    #[test]
    fn test_load_sorts_most_recent_first() {
        let catalog = loaded(
            "s",
            vec![year("a", "s", 2022), year("c", "s", 2024).current(), year("b", "s", 2023)],
        );

        let ids: Vec<&str> = catalog.years().iter().map(|y| y.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(catalog.current_year().unwrap().id, "c");
        assert!(!catalog.is_loading());
    }

    #[test]
    fn test_rows_from_other_schools_are_dropped() {
        let catalog = loaded(
            "s1",
            vec![year("a", "s1", 2024).current(), year("x", "s2", 2024).current()],
        );

        assert_eq!(catalog.years().len(), 1);
        assert!(catalog.contains("a"));
        assert!(!catalog.contains("x"));
        assert!(catalog.configuration_error().is_none());
    }

    #[test]
    fn test_fetch_failure_degrades_to_empty() {
        let mut catalog = loaded("s", vec![year("a", "s", 2024).current()]);
        assert!(!catalog.is_empty());

        let ticket = catalog.begin_load("s");
        let outcome = catalog.complete(ticket, Err(StoreError::Unavailable("offline".to_string())));

        match outcome {
            LoadOutcome::Failed(failure) => {
                assert_eq!(failure.school_id, "s");
                assert!(failure.reason.contains("offline"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(catalog.is_empty());
        assert!(catalog.current_year().is_none());
        assert!(catalog.last_failure().is_some());
    }

    #[test]
    fn test_stale_response_from_previous_school_is_discarded() {
        let mut catalog = YearCatalog::new();

        let first = catalog.begin_load("s1");
        let second = catalog.begin_load("s2");
        assert!(catalog.is_loading());

        let applied = catalog.complete(second, Ok(vec![year("b", "s2", 2024).current()]));
        assert!(applied.is_applied());

        let stale = catalog.complete(first, Ok(vec![year("a", "s1", 2024).current()]));
        assert_eq!(stale, LoadOutcome::Stale);

        assert_eq!(catalog.school_id(), Some("s2"));
        assert!(catalog.contains("b"));
        assert!(!catalog.contains("a"));
    }

    #[test]
    fn test_stale_response_arriving_before_latest_is_discarded() {
        let mut catalog = YearCatalog::new();

        let first = catalog.begin_load("s1");
        let second = catalog.begin_load("s2");

        // Old response lands first: must not populate the catalog
        let stale = catalog.complete(first, Ok(vec![year("a", "s1", 2024).current()]));
        assert_eq!(stale, LoadOutcome::Stale);
        assert!(catalog.is_empty());
        assert!(catalog.is_loading());

        catalog.complete(second, Ok(vec![year("b", "s2", 2024).current()]));
        assert!(catalog.contains("b"));
        assert!(!catalog.is_loading());
    }

    #[test]
    fn test_superseded_refresh_of_same_school_is_discarded() {
        let mut catalog = YearCatalog::new();

        let old = catalog.begin_load("s");
        let new = catalog.begin_load("s");

        catalog.complete(new, Ok(vec![year("fresh", "s", 2024).current()]));
        assert_eq!(catalog.complete(old, Ok(vec![year("old", "s", 2023)])), LoadOutcome::Stale);

        assert!(catalog.contains("fresh"));
        assert!(!catalog.contains("old"));
    }

    #[test]
    fn test_stale_failure_does_not_clear_catalog() {
        let mut catalog = YearCatalog::new();

        let old = catalog.begin_load("s");
        let new = catalog.begin_load("s");
        catalog.complete(new, Ok(vec![year("a", "s", 2024).current()]));

        let outcome = catalog.complete(old, Err(StoreError::Unavailable("timeout".to_string())));
        assert_eq!(outcome, LoadOutcome::Stale);
        assert!(catalog.contains("a"));
        assert!(catalog.last_failure().is_none());
    }

    #[test]
    fn test_cancel_discards_in_flight_load() {
        let mut catalog = YearCatalog::new();

        let ticket = catalog.begin_load("s");
        catalog.cancel();

        assert_eq!(catalog.complete(ticket, Ok(vec![year("a", "s", 2024)])), LoadOutcome::Stale);
        assert!(catalog.school_id().is_none());
        assert!(catalog.is_empty());
        assert!(!catalog.is_loading());
    }

    #[test]
    fn test_switching_school_clears_previous_years_immediately() {
        let mut catalog = loaded("s1", vec![year("a", "s1", 2024).current()]);

        let _ticket = catalog.begin_load("s2");

        assert_eq!(catalog.school_id(), Some("s2"));
        assert!(catalog.is_empty());
        assert!(catalog.current_year().is_none());
    }

    #[test]
    fn test_refresh_same_school_keeps_years_visible_while_loading() {
        let mut catalog = loaded("s", vec![year("a", "s", 2024).current()]);

        let _ticket = catalog.begin_load("s");

        assert!(catalog.is_loading());
        assert!(catalog.contains("a"));
    }
}
