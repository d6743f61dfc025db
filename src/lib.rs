// Academic Year Guard - Core Library
// Year selection per school plus the read-only guard for historical years.
// Exposes all modules for use in CLI, API server, and tests

pub mod year;
pub mod error;
pub mod store;
pub mod catalog;   // YearCatalog - year list + current year per school
pub mod selector;  // YearSelector - validated, persisted selection
pub mod guard;     // ReadOnlyGuard - derivation + assert_writable
pub mod session;   // YearSession - wires the three together
pub mod registry;  // SessionRegistry - one session per client
pub mod db;        // SQLite collaborator + audit events
pub mod config;

// Re-export commonly used types
pub use year::{AcademicYear, School};
pub use error::{
    ConfigurationError, FetchFailure, InvalidSelection, ReadOnlyViolation, StoreError,
    YearGuardError,
};
pub use store::{MemorySelectionStore, MemoryYearSource, SelectionStore, YearSource};
pub use catalog::{resolve_current_year, LoadOutcome, LoadTicket, YearCatalog};
pub use selector::{Reconciliation, YearSelector};
pub use guard::{GuardState, ReadOnlyGuard};
pub use session::{SelectionSnapshot, YearSession};
pub use registry::SessionRegistry;
pub use db::{
    Event, SqliteYearStore,
    setup_database, insert_school, get_schools, insert_academic_year, get_academic_years,
    get_academic_year, set_current_year, archive_year, insert_event, get_events_for_entity,
};
pub use config::{init_logging, Config};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
