use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::store::{SelectionStore, YearSource};
use crate::year::{AcademicYear, School};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Event for audit trail ("Every change is an event")
///
/// Recorded for selection changes, admin changes to the current year, and
/// blocked writes against read-only years.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Schools
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Academic Years
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years (
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0,
            is_archived INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Persisted selection (one row per school)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS year_selections (
            school_id TEXT PRIMARY KEY,
            year_id TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_years_school ON academic_years(school_id, start_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// SCHOOLS
// ============================================================================

pub fn insert_school(conn: &Connection, school: &School) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schools (id, code, name) VALUES (?1, ?2, ?3)",
        params![school.id, school.code, school.name],
    )
    .with_context(|| format!("Failed to insert school {}", school.id))?;

    Ok(())
}

pub fn get_schools(conn: &Connection) -> Result<Vec<School>> {
    let mut stmt = conn.prepare("SELECT id, code, name FROM schools ORDER BY code")?;

    let schools = stmt
        .query_map([], |row| {
            Ok(School {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(schools)
}

// ============================================================================
// ACADEMIC YEARS
// ============================================================================

pub fn insert_academic_year(conn: &Connection, year: &AcademicYear) -> Result<()> {
    conn.execute(
        "INSERT INTO academic_years (id, school_id, name, start_date, end_date, is_current, is_archived)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            year.id,
            year.school_id,
            year.name,
            year.start_date.format(DATE_FORMAT).to_string(),
            year.end_date.format(DATE_FORMAT).to_string(),
            year.is_current,
            year.is_archived,
        ],
    )
    .with_context(|| format!("Failed to insert academic year {}", year.name))?;

    Ok(())
}

/// A TEXT column whose contents do not parse
fn conversion_failure<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| conversion_failure(idx, e))
}

fn year_from_row(row: &Row) -> rusqlite::Result<AcademicYear> {
    Ok(AcademicYear {
        id: row.get(0)?,
        school_id: row.get(1)?,
        name: row.get(2)?,
        start_date: parse_date(row, 3)?,
        end_date: parse_date(row, 4)?,
        is_current: row.get(5)?,
        is_archived: row.get(6)?,
    })
}

/// All years of a school, most recent start first
pub fn get_academic_years(conn: &Connection, school_id: &str) -> Result<Vec<AcademicYear>> {
    let mut stmt = conn.prepare(
        "SELECT id, school_id, name, start_date, end_date, is_current, is_archived
         FROM academic_years
         WHERE school_id = ?1
         ORDER BY start_date DESC, id",
    )?;

    let years = stmt
        .query_map(params![school_id], year_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(years)
}

pub fn get_academic_year(conn: &Connection, year_id: &str) -> Result<Option<AcademicYear>> {
    let year = conn
        .query_row(
            "SELECT id, school_id, name, start_date, end_date, is_current, is_archived
             FROM academic_years WHERE id = ?1",
            params![year_id],
            year_from_row,
        )
        .optional()?;

    Ok(year)
}

/// Make `year_id` the one current year of its school
///
/// Clears every other current flag of the school in the same transaction.
/// Archived years cannot become current.
pub fn set_current_year(conn: &Connection, school_id: &str, year_id: &str) -> Result<()> {
    let year = get_academic_year(conn, year_id)?
        .with_context(|| format!("Academic year not found: {}", year_id))?;

    if year.school_id != school_id {
        bail!("Academic year {} does not belong to school {}", year_id, school_id);
    }
    if year.is_archived {
        bail!("Academic year {} is archived and cannot be made current", year.name);
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE academic_years SET is_current = 0 WHERE school_id = ?1 AND is_current = 1",
        params![school_id],
    )?;
    tx.execute(
        "UPDATE academic_years SET is_current = 1 WHERE id = ?1",
        params![year_id],
    )?;
    tx.commit()?;

    Ok(())
}

/// Close a year for edits; an archived year is never current
pub fn archive_year(conn: &Connection, year_id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE academic_years SET is_archived = 1, is_current = 0 WHERE id = ?1",
        params![year_id],
    )?;

    if updated == 0 {
        bail!("Academic year not found: {}", year_id);
    }

    Ok(())
}

// ============================================================================
// PERSISTED SELECTION
// ============================================================================

pub fn save_selection(conn: &Connection, school_id: &str, year_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO year_selections (school_id, year_id, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(school_id) DO UPDATE SET year_id = excluded.year_id, updated_at = excluded.updated_at",
        params![school_id, year_id, Utc::now().to_rfc3339()],
    )?;

    Ok(())
}

pub fn load_selection(conn: &Connection, school_id: &str) -> Result<Option<String>> {
    let year_id = conn
        .query_row(
            "SELECT year_id FROM year_selections WHERE school_id = ?1",
            params![school_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(year_id)
}

pub fn clear_selection(conn: &Connection, school_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM year_selections WHERE school_id = ?1",
        params![school_id],
    )?;

    Ok(())
}

// ============================================================================
// EVENTS
// ============================================================================

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, entity_type, entity_id, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            serde_json::to_string(&event.data)?,
            event.actor,
        ],
    )?;

    Ok(())
}

pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_str: String = row.get(5)?;

            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_failure(1, e))?;
            let data = serde_json::from_str(&data_str).map_err(|e| conversion_failure(5, e))?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SQLITE COLLABORATOR
// ============================================================================

/// SQLite-backed year source and selection store sharing one connection
#[derive(Clone)]
pub struct SqliteYearStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteYearStore {
    /// Open (and set up) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {:?}", path))?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteYearStore {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Lock the shared connection
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unavailable(err: anyhow::Error) -> StoreError {
    match err.downcast::<rusqlite::Error>() {
        Ok(sqlite) => StoreError::Sqlite(sqlite),
        Err(other) => StoreError::Unavailable(format!("{:#}", other)),
    }
}

impl YearSource for SqliteYearStore {
    fn fetch_years(
        &self,
        school_id: &str,
    ) -> impl Future<Output = Result<Vec<AcademicYear>, StoreError>> + Send {
        let conn = Arc::clone(&self.conn);
        let school_id = school_id.to_string();

        async move {
            tokio::task::spawn_blocking(move || {
                let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
                get_academic_years(&conn, &school_id).map_err(unavailable)
            })
            .await
            .map_err(|e| StoreError::Unavailable(format!("fetch task failed: {}", e)))?
        }
    }
}

impl SelectionStore for SqliteYearStore {
    fn load_selection(&self, school_id: &str) -> Result<Option<String>, StoreError> {
        load_selection(&self.conn(), school_id).map_err(unavailable)
    }

    fn save_selection(&self, school_id: &str, year_id: &str) -> Result<(), StoreError> {
        save_selection(&self.conn(), school_id, year_id).map_err(unavailable)
    }

    fn clear_selection(&self, school_id: &str) -> Result<(), StoreError> {
        clear_selection(&self.conn(), school_id).map_err(unavailable)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::year::fixtures::year;

    /// Helper: in-memory db with one school and two years (A past, B current)
    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        insert_school(&conn, &School::new("s1", "NHS", "North High School")).unwrap();
        insert_academic_year(&conn, &year("A", "s1", 2023)).unwrap();
        insert_academic_year(&conn, &year("B", "s1", 2024).current()).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_years_round_trip_most_recent_first() {
        let conn = seeded();
        insert_academic_year(&conn, &year("X", "s2", 2024).current()).unwrap();

        let years = get_academic_years(&conn, "s1").unwrap();

        assert_eq!(years.len(), 2);
        assert_eq!(years[0].id, "B");
        assert!(years[0].is_current);
        assert_eq!(years[1], year("A", "s1", 2023));
    }

    #[test]
    fn test_set_current_year_keeps_single_current() {
        let conn = seeded();

        set_current_year(&conn, "s1", "A").unwrap();

        let current: Vec<String> = get_academic_years(&conn, "s1")
            .unwrap()
            .into_iter()
            .filter(|y| y.is_current)
            .map(|y| y.id)
            .collect();
        assert_eq!(current, vec!["A".to_string()]);
    }

    #[test]
    fn test_set_current_year_rejects_archived_and_foreign_years() {
        let conn = seeded();
        archive_year(&conn, "A").unwrap();
        insert_academic_year(&conn, &year("X", "s2", 2024)).unwrap();

        assert!(set_current_year(&conn, "s1", "A").is_err());
        assert!(set_current_year(&conn, "s1", "X").is_err());
        assert!(set_current_year(&conn, "s1", "missing").is_err());

        // B is still current
        let b = get_academic_year(&conn, "B").unwrap().unwrap();
        assert!(b.is_current);
    }

    #[test]
    fn test_archive_clears_current_flag() {
        let conn = seeded();

        archive_year(&conn, "B").unwrap();

        let b = get_academic_year(&conn, "B").unwrap().unwrap();
        assert!(b.is_archived);
        assert!(!b.is_current);
        assert!(archive_year(&conn, "missing").is_err());
    }

    #[test]
    fn test_selection_persistence() {
        let conn = seeded();

        assert_eq!(load_selection(&conn, "s1").unwrap(), None);
        save_selection(&conn, "s1", "A").unwrap();
        save_selection(&conn, "s1", "B").unwrap();
        assert_eq!(load_selection(&conn, "s1").unwrap(), Some("B".to_string()));

        clear_selection(&conn, "s1").unwrap();
        assert_eq!(load_selection(&conn, "s1").unwrap(), None);
    }

    #[test]
    fn test_schools_listing() {
        let conn = seeded();
        insert_school(&conn, &School::new("s0", "AAA", "Alpha Academy")).unwrap();

        let schools = get_schools(&conn).unwrap();
        let codes: Vec<&str> = schools.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["AAA", "NHS"]);
    }

    #[test]
    fn test_event_log() {
        let conn = seeded();

        let event = Event::new(
            "year_selected",
            "school",
            "s1",
            serde_json::json!({"year_id": "A"}),
            "test_actor",
        );
        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "school", "s1").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "year_selected");
        assert_eq!(events[0].data["year_id"], "A");
        assert_eq!(events[0].actor, "test_actor");
    }

    #[test]
    fn test_event_log_rejects_corrupt_rows() {
        let conn = seeded();

        conn.execute(
            "INSERT INTO events (event_id, timestamp, event_type, entity_type, entity_id, data, actor)
             VALUES ('e1', 'garbage', 'read_only_violation', 'school', 's1', '{\"year_id\": \"A\"}', 'cli')",
            [],
        )
        .unwrap();
        assert!(get_events_for_entity(&conn, "school", "s1").is_err());

        conn.execute(
            "INSERT INTO events (event_id, timestamp, event_type, entity_type, entity_id, data, actor)
             VALUES ('e2', ?1, 'year_selected', 'school', 's2', '{not json', 'cli')",
            params![Utc::now().to_rfc3339()],
        )
        .unwrap();
        assert!(get_events_for_entity(&conn, "school", "s2").is_err());
    }

    #[tokio::test]
    async fn test_sqlite_store_implements_collaborator_seams() {
        let store = SqliteYearStore::from_connection(seeded());

        let years = store.fetch_years("s1").await.unwrap();
        assert_eq!(years.len(), 2);

        store.save_selection("s1", "A").unwrap();
        assert_eq!(store.load_selection("s1").unwrap(), Some("A".to_string()));
    }

    #[tokio::test]
    async fn test_session_over_sqlite() {
        use crate::session::YearSession;

        let store = SqliteYearStore::from_connection(seeded());
        let session = YearSession::new(store.clone(), store.clone());

        session.switch_school("s1").await;
        assert_eq!(session.selected_year().unwrap().id, "B");
        assert!(!session.is_read_only());

        session.set_selected_year_id("A").unwrap();
        assert!(session.is_read_only());
        assert_eq!(load_selection(&store.conn(), "s1").unwrap(), Some("A".to_string()));
    }
}
