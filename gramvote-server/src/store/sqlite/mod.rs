//! SQLite implementation of the election store.
//!
//! # Schema versioning
//!
//! The database has a `schema_version` table tracking the schema version.
//! When the schema changes, increment `CURRENT_SCHEMA_VERSION` and add a
//! migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Concurrency
//!
//! Synchronous rusqlite operations run inside
//! `tokio::task::spawn_blocking` so they never block the async runtime.
//! Correctness under concurrent writers comes from the schema (partial
//! unique indexes on live nominations and candidacies, a unique vote per
//! member) and from conditional updates inside each transaction, not
//! from assuming a single engine instance.

mod elections;
mod nominations;
mod tally;


use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::StoreError;
use crate::error::EngineError;
use crate::model::{
    AdminId, AssemblyId, CandidateId, Election, ElectionEvent, ElectionId, ElectionStatus,
    EventId, EventWindows, MemberId, Nomination, NominationId, NominationProfile, ReviewStatus,
    WardId,
};

/// Current schema version. Increment when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Datetimes are persisted as naive local text in this format, which
/// compares correctly both in SQL and lexicographically.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Counts of elections moved into each status by one transition pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusAdvance {
    pub nomination_open: usize,
    pub ready_for_poll: usize,
    pub active: usize,
    pub completed: usize,
}

impl StatusAdvance {
    pub fn total(&self) -> usize {
        self.nomination_open + self.ready_for_poll + self.active + self.completed
    }
}

/// SQLite-backed election store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and run any
    /// pending migrations.
    ///
    /// The database is configured with `journal_mode = WAL` (verified,
    /// since some filesystems silently keep DELETE mode),
    /// `synchronous = FULL`, and a busy timeout for concurrent access.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();

        let path_str = path_ref.to_string_lossy();
        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        let is_in_memory = path_str == ":memory:";
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new in-memory store (for tests).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS election_events (
                    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    assembly_id INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    nomination_start TEXT NOT NULL,
                    nomination_end TEXT NOT NULL,
                    voting_start TEXT NOT NULL,
                    voting_end TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS elections (
                    election_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_id INTEGER NOT NULL
                        REFERENCES election_events(event_id) ON DELETE CASCADE,
                    ward_id INTEGER NOT NULL,
                    admin_id INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'DRAFT',
                    total_votes INTEGER NOT NULL DEFAULT 0,
                    result_calculated INTEGER NOT NULL DEFAULT 0,
                    winner_percentage REAL NOT NULL DEFAULT 0,
                    result_published INTEGER NOT NULL DEFAULT 0,
                    result_published_at TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_elections_event
                    ON elections(event_id);
                CREATE INDEX IF NOT EXISTS idx_elections_uncalculated
                    ON elections(status, result_calculated)
                    WHERE result_calculated = 0;

                CREATE TABLE IF NOT EXISTS members (
                    member_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    is_eligible INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS candidates (
                    candidate_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    election_id INTEGER NOT NULL
                        REFERENCES elections(election_id) ON DELETE CASCADE,
                    member_id INTEGER NOT NULL
                        REFERENCES members(member_id),
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    vote_count INTEGER NOT NULL DEFAULT 0,
                    is_winner INTEGER NOT NULL DEFAULT 0,
                    nominated_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_candidates_live
                    ON candidates(election_id, member_id)
                    WHERE status != 'REJECTED';

                CREATE TABLE IF NOT EXISTS nominations (
                    nomination_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    election_id INTEGER NOT NULL
                        REFERENCES elections(election_id) ON DELETE CASCADE,
                    member_id INTEGER NOT NULL
                        REFERENCES members(member_id),
                    candidate_id INTEGER
                        REFERENCES candidates(candidate_id),
                    bio TEXT,
                    profile_photo_url TEXT,
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    rejection_reason TEXT,
                    approval_notes TEXT,
                    reviewed_by INTEGER,
                    reviewed_at TEXT,
                    applied_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_nominations_live
                    ON nominations(election_id, member_id)
                    WHERE status != 'REJECTED';

                CREATE TABLE IF NOT EXISTS votes (
                    vote_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    election_id INTEGER NOT NULL
                        REFERENCES elections(election_id),
                    member_id INTEGER NOT NULL
                        REFERENCES members(member_id),
                    candidate_id INTEGER NOT NULL
                        REFERENCES candidates(candidate_id),
                    voted_at TEXT NOT NULL,
                    UNIQUE (election_id, member_id)
                );

                CREATE INDEX IF NOT EXISTS idx_votes_election
                    ON votes(election_id);

                CREATE TABLE IF NOT EXISTS notifications (
                    notification_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    admin_id INTEGER,
                    election_id INTEGER
                        REFERENCES elections(election_id) ON DELETE CASCADE,
                    assembly_id INTEGER,
                    kind TEXT NOT NULL,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_notifications_election
                    ON notifications(election_id, kind);
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Run a closure against the connection on the blocking pool.
    pub(crate) async fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, EngineError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            f(&mut conn)
        })
        .await
        .map_err(|e| EngineError::Store(StoreError::storage(operation, e.to_string())))?
    }

    // =========================================================================
    // Point reads shared by the engine and the HTTP surface
    // =========================================================================

    pub async fn get_event(&self, event_id: EventId) -> Result<Option<ElectionEvent>, EngineError> {
        self.call("get_event", move |conn| {
            conn.query_row(
                "SELECT event_id, assembly_id, title, nomination_start, nomination_end,
                        voting_start, voting_end, created_at
                 FROM election_events WHERE event_id = ?1",
                params![event_id.0],
                event_from_row,
            )
            .optional()
            .map_err(|e| StoreError::storage("get_event", e.to_string()).into())
        })
        .await
    }

    pub async fn get_election(
        &self,
        election_id: ElectionId,
    ) -> Result<Option<Election>, EngineError> {
        self.call("get_election", move |conn| {
            conn.query_row(
                &format!("{} WHERE election_id = ?1", SELECT_ELECTION),
                params![election_id.0],
                election_from_row,
            )
            .optional()
            .map_err(|e| StoreError::storage("get_election", e.to_string()).into())
        })
        .await
    }

    pub async fn get_nomination(
        &self,
        nomination_id: NominationId,
    ) -> Result<Option<Nomination>, EngineError> {
        self.call("get_nomination", move |conn| {
            conn.query_row(
                &format!("{} WHERE nomination_id = ?1", SELECT_NOMINATION),
                params![nomination_id.0],
                nomination_from_row,
            )
            .optional()
            .map_err(|e| StoreError::storage("get_nomination", e.to_string()).into())
        })
        .await
    }

    /// Register a member. Member management proper lives outside this
    /// service; the engine only needs enough of a record to check
    /// eligibility when a nomination is filed.
    pub async fn add_member(
        &self,
        name: String,
        is_active: bool,
        is_eligible: bool,
    ) -> Result<MemberId, EngineError> {
        self.call("add_member", move |conn| {
            conn.execute(
                "INSERT INTO members (name, is_active, is_eligible) VALUES (?1, ?2, ?3)",
                params![name, is_active, is_eligible],
            )
            .map_err(|e| StoreError::storage("add_member", e.to_string()))?;
            Ok(MemberId(conn.last_insert_rowid()))
        })
        .await
    }
}

// =============================================================================
// Row mapping and value conversion helpers
// =============================================================================

pub(crate) const SELECT_ELECTION: &str = "SELECT election_id, event_id, ward_id, admin_id, title, status, total_votes,
        result_calculated, winner_percentage, result_published, result_published_at, created_at
 FROM elections";

pub(crate) const SELECT_NOMINATION: &str = "SELECT nomination_id, election_id, member_id, candidate_id, bio, profile_photo_url,
        status, rejection_reason, approval_notes, reviewed_by, reviewed_at, applied_at
 FROM nominations";

pub(crate) fn fmt_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub(crate) fn parse_datetime(
    s: &str,
    what: &'static str,
) -> Result<NaiveDateTime, rusqlite::Error> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(StoreError::corruption(what)),
        )
    })
}

pub(crate) fn parse_election_status(s: &str) -> Result<ElectionStatus, rusqlite::Error> {
    s.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(StoreError::corruption("election status")),
        )
    })
}

pub(crate) fn parse_review_status(s: &str) -> Result<ReviewStatus, rusqlite::Error> {
    s.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(StoreError::corruption("review status")),
        )
    })
}

pub(crate) fn event_from_row(row: &Row<'_>) -> Result<ElectionEvent, rusqlite::Error> {
    Ok(ElectionEvent {
        event_id: EventId(row.get(0)?),
        assembly_id: AssemblyId(row.get(1)?),
        title: row.get(2)?,
        windows: EventWindows {
            nomination_start: parse_datetime(&row.get::<_, String>(3)?, "nomination_start")?,
            nomination_end: parse_datetime(&row.get::<_, String>(4)?, "nomination_end")?,
            voting_start: parse_datetime(&row.get::<_, String>(5)?, "voting_start")?,
            voting_end: parse_datetime(&row.get::<_, String>(6)?, "voting_end")?,
        },
        created_at: parse_datetime(&row.get::<_, String>(7)?, "created_at")?,
    })
}

pub(crate) fn election_from_row(row: &Row<'_>) -> Result<Election, rusqlite::Error> {
    Ok(Election {
        election_id: ElectionId(row.get(0)?),
        event_id: EventId(row.get(1)?),
        ward_id: WardId(row.get(2)?),
        admin_id: AdminId(row.get(3)?),
        title: row.get(4)?,
        status: parse_election_status(&row.get::<_, String>(5)?)?,
        total_votes: row.get::<_, i64>(6)?.max(0) as u64,
        result_calculated: row.get(7)?,
        winner_percentage: row.get(8)?,
        result_published: row.get(9)?,
        result_published_at: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_datetime(&s, "result_published_at"))
            .transpose()?,
        created_at: parse_datetime(&row.get::<_, String>(11)?, "created_at")?,
    })
}

pub(crate) fn nomination_from_row(row: &Row<'_>) -> Result<Nomination, rusqlite::Error> {
    Ok(Nomination {
        nomination_id: NominationId(row.get(0)?),
        election_id: ElectionId(row.get(1)?),
        member_id: MemberId(row.get(2)?),
        candidate_id: row.get::<_, Option<i64>>(3)?.map(CandidateId),
        profile: NominationProfile {
            bio: row.get(4)?,
            profile_photo_url: row.get(5)?,
        },
        status: parse_review_status(&row.get::<_, String>(6)?)?,
        rejection_reason: row.get(7)?,
        approval_notes: row.get(8)?,
        reviewed_by: row.get::<_, Option<i64>>(9)?.map(AdminId),
        reviewed_at: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_datetime(&s, "reviewed_at"))
            .transpose()?,
        applied_at: parse_datetime(&row.get::<_, String>(11)?, "applied_at")?,
    })
}

/// True when a SQLite error is a uniqueness/constraint violation, i.e.
/// a concurrent writer already inserted the conflicting row.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
