//! SQLite schema for the experiment log store.
//!
//! One table per log record kind. Each row keeps the indexed columns the
//! reports filter on plus the full record as a JSON `payload`.
//!
//! The schema is an ordered list of [`Migration`]s. The applied version lives
//! in SQLite's `user_version` header field, and every applied step leaves a
//! row in `schema_migrations`. Each step runs in its own transaction, so the
//! version, the DDL, and the history row commit together or not at all.

use rusqlite::Connection;
use tracing::{info, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::models::LogKind;

/// Version reached once every entry of [`MIGRATIONS`] has been applied.
pub const SCHEMA_VERSION: i32 = 2;

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// v1: one table per log kind.
const LOG_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS state_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        experiment_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        round INTEGER NOT NULL,
        state TEXT NOT NULL,
        action TEXT NOT NULL,
        score REAL,
        timestamp TEXT NOT NULL,
        payload TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS transition_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        experiment_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        round INTEGER NOT NULL,
        from_state TEXT NOT NULL,
        to_state TEXT NOT NULL,
        reason TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        payload TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS error_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        experiment_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        round INTEGER NOT NULL,
        error_type TEXT NOT NULL,
        file_path TEXT NOT NULL,
        symbol TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        payload TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS evaluation_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        experiment_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        round INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        is_final INTEGER NOT NULL,
        score REAL NOT NULL,
        passed INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        payload TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS experiment_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        experiment_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        symbol TEXT NOT NULL,
        rounds INTEGER NOT NULL,
        final_score REAL,
        reason_for_stop TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        payload TEXT NOT NULL
    );",
];

/// v2: lookup indexes for per-experiment reports.
const LOOKUP_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_state_logs_exp_round ON state_logs(experiment_id, round);",
    "CREATE INDEX IF NOT EXISTS idx_transition_logs_exp_round ON transition_logs(experiment_id, round);",
    "CREATE INDEX IF NOT EXISTS idx_error_logs_exp_type ON error_logs(experiment_id, error_type);",
    "CREATE INDEX IF NOT EXISTS idx_evaluation_logs_symbol ON evaluation_logs(symbol, is_final);",
    "CREATE INDEX IF NOT EXISTS idx_experiment_logs_exp ON experiment_logs(experiment_id, symbol);",
];

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "log tables",
        statements: LOG_TABLES,
    },
    Migration {
        version: 2,
        description: "lookup indexes",
        statements: LOOKUP_INDEXES,
    },
];

const HISTORY_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);";

/// Table holding records of `kind`.
pub fn table_for(kind: LogKind) -> &'static str {
    match kind {
        LogKind::State => "state_logs",
        LogKind::StateTransition => "transition_logs",
        LogKind::Error => "error_logs",
        LogKind::Evaluation => "evaluation_logs",
        LogKind::Experiment => "experiment_logs",
    }
}

/// Bring the database to [`SCHEMA_VERSION`], applying pending migrations in order.
pub fn initialize(conn: &Connection) -> PipelineResult<()> {
    conn.execute_batch(HISTORY_TABLE)?;
    let current = get_schema_version(conn);
    if current > SCHEMA_VERSION {
        return Err(PipelineError::Config(format!(
            "log store schema v{current} is newer than supported v{SCHEMA_VERSION}"
        )));
    }
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        if let Err(e) = apply(conn, migration) {
            warn!(
                "Log store migration to v{} ({}) failed: {}",
                migration.version, migration.description, e
            );
            return Err(e);
        }
        info!(
            "Log store migrated to v{} ({})",
            migration.version, migration.description
        );
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> PipelineResult<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in migration.statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_migrations(version, description) VALUES (?1, ?2);",
        rusqlite::params![migration.version, migration.description],
    )?;
    tx.pragma_update(None, "user_version", migration.version)?;
    tx.commit()?;
    Ok(())
}

/// Applied schema version; 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn migrations_are_contiguous_and_end_at_current_version() {
        let versions: Vec<i32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert_eq!(versions, (1..=SCHEMA_VERSION).collect::<Vec<_>>());
        assert_eq!(LOG_TABLES.len(), LogKind::ALL.len());
        assert_eq!(LOOKUP_INDEXES.len(), 5);
    }

    #[test]
    fn migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn), 0);
        initialize(&conn).unwrap();

        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM schema_migrations;"), 2);
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%';"
            ),
            5
        );
    }

    #[test]
    fn migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();

        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM schema_migrations;"), 2);
    }

    #[test]
    fn v1_database_only_gains_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(HISTORY_TABLE).unwrap();
        apply(&conn, &MIGRATIONS[0]).unwrap();
        conn.execute(
            "INSERT INTO state_logs(experiment_id, run_id, round, state, action, timestamp, payload) \
             VALUES ('exp', 'round-1-a', 1, 'START', 'enter', 'now', '{}');",
            [],
        )
        .unwrap();
        assert_eq!(get_schema_version(&conn), 1);

        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM state_logs;"), 1);
        let described: String = conn
            .query_row(
                "SELECT description FROM schema_migrations WHERE version = 2;",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(described, "lookup indexes");
    }

    #[test]
    fn failed_step_leaves_version_unchanged() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(HISTORY_TABLE).unwrap();
        let broken = Migration {
            version: 1,
            description: "broken",
            statements: &["CREATE TABLE ok_table (id INTEGER);", "CREATE TABLE (;"],
        };
        assert!(apply(&conn, &broken).is_err());
        assert_eq!(get_schema_version(&conn), 0);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE name = 'ok_table';"),
            0
        );
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM schema_migrations;"), 0);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(initialize(&conn), Err(PipelineError::Config(_))));
    }

    #[test]
    fn every_kind_has_a_table() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        for kind in LogKind::ALL {
            let sql = format!("SELECT COUNT(*) FROM {};", table_for(kind));
            assert_eq!(count(&conn, &sql), 0);
        }
    }
}
