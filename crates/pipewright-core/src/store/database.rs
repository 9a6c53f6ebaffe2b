//! SQLite experiment log sink.
//!
//! Each record opens its own connection, so the sink holds no connection
//! state and is safe to share across threads.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{LogKind, LogRecord, TransitionRecord};
use crate::store::schema;
use crate::store::LogSink;

// ---------------------------------------------------------------------------
// Helper: tilde expansion
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if raw.len() > 2 {
                expanded.push(&raw[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

// ---------------------------------------------------------------------------
// SqliteLogSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SqliteLogSink {
    db_path: PathBuf,
}

impl SqliteLogSink {
    /// Open (creating if needed) the database at `db_path` and migrate it.
    pub fn new(db_path: impl AsRef<Path>) -> PipelineResult<Self> {
        let expanded = expand_tilde(db_path.as_ref());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let sink = Self { db_path: resolved };
        let conn = sink.connect()?;
        schema::initialize(&conn)?;
        Ok(sink)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> PipelineResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn count(&self, kind: LogKind) -> PipelineResult<u64> {
        let conn = self.connect()?;
        let sql = format!("SELECT COUNT(*) FROM {};", schema::table_for(kind));
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Every record of `kind` in insertion order, decoded from the payload column.
    pub fn records(&self, kind: LogKind) -> PipelineResult<Vec<LogRecord>> {
        let conn = self.connect()?;
        let sql = format!("SELECT payload FROM {} ORDER BY id;", schema::table_for(kind));
        let mut stmt = conn.prepare(&sql)?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(PipelineError::from))
            .collect()
    }

    /// Transition history for one experiment, ordered by insertion.
    pub fn transitions(&self, experiment_id: &str) -> PipelineResult<Vec<TransitionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM transition_logs WHERE experiment_id = ?1 ORDER BY id;",
        )?;
        let payloads = stmt
            .query_map(params![experiment_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(payloads.len());
        for payload in payloads {
            if let LogRecord::StateTransition(t) = serde_json::from_str(&payload)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    fn insert(conn: &Connection, record: &LogRecord, payload: &str) -> PipelineResult<()> {
        let ts = record.timestamp().to_rfc3339();
        match record {
            LogRecord::State(r) => conn.execute(
                "INSERT INTO state_logs(experiment_id, run_id, round, state, action, score, timestamp, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![r.experiment_id, r.run_id, r.round, r.state.as_str(), r.action, r.score, ts, payload],
            )?,
            LogRecord::StateTransition(r) => conn.execute(
                "INSERT INTO transition_logs(experiment_id, run_id, round, from_state, to_state, reason, timestamp, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    r.experiment_id,
                    r.run_id,
                    r.round,
                    r.from_state.as_str(),
                    r.to_state.as_str(),
                    r.reason,
                    ts,
                    payload
                ],
            )?,
            LogRecord::Error(r) => conn.execute(
                "INSERT INTO error_logs(experiment_id, run_id, round, error_type, file_path, symbol, timestamp, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![r.experiment_id, r.run_id, r.round, r.error_type, r.file_path, r.symbol, ts, payload],
            )?,
            LogRecord::Evaluation(r) => conn.execute(
                "INSERT INTO evaluation_logs(experiment_id, run_id, round, symbol, is_final, score, passed, timestamp, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
                params![
                    r.experiment_id,
                    r.run_id,
                    r.round,
                    r.symbol,
                    r.is_final,
                    r.score,
                    r.passed,
                    ts,
                    payload
                ],
            )?,
            LogRecord::Experiment(r) => conn.execute(
                "INSERT INTO experiment_logs(experiment_id, run_id, symbol, rounds, final_score, reason_for_stop, timestamp, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    r.experiment_id,
                    r.run_id,
                    r.symbol,
                    r.rounds,
                    r.final_score,
                    r.reason_for_stop,
                    ts,
                    payload
                ],
            )?,
        };
        Ok(())
    }
}

impl LogSink for SqliteLogSink {
    fn record(&self, record: &LogRecord) -> PipelineResult<()> {
        let payload = serde_json::to_string(record)?;
        let conn = self.connect()?;
        Self::insert(&conn, record, &payload)
    }
}
