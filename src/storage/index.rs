//! SQLite index over the session logs.
//!
//! Derived data only: every row can be reconstructed by replaying the JSONL
//! logs, so losing or deleting the index file is harmless.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, params};

use crate::session::SessionStatus;
use crate::storage::StorageError;
use crate::storage::jsonl::{OutcomeLine, SessionHeader};

/// One row of the `sessions` table, as shown by `hone list`.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub goal: String,
    pub status: SessionStatus,
    pub iterations: u32,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// Queryable index of known sessions.
///
/// `rusqlite::Connection` isn't Sync, so the connection sits behind a `Mutex`.
/// Writes happen at most once per iteration, so contention is not a concern.
pub struct SessionIndex {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SessionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIndex").finish_non_exhaustive()
    }
}

impl SessionIndex {
    /// Open (or create) the index database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY,
                goal        TEXT NOT NULL,
                status      TEXT NOT NULL,
                iterations  INTEGER NOT NULL,
                started_at  INTEGER NOT NULL,
                finished_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|e| StorageError::Lock(e.to_string()))
    }

    /// Register a session as running. Replaces any existing row with the
    /// same id, which makes index rebuilds idempotent.
    pub fn upsert(&self, header: &SessionHeader) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (id, goal, status, iterations, started_at, finished_at)
             VALUES (?1, ?2, 'running', 0, ?3, NULL)",
            params![header.session_id, header.goal, header.started_at],
        )?;
        Ok(())
    }

    /// Advance the iteration count for a running session.
    pub fn bump(&self, session_id: &str, iteration: u32) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sessions SET iterations = ?2 WHERE id = ?1",
            params![session_id, iteration],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Mark a session terminated.
    pub fn set_outcome(&self, session_id: &str, outcome: &OutcomeLine) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sessions SET status = ?2, iterations = ?3, finished_at = ?4 WHERE id = ?1",
            params![
                session_id,
                outcome.status.as_str(),
                outcome.iterations_used,
                outcome.finished_at
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Look up one session, or None if the index has no such row.
    pub fn get(&self, session_id: &str) -> Result<Option<SessionSummary>, StorageError> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT id, goal, status, iterations, started_at, finished_at
             FROM sessions WHERE id = ?1",
            params![session_id],
            row_to_summary,
        );
        match result {
            Ok(summary) => Ok(Some(summary)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All known sessions, newest first.
    pub fn list(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, goal, status, iterations, started_at, finished_at
             FROM sessions ORDER BY started_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], row_to_summary)?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Drop every row. Used before a rebuild from the JSONL logs.
    pub fn clear(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM sessions", [])?;
        Ok(())
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionSummary> {
    let status_text: String = row.get(2)?;
    Ok(SessionSummary {
        id: row.get(0)?,
        goal: row.get(1)?,
        // Only as_str() values ever land in this column; anything else means
        // the file was edited by hand, and Running is the safe reading.
        status: status_text.parse().unwrap_or(SessionStatus::Running),
        iterations: row.get(3)?,
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
    })
}
