//! Persistence for hone sessions.
//!
//! Two layers back the `hone list` / `show` / `report` commands:
//!
//! - append-only JSONL logs, one file per session, under `<data_dir>/sessions/`
//! - a SQLite index at `<data_dir>/index.db` for listing without replaying logs
//!
//! The logs are authoritative. `SessionStore::rebuild_index` reconstructs the
//! index from them, so a stale or deleted `index.db` never loses a session.

pub mod index;
pub mod jsonl;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::session::ActionRecord;

pub use index::{SessionIndex, SessionSummary};
pub use jsonl::{LogLine, OutcomeLine, PersistedSession, SessionHeader, read_session};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error reading or writing a session log
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite index error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Index lock poisoned by a panicking writer
    #[error("Storage lock poisoned: {0}")]
    Lock(String),

    /// No session with this id on disk
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A session log line that does not parse
    #[error("Corrupt session log {path} (line {line}): {message}")]
    Corrupt {
        path: String,
        line: usize,
        message: String,
    },
}

/// Session persistence rooted at a data directory.
///
/// Every write appends to the session's JSONL log first and updates the
/// SQLite index second, so a crash between the two leaves the log complete
/// and the index merely stale.
#[derive(Debug)]
pub struct SessionStore {
    data_dir: PathBuf,
    sessions_dir: PathBuf,
    index: SessionIndex,
}

impl SessionStore {
    /// Open (or create) a store rooted at `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        let sessions_dir = data_dir.join("sessions");
        fs::create_dir_all(&sessions_dir)?;
        let index = SessionIndex::open(data_dir.join("index.db"))?;
        Ok(Self {
            data_dir,
            sessions_dir,
            index,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.jsonl", session_id))
    }

    fn append_line(&self, session_id: &str, line: &LogLine) -> Result<(), StorageError> {
        let path = self.session_path(session_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(line)?)?;
        Ok(())
    }

    /// Start a session log and register it in the index.
    pub fn append_header(&self, header: &SessionHeader) -> Result<(), StorageError> {
        self.append_line(&header.session_id, &LogLine::Header(header.clone()))?;
        self.index.upsert(header)?;
        Ok(())
    }

    /// Append one iteration's record to the session log.
    pub fn append_record(
        &self,
        session_id: &str,
        record: &ActionRecord,
    ) -> Result<(), StorageError> {
        self.append_line(session_id, &LogLine::Record(record.clone()))?;
        self.index.bump(session_id, record.iteration)?;
        Ok(())
    }

    /// Seal the session log with its outcome.
    pub fn append_outcome(
        &self,
        session_id: &str,
        outcome: &OutcomeLine,
    ) -> Result<(), StorageError> {
        self.append_line(session_id, &LogLine::Outcome(outcome.clone()))?;
        self.index.set_outcome(session_id, outcome)?;
        Ok(())
    }

    /// Load a full session back from its log.
    pub fn load_session(&self, session_id: &str) -> Result<PersistedSession, StorageError> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Err(StorageError::NotFound(session_id.to_string()));
        }
        read_session(&path)
    }

    /// All known sessions from the index, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, StorageError> {
        self.index.list()
    }

    /// One session's index row, or None if it was never registered.
    pub fn summary(&self, session_id: &str) -> Result<Option<SessionSummary>, StorageError> {
        self.index.get(session_id)
    }

    /// Throw away the index and replay every session log into it.
    ///
    /// Returns the number of sessions indexed.
    pub fn rebuild_index(&self) -> Result<usize, StorageError> {
        self.index.clear()?;
        let mut count = 0;
        for entry in fs::read_dir(&self.sessions_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let session = read_session(&path)?;
            self.index.upsert(&session.header)?;
            if let Some(last) = session.records.last() {
                self.index.bump(&session.header.session_id, last.iteration)?;
            }
            if let Some(outcome) = &session.outcome {
                self.index
                    .set_outcome(&session.header.session_id, outcome)?;
            }
            count += 1;
        }
        Ok(count)
    }
}
