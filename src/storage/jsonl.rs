//! Append-only JSONL session logs.
//!
//! Each session gets one `.jsonl` file containing a header line, one line per
//! recorded iteration, and a final outcome line once the session terminates.
//! The log is the source of truth; the SQLite index is derived from it and can
//! be rebuilt at any time.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::id::now_ms;
use crate::session::{ActionRecord, SessionState, SessionStatus};
use crate::storage::StorageError;

/// One line in a session's append-only log, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogLine {
    Header(SessionHeader),
    Record(ActionRecord),
    Outcome(OutcomeLine),
}

/// First line of every session log. Captures the task as submitted so the
/// log is self-describing even after the caller's `Task` is gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeader {
    pub session_id: String,
    pub goal: String,
    pub acceptance_command: String,
    pub workspace_path: PathBuf,
    pub max_iterations: u32,
    pub started_at: i64,
}

impl SessionHeader {
    pub fn for_session(state: &SessionState) -> Self {
        Self {
            session_id: state.id.clone(),
            goal: state.task.goal.clone(),
            acceptance_command: state.task.criterion.command.clone(),
            workspace_path: state.task.workspace_path.clone(),
            max_iterations: state.task.max_iterations,
            started_at: state.started_at,
        }
    }
}

/// Final line of a terminated session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeLine {
    pub status: SessionStatus,
    pub iterations_used: u32,
    pub final_diagnostics: String,
    pub finished_at: i64,
}

impl OutcomeLine {
    pub fn new(status: SessionStatus, iterations_used: u32, final_diagnostics: String) -> Self {
        Self {
            status,
            iterations_used,
            final_diagnostics,
            finished_at: now_ms() as i64,
        }
    }
}

/// A session read back from its log file.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub header: SessionHeader,
    pub records: Vec<ActionRecord>,
    /// None while the session is still running (or was killed mid-flight).
    pub outcome: Option<OutcomeLine>,
}

impl PersistedSession {
    /// Status from the outcome line, or `Running` when the log has none.
    pub fn status(&self) -> SessionStatus {
        self.outcome
            .as_ref()
            .map(|o| o.status)
            .unwrap_or(SessionStatus::Running)
    }

    pub fn iterations_used(&self) -> u32 {
        self.outcome
            .as_ref()
            .map(|o| o.iterations_used)
            .unwrap_or(self.records.len() as u32)
    }
}

/// Read a session log from disk, skipping blank lines.
///
/// A line that fails to parse is reported with its 1-based line number so the
/// offending entry can be found and repaired by hand.
pub fn read_session(path: &Path) -> Result<PersistedSession, StorageError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut header: Option<SessionHeader> = None;
    let mut records = Vec::new();
    let mut outcome: Option<OutcomeLine> = None;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: LogLine = serde_json::from_str(&line).map_err(|e| StorageError::Corrupt {
            path: path.display().to_string(),
            line: number + 1,
            message: e.to_string(),
        })?;
        match parsed {
            LogLine::Header(h) => header = Some(h),
            LogLine::Record(r) => records.push(r),
            LogLine::Outcome(o) => outcome = Some(o),
        }
    }

    let header = header.ok_or_else(|| StorageError::Corrupt {
        path: path.display().to_string(),
        line: 0,
        message: "missing session header".to_string(),
    })?;

    Ok(PersistedSession {
        header,
        records,
        outcome,
    })
}
