//! Terminal session outcome

use crate::session::record::ActionRecord;
use crate::session::state::SessionStatus;
use serde::{Deserialize, Serialize};

/// What a finished session hands back to its caller
///
/// Every session ends in exactly one of succeeded, failed, or aborted; the
/// full history travels with the outcome for post-mortem inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub iterations_used: u32,
    pub history: Vec<ActionRecord>,
    pub final_diagnostics: String,
}

impl SessionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == SessionStatus::Succeeded
    }

    /// The last iteration's record, if any iteration completed
    pub fn last_record(&self) -> Option<&ActionRecord> {
        self.history.last()
    }
}
