//! Session domain types
//!
//! A session is one run of the control loop over one task: the task itself,
//! the append-only iteration history, the live state, and the terminal
//! outcome handed back to the caller.

pub mod outcome;
pub mod record;
pub mod state;
pub mod task;

pub use outcome::SessionOutcome;
pub use record::{ActionRecord, Verdict};
pub use state::{SessionState, SessionStatus};
pub use task::{AcceptanceCriterion, DEFAULT_MAX_ITERATIONS, Task};
