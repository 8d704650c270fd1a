//! Session runner module - the iterate, check, correct control loop.
//!
//! This module provides the core session execution logic, including:
//! - SessionRunner for driving one task to a terminal outcome
//! - RunnerConfig for transient-retry and timeout tuning
//! - CancelToken for cooperative cancellation from the outside

mod session;

pub use session::{CancelToken, RunnerConfig, SessionRunner};
