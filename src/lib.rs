//! hone - an iterate-test-correct control loop for AI coding sessions
//!
//! hone drives a completion provider against an acceptance command: propose a
//! change, apply it behind a checkpoint, run the check, let a reviewer accept,
//! revert, or redirect, and repeat until the check passes or the iteration
//! budget runs out.

pub mod error;
pub mod evaluator;
pub mod executor;
pub mod id;
pub mod provider;
pub mod report;
pub mod review;
pub mod runner;
pub mod session;
pub mod storage;
pub mod workspace;

pub use error::{HoneError, Result};
