//! ID generation utilities for hone
//!
//! Provides functions for generating unique session identifiers.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique session ID
///
/// Format: `{timestamp_ms}-{8 hex chars}`
/// Example: `1738300800123-a1b2c3d4`
///
/// The timestamp prefix keeps ids sortable by creation time; the suffix is
/// a hash over timestamp, process id, and a process-local counter so ids
/// generated within the same millisecond stay distinct.
pub fn generate_session_id() -> String {
    let timestamp = now_ms();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(seq.to_le_bytes());
    let digest = hasher.finalize();

    format!("{}-{}", timestamp, hex::encode(&digest[..4]))
}
