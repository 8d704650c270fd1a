//! Reviewer: decides what happens to each iteration's change.
//!
//! After every completed iteration the reviewer compares the new acceptance
//! check result against the session history and returns a verdict: keep the
//! change, revert it, or keep it but push a diagnostic summary into the next
//! prompt. It also owns failure signatures, the mechanism that detects a
//! session stuck repeating the same failure.

use crate::session::{ActionRecord, Verdict};
use log::debug;
use sha2::{Digest, Sha256};

pub const DEFAULT_DELETION_RATIO_THRESHOLD: f64 = 0.5;
pub const DEFAULT_STALL_THRESHOLD: u32 = 2;
pub const DEFAULT_FATAL_REPEAT_THRESHOLD: u32 = 3;

/// Tunable thresholds for review decisions
#[derive(Debug, Clone)]
pub struct ReviewPolicy {
    /// Deleted-to-added line ratio above which a regressing change is
    /// reverted instead of kept
    pub deletion_ratio_threshold: f64,

    /// Consecutive iterations without improvement before the reviewer
    /// demands a different approach
    pub stall_threshold: u32,

    /// Consecutive identical failure signatures that abort the session
    pub fatal_repeat_threshold: u32,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            deletion_ratio_threshold: DEFAULT_DELETION_RATIO_THRESHOLD,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            fatal_repeat_threshold: DEFAULT_FATAL_REPEAT_THRESHOLD,
        }
    }
}

/// Applies [`ReviewPolicy`] to iteration outcomes.
#[derive(Debug, Clone, Default)]
pub struct Reviewer {
    policy: ReviewPolicy,
}

impl Reviewer {
    pub fn new(policy: ReviewPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ReviewPolicy {
        &self.policy
    }

    /// Decide the verdict for `latest`, given every prior record.
    ///
    /// `history` must not include `latest`; the control loop calls this
    /// before appending the record.
    pub fn review(&self, history: &[ActionRecord], latest: &ActionRecord) -> Verdict {
        if latest.passed() {
            return Verdict::Accept;
        }

        if self.regressed(history, latest) {
            let ratio = latest.diff_stat.deletion_ratio();
            if ratio > self.policy.deletion_ratio_threshold {
                debug!(
                    "iteration {} regressed with deletion ratio {:.2}, reverting",
                    latest.iteration, ratio
                );
                return Verdict::Revert;
            }
            let summary = latest
                .eval
                .as_ref()
                .map(|e| e.summary(3))
                .unwrap_or_default();
            return Verdict::RetryWithFeedback(format!(
                "the acceptance check regressed after this change; fix that first: {}",
                summary
            ));
        }

        if self.stalled(history, latest) {
            let summary = latest.failure_text().unwrap_or("no diagnostics");
            return Verdict::RetryWithFeedback(format!(
                "no improvement in the last {} iterations, try a different approach; latest diagnostics: {}",
                self.policy.stall_threshold, summary
            ));
        }

        Verdict::Accept
    }

    /// Whether `latest` made the check worse than it has ever been.
    ///
    /// A failure after any prior pass is always a regression; between two
    /// failures the coarse noise signal decides.
    fn regressed(&self, history: &[ActionRecord], latest: &ActionRecord) -> bool {
        let Some(eval) = latest.eval.as_ref().filter(|e| !e.passed) else {
            return false;
        };
        if history.iter().any(|r| r.passed()) {
            return true;
        }
        matches!(best_signal(history), Some(best) if eval.noise() > best)
    }

    /// Whether the trailing iterations, `latest` included, show no
    /// improvement over the best signal seen before them.
    fn stalled(&self, history: &[ActionRecord], latest: &ActionRecord) -> bool {
        let mut best: Option<usize> = None;
        let mut streak: u32 = 0;
        for record in history.iter().chain(std::iter::once(latest)) {
            let signal = record
                .eval
                .as_ref()
                .map(|e| if e.passed { 0 } else { e.noise() });
            let improved = match (signal, best) {
                (Some(n), Some(b)) => n < b,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if let Some(n) = signal {
                best = Some(best.map_or(n, |b| b.min(n)));
            }
            if improved {
                streak = 0;
            } else {
                streak += 1;
            }
        }
        streak >= self.policy.stall_threshold
    }

    /// Signature of a record's failure, None for passing iterations.
    ///
    /// Digits are stripped before hashing so line numbers, counts, and
    /// timings do not break the equality the fatal check relies on.
    pub fn signature_for(record: &ActionRecord) -> Option<String> {
        if record.passed() {
            return None;
        }
        record.failure_text().map(signature_of)
    }

    /// Abort signal: the trailing records all failed the same way.
    ///
    /// Returns the repeated signature when the trailing run of identical
    /// signatures reaches the policy threshold.
    pub fn detect_fatal(&self, history: &[ActionRecord]) -> Option<String> {
        let threshold = self.policy.fatal_repeat_threshold as usize;
        if threshold == 0 {
            return None;
        }
        let last = history.last()?.failure_signature.clone()?;
        let run = history
            .iter()
            .rev()
            .take_while(|r| r.failure_signature.as_deref() == Some(last.as_str()))
            .count();
        if run >= threshold {
            debug!("failure signature {} repeated {} times", last, run);
            Some(last)
        } else {
            None
        }
    }
}

/// Lowest failure signal in the history; a passing check counts as zero.
fn best_signal(history: &[ActionRecord]) -> Option<usize> {
    history
        .iter()
        .filter_map(|r| r.eval.as_ref().map(|e| if e.passed { 0 } else { e.noise() }))
        .min()
}

fn signature_of(text: &str) -> String {
    let normalized: String = text
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_digit())
        .collect();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..8])
}
