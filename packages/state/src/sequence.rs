//! Per-(job, event-kind) monotonic sequence tracking.
//!
//! Progress for independent phases of the same job (crawl vs. db-write vs.
//! image-download) uses independent sequence spaces: phases interleave and
//! are ordered only within themselves.

use std::collections::HashMap;

use sync_core::JobId;

/// Sequence to use when the payload carries no usable explicit sequence:
/// `sequence` if present and non-zero, else `current`, else 0. The
/// `current` counter is monotonic by construction of the upstream progress
/// reporter, which makes it a valid substitute.
pub fn effective_sequence(sequence: Option<u64>, current: u64) -> u64 {
    match sequence {
        Some(seq) if seq != 0 => seq,
        _ => current,
    }
}

/// Rejects deliveries whose sequence number regressed.
///
/// Equal sequences are accepted: at-least-once delivery may legitimately
/// re-send the latest event, and suppressing post-terminal replays is the
/// completion ledger's job, not this one's.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    last_accepted: HashMap<JobId, HashMap<String, u64>>,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sequence` for `(job_id, kind)` and return whether the
    /// delivery should be applied. Returns `false` iff the sequence is
    /// strictly smaller than the last accepted one.
    pub fn accept(&mut self, job_id: &JobId, kind: &str, sequence: u64) -> bool {
        let spaces = self.last_accepted.entry(job_id.clone()).or_default();
        match spaces.get_mut(kind) {
            Some(last) if sequence < *last => false,
            Some(last) => {
                *last = sequence;
                true
            }
            None => {
                spaces.insert(kind.to_string(), sequence);
                true
            }
        }
    }

    /// Clear one event-kind's counter, or every counter for the job when
    /// `kind` is `None`. Called when a job goes terminal so a fresh job
    /// reusing the entity starts its sequences from zero without being
    /// rejected as stale.
    pub fn reset(&mut self, job_id: &JobId, kind: Option<&str>) {
        match kind {
            Some(kind) => {
                if let Some(spaces) = self.last_accepted.get_mut(job_id) {
                    spaces.remove(kind);
                    if spaces.is_empty() {
                        self.last_accepted.remove(job_id);
                    }
                }
            }
            None => {
                self.last_accepted.remove(job_id);
            }
        }
    }

    /// Number of jobs with at least one tracked sequence space.
    pub fn tracked_jobs(&self) -> usize {
        self.last_accepted.len()
    }
}
