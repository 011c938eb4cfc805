//! Time-bounded memory of jobs that already finished.
//!
//! After a reconnect the server may re-emit trailing progress or terminal
//! events for a job that reached a terminal state on this client before the
//! disconnect. Any job event whose id is in the ledger is dropped before it
//! can touch the job table, so a completed job never flickers back to
//! active. Entries expire after a retention window; by then the server has
//! long stopped replaying them.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sync_core::JobId;

/// Default retention window for completed-job entries.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct CompletionLedger {
    completed: HashMap<JobId, DateTime<Utc>>,
    retention: TimeDelta,
}

impl CompletionLedger {
    pub fn new(retention: Duration) -> Self {
        Self {
            completed: HashMap::new(),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Check whether `job_id` finished within the retention window,
    /// lazily purging the entry if it expired.
    pub fn is_completed(&mut self, job_id: &JobId) -> bool {
        self.is_completed_at(job_id, Utc::now())
    }

    pub fn mark_completed(&mut self, job_id: JobId) {
        self.mark_completed_at(job_id, Utc::now());
    }

    /// Forget a job explicitly, e.g. when a consumer wants replayed state.
    pub fn unmark(&mut self, job_id: &JobId) {
        self.completed.remove(job_id);
    }

    /// Drop every entry older than the retention window. Returns how many
    /// were removed. Invoked periodically by the owning lifecycle.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    fn expired(&self, marked: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(marked) > self.retention
    }

    pub(crate) fn is_completed_at(&mut self, job_id: &JobId, now: DateTime<Utc>) -> bool {
        match self.completed.get(job_id) {
            Some(&marked) if self.expired(marked, now) => {
                self.completed.remove(job_id);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub(crate) fn mark_completed_at(&mut self, job_id: JobId, now: DateTime<Utc>) {
        self.completed.insert(job_id, now);
    }

    pub(crate) fn sweep_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.completed.len();
        let retention = self.retention;
        self.completed
            .retain(|_, &mut marked| now.signed_duration_since(marked) <= retention);
        before - self.completed.len()
    }
}

impl Default for CompletionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> JobId {
        JobId::from(id)
    }

    #[test]
    fn marked_job_reads_completed_until_unmarked() {
        let mut ledger = CompletionLedger::default();
        assert!(!ledger.is_completed(&job("J1")));
        ledger.mark_completed(job("J1"));
        assert!(ledger.is_completed(&job("J1")));
        ledger.unmark(&job("J1"));
        assert!(!ledger.is_completed(&job("J1")));
    }

    #[test]
    fn lookup_purges_expired_entry_lazily() {
        let mut ledger = CompletionLedger::new(Duration::from_secs(300));
        let marked = Utc::now();
        ledger.mark_completed_at(job("J1"), marked);

        let just_inside = marked + TimeDelta::seconds(299);
        assert!(ledger.is_completed_at(&job("J1"), just_inside));

        let past_window = marked + TimeDelta::seconds(301);
        assert!(!ledger.is_completed_at(&job("J1"), past_window));
        assert!(ledger.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let mut ledger = CompletionLedger::new(Duration::from_secs(300));
        let now = Utc::now();
        ledger.mark_completed_at(job("OLD"), now - TimeDelta::seconds(600));
        ledger.mark_completed_at(job("FRESH"), now);

        assert_eq!(ledger.sweep_at(now), 1);
        assert!(!ledger.is_completed_at(&job("OLD"), now));
        assert!(ledger.is_completed_at(&job("FRESH"), now));
    }

    #[test]
    fn remarking_refreshes_the_window() {
        let mut ledger = CompletionLedger::new(Duration::from_secs(300));
        let start = Utc::now();
        ledger.mark_completed_at(job("J1"), start);
        ledger.mark_completed_at(job("J1"), start + TimeDelta::seconds(200));
        assert!(ledger.is_completed_at(&job("J1"), start + TimeDelta::seconds(400)));
    }
}
