//! Canonical in-memory store of jobs.
//!
//! The table is deliberately forgiving: an event for a job it has never
//! seen synthesizes a record instead of being dropped, because losing a
//! job's visibility is worse than briefly showing an incomplete one.
//! Sequence and replay filtering happen upstream (see the reconciler);
//! this table only enforces the state machine itself, most importantly
//! that terminal states are sticky.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sync_core::{EntityId, Job, JobId, JobKind, JobStatus, Progress};

use std::collections::HashMap;

/// Fields of a `job_progress` event the table acts on.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub entity_id: EntityId,
    pub kind: Option<JobKind>,
    pub current: u64,
    pub total: u64,
    pub percentage: u8,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<Map<String, Value>>,
}

/// Optional identity fields carried by terminal events, enough to
/// synthesize a terminal record for a job this client never saw start.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalIdentity {
    pub entity_id: Option<EntityId>,
    pub kind: Option<JobKind>,
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<JobId, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table with an authoritative snapshot. Never an
    /// incremental merge: the snapshot is ground truth for this connection.
    pub fn apply_snapshot(&mut self, jobs: Vec<Job>) {
        self.jobs = jobs.into_iter().map(|j| (j.job_id.clone(), j)).collect();
    }

    /// Merge a progress event, synthesizing an active record when the
    /// creation event was missed. Returns whether state changed, so a
    /// redelivery carrying values the table already holds does not fan
    /// out a notification.
    pub fn apply_progress(&mut self, update: ProgressUpdate) -> bool {
        match self.jobs.get_mut(&update.job_id) {
            // Terminal states are sticky; a straggling progress event
            // must not revive the job.
            Some(job) if job.is_terminal() => false,
            Some(job) => {
                let progress = Progress::new(update.current, update.total, update.percentage);
                let mut changed = job.progress != progress;
                job.progress = progress;
                if let Some(metadata) = update.metadata {
                    // Key-by-key merge: phase markers from earlier events
                    // survive updates that do not mention them.
                    for (key, value) in metadata {
                        if job.metadata.get(&key) != Some(&value) {
                            job.metadata.insert(key, value);
                            changed = true;
                        }
                    }
                }
                if job.started_at.is_none() && update.timestamp.is_some() {
                    job.started_at = update.timestamp;
                    changed = true;
                }
                changed
            }
            None => {
                tracing::debug!(job_id = %update.job_id, "synthesizing job from progress event");
                let now = update.timestamp.unwrap_or_else(Utc::now);
                let mut job = Job::new(
                    update.job_id.clone(),
                    update.entity_id,
                    update.kind.unwrap_or(JobKind::RestaurantCrawl),
                )
                .with_progress(Progress::new(
                    update.current,
                    update.total,
                    update.percentage,
                ))
                .with_metadata(update.metadata.unwrap_or_default());
                job.created_at = now;
                job.started_at = update.timestamp;
                self.jobs.insert(update.job_id, job);
                true
            }
        }
    }

    /// Mark a job completed. No-op when the job is already terminal.
    pub fn apply_completion(
        &mut self,
        job_id: &JobId,
        identity: TerminalIdentity,
        timestamp: DateTime<Utc>,
    ) -> bool {
        self.apply_terminal(job_id, identity, Some(timestamp), JobStatus::Completed, None)
    }

    /// Mark a job failed with its error string.
    pub fn apply_error(&mut self, job_id: &JobId, identity: TerminalIdentity, error: String) -> bool {
        self.apply_terminal(job_id, identity, None, JobStatus::Failed, Some(error))
    }

    /// Mark a job cancelled.
    pub fn apply_cancellation(&mut self, job_id: &JobId, identity: TerminalIdentity) -> bool {
        self.apply_terminal(job_id, identity, None, JobStatus::Cancelled, None)
    }

    /// Flip the interrupted flag independently of status. An interrupted
    /// job stays logically active, flagged for warning treatment.
    pub fn apply_interruption(&mut self, job_id: &JobId, interrupted: bool) -> bool {
        match self.jobs.get_mut(job_id) {
            Some(job) if job.interrupted != interrupted => {
                job.interrupted = interrupted;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    /// Jobs for one restaurant, newest first.
    pub fn list_by_entity(&self, entity_id: EntityId) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| j.entity_id == entity_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Every job still in the active state.
    pub fn active_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// Entities that currently have at least one job record.
    pub fn entities(&self) -> Vec<EntityId> {
        let mut entities: Vec<EntityId> = self.jobs.values().map(|j| j.entity_id).collect();
        entities.sort_unstable();
        entities.dedup();
        entities
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn apply_terminal(
        &mut self,
        job_id: &JobId,
        identity: TerminalIdentity,
        timestamp: Option<DateTime<Utc>>,
        status: JobStatus,
        error: Option<String>,
    ) -> bool {
        match self.jobs.get_mut(job_id) {
            Some(job) if job.is_terminal() => false,
            Some(job) => {
                job.status = status;
                job.completed_at = Some(timestamp.unwrap_or_else(Utc::now));
                job.error = error;
                true
            }
            None => match identity.entity_id {
                // Enough identity to show something useful: synthesize a
                // terminal record instead of losing the outcome.
                Some(entity_id) => {
                    tracing::debug!(job_id = %job_id, status = %status, "synthesizing terminal job record");
                    let mut job = Job::new(
                        job_id.clone(),
                        entity_id,
                        identity.kind.unwrap_or(JobKind::RestaurantCrawl),
                    );
                    job.status = status;
                    job.completed_at = Some(timestamp.unwrap_or_else(Utc::now));
                    job.error = error;
                    self.jobs.insert(job_id.clone(), job);
                    true
                }
                // Nothing displayable beyond the id: drop silently.
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progress(job: &str, entity: i64, current: u64, total: u64, pct: u8) -> ProgressUpdate {
        ProgressUpdate {
            job_id: JobId::from(job),
            entity_id: EntityId(entity),
            kind: Some(JobKind::ReviewCrawl),
            current,
            total,
            percentage: pct,
            timestamp: None,
            metadata: None,
        }
    }

    #[test]
    fn progress_for_unknown_job_synthesizes_one_active_record() {
        let mut table = JobTable::new();
        table.apply_snapshot(Vec::new());

        assert!(table.apply_progress(progress("J1", 7, 3, 10, 30)));

        assert_eq!(table.len(), 1);
        let job = table.get(&JobId::from("J1")).unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.progress, Progress::new(3, 10, 30));
        assert_eq!(job.entity_id, EntityId(7));
    }

    #[test]
    fn progress_merges_metadata_key_by_key() {
        let mut table = JobTable::new();
        let mut first = progress("J1", 7, 1, 10, 10);
        first.metadata = Some(
            json!({"step": "crawl", "substep": "listing"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        table.apply_progress(first);

        let mut second = progress("J1", 7, 2, 10, 20);
        second.metadata = Some(json!({"substep": "detail"}).as_object().cloned().unwrap());
        table.apply_progress(second);

        let job = table.get(&JobId::from("J1")).unwrap();
        assert_eq!(job.metadata["step"], json!("crawl"));
        assert_eq!(job.metadata["substep"], json!("detail"));
        assert_eq!(job.progress.current, 2);
    }

    #[test]
    fn redelivered_identical_progress_reports_no_change() {
        let mut table = JobTable::new();
        let mut update = progress("J1", 7, 3, 10, 30);
        update.metadata = Some(json!({"step": "crawl"}).as_object().cloned().unwrap());

        assert!(table.apply_progress(update.clone()));
        // The same event again, as an at-least-once channel will deliver.
        assert!(!table.apply_progress(update));

        let job = table.get(&JobId::from("J1")).unwrap();
        assert_eq!(job.progress.current, 3);
        assert_eq!(job.metadata["step"], json!("crawl"));
    }

    #[test]
    fn completion_is_idempotent() {
        let mut table = JobTable::new();
        table.apply_progress(progress("J1", 7, 5, 10, 50));

        let at = Utc::now();
        assert!(table.apply_completion(&JobId::from("J1"), TerminalIdentity::default(), at));
        let after_first = table.get(&JobId::from("J1")).unwrap().clone();

        assert!(!table.apply_completion(&JobId::from("J1"), TerminalIdentity::default(), Utc::now()));
        assert_eq!(table.get(&JobId::from("J1")).unwrap(), &after_first);
        assert_eq!(after_first.status, JobStatus::Completed);
        assert_eq!(after_first.completed_at, Some(at));
    }

    #[test]
    fn terminal_states_are_sticky_against_progress() {
        let mut table = JobTable::new();
        table.apply_progress(progress("J1", 7, 5, 10, 50));
        table.apply_cancellation(&JobId::from("J1"), TerminalIdentity::default());

        assert!(!table.apply_progress(progress("J1", 7, 6, 10, 60)));
        let job = table.get(&JobId::from("J1")).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.progress.current, 5);
    }

    #[test]
    fn error_sets_failed_status_and_message() {
        let mut table = JobTable::new();
        table.apply_progress(progress("J1", 7, 5, 10, 50));

        assert!(table.apply_error(
            &JobId::from("J1"),
            TerminalIdentity::default(),
            "crawler banned".to_string(),
        ));
        let job = table.get(&JobId::from("J1")).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("crawler banned"));
    }

    #[test]
    fn terminal_event_for_unknown_job_needs_identity_fields() {
        let mut table = JobTable::new();

        // Only a job id: nothing displayable, dropped.
        assert!(!table.apply_error(
            &JobId::from("GHOST"),
            TerminalIdentity::default(),
            "boom".to_string(),
        ));
        assert!(table.is_empty());

        // Entity known: a terminal record is worth showing.
        let identity = TerminalIdentity {
            entity_id: Some(EntityId(7)),
            kind: Some(JobKind::ReviewSummary),
        };
        assert!(table.apply_error(&JobId::from("GHOST"), identity, "boom".to_string()));
        let job = table.get(&JobId::from("GHOST")).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.entity_id, EntityId(7));
    }

    #[test]
    fn snapshot_replaces_rather_than_merges() {
        let mut table = JobTable::new();
        table.apply_progress(progress("OLD", 1, 1, 2, 50));

        let fresh = Job::new(JobId::from("NEW"), EntityId(2), JobKind::ReviewCrawl);
        table.apply_snapshot(vec![fresh]);

        assert!(table.get(&JobId::from("OLD")).is_none());
        assert!(table.get(&JobId::from("NEW")).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn interruption_flag_is_orthogonal_to_status() {
        let mut table = JobTable::new();
        table.apply_progress(progress("J1", 7, 1, 2, 50));

        assert!(table.apply_interruption(&JobId::from("J1"), true));
        // Repeat is a no-op.
        assert!(!table.apply_interruption(&JobId::from("J1"), true));

        let job = table.get(&JobId::from("J1")).unwrap();
        assert!(job.interrupted);
        assert_eq!(job.status, JobStatus::Active);

        assert!(table.apply_interruption(&JobId::from("J1"), false));
        assert!(!table.get(&JobId::from("J1")).unwrap().interrupted);
    }

    #[test]
    fn active_listing_excludes_terminal_jobs() {
        let mut table = JobTable::new();
        table.apply_progress(progress("J1", 7, 1, 2, 50));
        table.apply_progress(progress("J2", 7, 1, 2, 50));
        table.apply_completion(&JobId::from("J1"), TerminalIdentity::default(), Utc::now());

        let active = table.active_jobs();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].job_id, JobId::from("J2"));

        let all_for_entity = table.list_by_entity(EntityId(7));
        assert_eq!(all_for_entity.len(), 2);
    }
}
