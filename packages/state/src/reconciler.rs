//! The event-application path.
//!
//! Every inbound delta runs through the same pipeline: sequence guard
//! first (cheap rejection of regressed deliveries), completion ledger
//! second (replayed events for already-finished jobs), table mutation
//! last. Checking the ledger before applying is what stops a stale
//! re-delivered progress event from un-completing a job.
//!
//! The reconciler performs no I/O and owns no timers. Side effects it
//! cannot perform itself come back in the [`ApplyOutcome`]: requests to
//! emit on the channel and a failed queue item to evict after the display
//! grace period.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{Map, Value};
use sync_core::{
    ClientRequest, EntityId, Job, JobId, QueueItem, QueueItemId, QueueStats, ServerEvent,
};

use crate::job_table::{JobTable, ProgressUpdate, TerminalIdentity};
use crate::ledger::CompletionLedger;
use crate::queue_table::QueueTable;
use crate::rooms::RoomSet;
use crate::sequence::{SequenceGuard, effective_sequence};

/// What applying one event asks of the owning lifecycle.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// The job table mutated; notify consumers.
    pub jobs_changed: bool,
    /// The queue table mutated; notify consumers.
    pub queue_changed: bool,
    /// Requests to emit on the channel (room subscriptions, snapshot
    /// re-requests).
    pub requests: Vec<ClientRequest>,
    /// A failed queue item to evict once the display grace period passes.
    pub evict_after_grace: Option<QueueItemId>,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        self.jobs_changed || self.queue_changed
    }
}

pub struct Reconciler {
    guard: SequenceGuard,
    ledger: CompletionLedger,
    jobs: JobTable,
    queue: QueueTable,
    rooms: RoomSet,
    /// Entities whose room is held on behalf of job tracking. One hold
    /// per entity, however many jobs it has.
    tracked: HashSet<EntityId>,
}

impl Reconciler {
    pub fn new(completion_retention: Duration) -> Self {
        Self {
            guard: SequenceGuard::new(),
            ledger: CompletionLedger::new(completion_retention),
            jobs: JobTable::new(),
            queue: QueueTable::new(),
            rooms: RoomSet::new(),
            tracked: HashSet::new(),
        }
    }

    /// Run one event through the pipeline.
    pub fn apply(&mut self, event: ServerEvent) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        match event {
            ServerEvent::JobsSnapshot { jobs, .. } => {
                self.jobs.apply_snapshot(jobs);
                outcome.jobs_changed = true;
                // Catch up on rooms for jobs that were already running
                // when this client connected.
                for entity_id in self.jobs.entities() {
                    self.track_entity(entity_id, &mut outcome);
                }
            }
            ServerEvent::QueueSnapshot { queue, stats, .. } => {
                self.queue.apply_snapshot(queue, stats);
                outcome.queue_changed = true;
            }

            ServerEvent::JobProgress {
                job_id,
                entity_id,
                kind,
                sequence,
                current,
                total,
                percentage,
                timestamp,
                metadata,
            } => {
                let space = progress_space(metadata.as_ref());
                let sequence = effective_sequence(sequence, current);
                if !self.guard.accept(&job_id, &space, sequence) {
                    tracing::trace!(job_id = %job_id, space, sequence, "stale progress dropped");
                    return outcome;
                }
                if self.ledger.is_completed(&job_id) {
                    tracing::trace!(job_id = %job_id, "progress for completed job dropped");
                    return outcome;
                }
                outcome.jobs_changed = self.jobs.apply_progress(ProgressUpdate {
                    job_id,
                    entity_id,
                    kind,
                    current,
                    total,
                    percentage,
                    timestamp,
                    metadata,
                });
                if outcome.jobs_changed {
                    self.track_entity(entity_id, &mut outcome);
                }
            }

            ServerEvent::JobCompleted {
                job_id,
                entity_id,
                kind,
                timestamp,
            } => {
                if self.ledger.is_completed(&job_id) {
                    return outcome;
                }
                outcome.jobs_changed = self.jobs.apply_completion(
                    &job_id,
                    TerminalIdentity { entity_id, kind },
                    timestamp,
                );
                self.finish_job(job_id);
            }
            ServerEvent::JobFailed {
                job_id,
                error,
                entity_id,
                kind,
            } => {
                if self.ledger.is_completed(&job_id) {
                    return outcome;
                }
                outcome.jobs_changed =
                    self.jobs
                        .apply_error(&job_id, TerminalIdentity { entity_id, kind }, error);
                self.finish_job(job_id);
            }
            ServerEvent::JobCancelled {
                job_id,
                entity_id,
                kind,
            } => {
                if self.ledger.is_completed(&job_id) {
                    return outcome;
                }
                outcome.jobs_changed = self
                    .jobs
                    .apply_cancellation(&job_id, TerminalIdentity { entity_id, kind });
                self.finish_job(job_id);
            }
            ServerEvent::JobInterrupted {
                job_id,
                interrupted,
            } => {
                if self.ledger.is_completed(&job_id) {
                    return outcome;
                }
                outcome.jobs_changed = self.jobs.apply_interruption(&job_id, interrupted);
            }

            ServerEvent::QueueJobAdded { queue_id, .. } => {
                // The event only signals "re-fetch the queue"; its fields
                // are not trusted to rebuild the item.
                tracing::debug!(queue_id = %queue_id, "queue item added, re-requesting snapshot");
                outcome.requests.push(ClientRequest::RequestQueueSnapshot);
            }
            ServerEvent::QueueJobStarted {
                queue_id,
                job_id,
                timestamp,
                ..
            } => {
                outcome.queue_changed = self.queue.mark_processing(&queue_id, job_id, timestamp);
            }
            ServerEvent::QueueJobCompleted { queue_id, .. } => {
                outcome.queue_changed = self.queue.remove_completed(&queue_id);
            }
            ServerEvent::QueueJobFailed {
                queue_id, error, ..
            } => {
                if self.queue.mark_failed(&queue_id, error) {
                    outcome.queue_changed = true;
                    outcome.evict_after_grace = Some(queue_id);
                }
            }
            ServerEvent::QueueJobCancelled { queue_id, .. } => {
                outcome.queue_changed = self.queue.remove_cancelled(&queue_id);
            }
        }
        outcome
    }

    /// Evict a failed queue item whose display grace period elapsed.
    pub fn evict_queue_item(&mut self, queue_id: &QueueItemId) -> bool {
        self.queue.evict(queue_id)
    }

    /// Purge expired completion-ledger entries.
    pub fn sweep_ledger(&mut self) -> usize {
        self.ledger.sweep()
    }

    /// Forget a completion, letting replayed state for the job through
    /// again.
    pub fn unmark_completed(&mut self, job_id: &JobId) {
        self.ledger.unmark(job_id);
    }

    /// Take a screen-lifetime hold on an entity's room.
    pub fn watch_room(&mut self, entity_id: EntityId) -> Option<ClientRequest> {
        self.rooms
            .acquire(entity_id)
            .then_some(ClientRequest::SubscribeEntity { entity_id })
    }

    /// Drop a screen-lifetime hold. Job-tracking holds keep the room open.
    pub fn leave_room(&mut self, entity_id: EntityId) -> Option<ClientRequest> {
        self.rooms
            .release(entity_id)
            .then_some(ClientRequest::UnsubscribeEntity { entity_id })
    }

    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.get(job_id).cloned()
    }

    pub fn active_jobs(&self) -> Vec<Job> {
        self.jobs.active_jobs()
    }

    pub fn jobs_for_entity(&self, entity_id: EntityId) -> Vec<Job> {
        self.jobs.list_by_entity(entity_id)
    }

    pub fn queue_snapshot(&self) -> (Vec<QueueItem>, QueueStats) {
        self.queue.snapshot()
    }

    pub fn subscribed_entities(&self) -> Vec<EntityId> {
        self.rooms.entities()
    }

    /// Job-driven room hold: first sighting of an entity subscribes.
    fn track_entity(&mut self, entity_id: EntityId, outcome: &mut ApplyOutcome) {
        if self.tracked.insert(entity_id) && self.rooms.acquire(entity_id) {
            outcome
                .requests
                .push(ClientRequest::SubscribeEntity { entity_id });
        }
    }

    /// Shared terminal side effects: remember the completion so replays
    /// are suppressed, and clear the job's sequence spaces so a fresh job
    /// on the same entity starts from zero.
    fn finish_job(&mut self, job_id: JobId) {
        self.guard.reset(&job_id, None);
        self.ledger.mark_completed(job_id);
    }
}

/// Sequence-space key for a progress event. Phases marked by a `step`
/// metadata entry get independent spaces; they interleave and are only
/// ordered within themselves.
fn progress_space(metadata: Option<&Map<String, Value>>) -> String {
    match metadata.and_then(|m| m.get("step")) {
        Some(Value::String(step)) => format!("progress:{step}"),
        Some(other) => format!("progress:{other}"),
        None => "progress".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use sync_core::{JobKind, JobStatus, Progress, QueueStatus};

    fn reconciler() -> Reconciler {
        Reconciler::new(Duration::from_secs(300))
    }

    fn progress_event(job: &str, entity: i64, seq: Option<u64>, current: u64) -> ServerEvent {
        ServerEvent::JobProgress {
            job_id: JobId::from(job),
            entity_id: EntityId(entity),
            kind: Some(JobKind::ReviewCrawl),
            sequence: seq,
            current,
            total: 10,
            percentage: (current * 10).min(100) as u8,
            timestamp: None,
            metadata: None,
        }
    }

    fn completed_event(job: &str) -> ServerEvent {
        ServerEvent::JobCompleted {
            job_id: JobId::from(job),
            entity_id: None,
            kind: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_snapshot_then_progress_yields_one_active_job() {
        let mut rec = reconciler();
        rec.apply(ServerEvent::JobsSnapshot {
            total: 0,
            jobs: Vec::new(),
            timestamp: Utc::now(),
        });

        let outcome = rec.apply(progress_event("J1", 7, None, 3));
        assert!(outcome.jobs_changed);

        let job = rec.job(&JobId::from("J1")).unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.progress, Progress::new(3, 10, 30));
        // First sighting of the entity subscribes to its room.
        assert_eq!(
            outcome.requests,
            vec![ClientRequest::SubscribeEntity {
                entity_id: EntityId(7)
            }]
        );
    }

    #[test]
    fn newer_sequence_wins_over_late_stale_delivery() {
        let mut rec = reconciler();
        assert!(rec.apply(progress_event("J1", 7, Some(2), 8)).jobs_changed);
        let outcome = rec.apply(progress_event("J1", 7, Some(1), 2));
        assert!(!outcome.jobs_changed);
        assert_eq!(rec.job(&JobId::from("J1")).unwrap().progress.current, 8);
    }

    #[test]
    fn completion_then_late_progress_is_a_ledger_hit() {
        let mut rec = reconciler();
        rec.apply(progress_event("J1", 7, Some(5), 5));
        rec.apply(completed_event("J1"));

        assert!(rec.active_jobs().is_empty());

        // Sequence 6 would pass the guard; the ledger stops it. Were it
        // applied, the synthesizing table would resurrect the job.
        let outcome = rec.apply(progress_event("J1", 7, Some(6), 6));
        assert!(!outcome.jobs_changed);
        assert_eq!(
            rec.job(&JobId::from("J1")).unwrap().status,
            JobStatus::Completed
        );
    }

    #[test]
    fn unmark_lets_events_through_again() {
        let mut rec = reconciler();
        rec.apply(progress_event("J1", 7, Some(5), 5));
        rec.apply(completed_event("J1"));
        rec.unmark_completed(&JobId::from("J1"));

        // The table's sticky terminal state still holds; only the ledger
        // gate is open again.
        let outcome = rec.apply(progress_event("J1", 7, Some(6), 6));
        assert!(!outcome.jobs_changed);
    }

    #[test]
    fn duplicate_completion_changes_nothing() {
        let mut rec = reconciler();
        rec.apply(progress_event("J1", 7, None, 5));
        let first = rec.apply(completed_event("J1"));
        assert!(first.jobs_changed);
        let job_after_first = rec.job(&JobId::from("J1")).unwrap();

        let second = rec.apply(completed_event("J1"));
        assert!(!second.jobs_changed);
        assert_eq!(rec.job(&JobId::from("J1")).unwrap(), job_after_first);
    }

    #[test]
    fn terminal_reset_gives_a_successor_job_fresh_sequences() {
        let mut rec = reconciler();
        rec.apply(progress_event("J1", 7, Some(50), 50));
        rec.apply(completed_event("J1"));

        // A fresh job for the same entity starts its sequences at 1.
        let outcome = rec.apply(progress_event("J2", 7, Some(1), 1));
        assert!(outcome.jobs_changed);
    }

    #[test]
    fn phase_steps_get_independent_sequence_spaces() {
        let mut rec = reconciler();
        let with_step = |seq: u64, step: &str| ServerEvent::JobProgress {
            job_id: JobId::from("J1"),
            entity_id: EntityId(7),
            kind: Some(JobKind::RestaurantCrawl),
            sequence: Some(seq),
            current: seq,
            total: 100,
            percentage: seq.min(100) as u8,
            timestamp: None,
            metadata: Some(json!({"step": step}).as_object().cloned().unwrap()),
        };

        assert!(rec.apply(with_step(40, "crawl")).jobs_changed);
        // A much lower sequence in a different phase is not stale.
        assert!(rec.apply(with_step(2, "image_download")).jobs_changed);
        // But a regression inside the same phase is.
        assert!(!rec.apply(with_step(39, "crawl")).jobs_changed);
    }

    #[test]
    fn queue_added_requests_a_fresh_snapshot() {
        let mut rec = reconciler();
        let outcome = rec.apply(ServerEvent::QueueJobAdded {
            queue_id: QueueItemId::from("Q1"),
            kind: JobKind::ReviewCrawl,
            entity_id: EntityId(7),
            position: 1,
            timestamp: Utc::now(),
        });
        assert!(!outcome.changed());
        assert_eq!(outcome.requests, vec![ClientRequest::RequestQueueSnapshot]);
    }

    #[test]
    fn queue_started_updates_item_and_stats() {
        let mut rec = reconciler();
        let items = vec![
            QueueItem::new(QueueItemId::from("Q1"), JobKind::ReviewCrawl, EntityId(7), 1),
            QueueItem::new(QueueItemId::from("Q2"), JobKind::ReviewCrawl, EntityId(8), 2),
        ];
        let mut processing = QueueItem::new(
            QueueItemId::from("Q3"),
            JobKind::ReviewSummary,
            EntityId(9),
            0,
        );
        processing.status = QueueStatus::Processing;

        rec.apply(ServerEvent::QueueSnapshot {
            total: 3,
            queue: items.into_iter().chain([processing]).collect(),
            stats: QueueStats {
                total: 3,
                waiting: 2,
                processing: 1,
                ..QueueStats::default()
            },
            timestamp: Utc::now(),
        });

        let outcome = rec.apply(ServerEvent::QueueJobStarted {
            queue_id: QueueItemId::from("Q1"),
            job_id: JobId::from("J1"),
            kind: JobKind::ReviewCrawl,
            entity_id: EntityId(7),
            timestamp: Utc::now(),
        });
        assert!(outcome.queue_changed);

        let (listed, stats) = rec.queue_snapshot();
        assert_eq!((stats.waiting, stats.processing), (1, 2));
        let started = listed
            .iter()
            .find(|i| i.queue_id == QueueItemId::from("Q1"))
            .unwrap();
        assert_eq!(started.status, QueueStatus::Processing);
    }

    #[test]
    fn queue_failure_schedules_grace_eviction() {
        let mut rec = reconciler();
        let mut item = QueueItem::new(
            QueueItemId::from("Q1"),
            JobKind::ReviewCrawl,
            EntityId(7),
            0,
        );
        item.status = QueueStatus::Processing;
        rec.apply(ServerEvent::QueueSnapshot {
            total: 1,
            queue: vec![item],
            stats: QueueStats {
                total: 1,
                processing: 1,
                ..QueueStats::default()
            },
            timestamp: Utc::now(),
        });

        let outcome = rec.apply(ServerEvent::QueueJobFailed {
            queue_id: QueueItemId::from("Q1"),
            job_id: None,
            error: "crawler died".to_string(),
            timestamp: Utc::now(),
        });
        assert!(outcome.queue_changed);
        assert_eq!(outcome.evict_after_grace, Some(QueueItemId::from("Q1")));

        assert!(rec.evict_queue_item(&QueueItemId::from("Q1")));
        let (listed, _) = rec.queue_snapshot();
        assert!(listed.is_empty());
    }

    #[test]
    fn snapshot_subscribes_rooms_for_running_jobs() {
        let mut rec = reconciler();
        let jobs = vec![
            Job::new(JobId::from("J1"), EntityId(1), JobKind::ReviewCrawl),
            Job::new(JobId::from("J2"), EntityId(2), JobKind::ReviewSummary),
            Job::new(JobId::from("J3"), EntityId(1), JobKind::RestaurantCrawl),
        ];
        let outcome = rec.apply(ServerEvent::JobsSnapshot {
            total: 3,
            jobs,
            timestamp: Utc::now(),
        });

        let mut subscribed: Vec<EntityId> = outcome
            .requests
            .iter()
            .filter_map(|r| match r {
                ClientRequest::SubscribeEntity { entity_id } => Some(*entity_id),
                _ => None,
            })
            .collect();
        subscribed.sort_unstable();
        assert_eq!(subscribed, vec![EntityId(1), EntityId(2)]);
    }

    #[test]
    fn screen_hold_and_job_hold_are_independent() {
        let mut rec = reconciler();
        rec.apply(progress_event("J1", 7, None, 1));
        assert!(rec.subscribed_entities().contains(&EntityId(7)));

        // Screen opens and closes on the same restaurant; the job-driven
        // hold keeps the room.
        assert!(rec.watch_room(EntityId(7)).is_none());
        assert!(rec.leave_room(EntityId(7)).is_none());
        assert!(rec.subscribed_entities().contains(&EntityId(7)));

        // A screen on an untracked restaurant drives both edges.
        assert_eq!(
            rec.watch_room(EntityId(99)),
            Some(ClientRequest::SubscribeEntity {
                entity_id: EntityId(99)
            })
        );
        assert_eq!(
            rec.leave_room(EntityId(99)),
            Some(ClientRequest::UnsubscribeEntity {
                entity_id: EntityId(99)
            })
        );
    }
}
