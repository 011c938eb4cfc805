//! Event shapes crossing the pub/sub channel.
//!
//! Inbound events are at-least-once and possibly reordered; nothing here
//! dedupes or orders them, that is the state layer's job. This module only
//! fixes the wire shapes and turns raw `(event name, payload)` pairs into
//! typed values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{EntityId, Job, JobId, JobKind, QueueItem, QueueItemId, QueueStats, SyncError};

/// Events delivered by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Authoritative full job state, sent once per connection on request.
    JobsSnapshot {
        total: u64,
        jobs: Vec<Job>,
        timestamp: DateTime<Utc>,
    },
    /// Authoritative full queue state, sent once per connection on request.
    QueueSnapshot {
        total: u64,
        queue: Vec<QueueItem>,
        stats: QueueStats,
        timestamp: DateTime<Utc>,
    },

    /// Fine-grained progress for one job phase.
    JobProgress {
        job_id: JobId,
        entity_id: EntityId,
        #[serde(default)]
        kind: Option<JobKind>,
        /// Explicit per-phase sequence number; falls back to `current`
        /// when absent or zero.
        #[serde(default)]
        sequence: Option<u64>,
        current: u64,
        total: u64,
        percentage: u8,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        #[serde(default)]
        metadata: Option<Map<String, Value>>,
    },
    /// A job finished successfully. `entity_id`/`kind` ride along when the
    /// server has them, so a terminal record can be synthesized for a job
    /// this client never saw start.
    JobCompleted {
        job_id: JobId,
        #[serde(default)]
        entity_id: Option<EntityId>,
        #[serde(default)]
        kind: Option<JobKind>,
        timestamp: DateTime<Utc>,
    },
    /// A job failed.
    JobFailed {
        job_id: JobId,
        error: String,
        #[serde(default)]
        entity_id: Option<EntityId>,
        #[serde(default)]
        kind: Option<JobKind>,
    },
    /// A job was cancelled.
    JobCancelled {
        job_id: JobId,
        #[serde(default)]
        entity_id: Option<EntityId>,
        #[serde(default)]
        kind: Option<JobKind>,
    },
    /// The server flagged (or cleared) a job as abandoned mid-flight.
    JobInterrupted { job_id: JobId, interrupted: bool },

    /// A new item entered the queue. Signal only: fields are not trusted
    /// to rebuild the item, the receiver re-requests the queue snapshot.
    QueueJobAdded {
        queue_id: QueueItemId,
        kind: JobKind,
        entity_id: EntityId,
        position: u32,
        timestamp: DateTime<Utc>,
    },
    /// A waiting item was picked up and bound to a running job.
    QueueJobStarted {
        queue_id: QueueItemId,
        job_id: JobId,
        kind: JobKind,
        entity_id: EntityId,
        timestamp: DateTime<Utc>,
    },
    /// A queue item finished successfully.
    QueueJobCompleted {
        queue_id: QueueItemId,
        job_id: JobId,
        kind: JobKind,
        entity_id: EntityId,
        timestamp: DateTime<Utc>,
    },
    /// A queue item failed.
    QueueJobFailed {
        queue_id: QueueItemId,
        #[serde(default)]
        job_id: Option<JobId>,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A queue item was cancelled.
    QueueJobCancelled {
        queue_id: QueueItemId,
        entity_id: EntityId,
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    /// Parse a raw `(event name, payload)` pair as delivered by the
    /// transport into a typed event.
    ///
    /// A payload missing required fields (or carrying ill-typed ones) is
    /// the single error class this layer surfaces; there is no safe
    /// synthesis for it.
    pub fn parse(event: &str, payload: Value) -> Result<Self, SyncError> {
        let mut object = match payload {
            Value::Object(map) => map,
            other => {
                return Err(SyncError::MalformedEvent {
                    event: event.to_string(),
                    detail: format!("payload is not an object: {other}"),
                });
            }
        };
        object.insert("event".to_string(), Value::String(event.to_string()));

        serde_json::from_value(Value::Object(object)).map_err(|e| {
            if e.to_string().contains("unknown variant") {
                SyncError::UnknownEvent(event.to_string())
            } else {
                SyncError::MalformedEvent {
                    event: event.to_string(),
                    detail: e.to_string(),
                }
            }
        })
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::JobsSnapshot { .. } => "jobs_snapshot",
            ServerEvent::QueueSnapshot { .. } => "queue_snapshot",
            ServerEvent::JobProgress { .. } => "job_progress",
            ServerEvent::JobCompleted { .. } => "job_completed",
            ServerEvent::JobFailed { .. } => "job_failed",
            ServerEvent::JobCancelled { .. } => "job_cancelled",
            ServerEvent::JobInterrupted { .. } => "job_interrupted",
            ServerEvent::QueueJobAdded { .. } => "queue_job_added",
            ServerEvent::QueueJobStarted { .. } => "queue_job_started",
            ServerEvent::QueueJobCompleted { .. } => "queue_job_completed",
            ServerEvent::QueueJobFailed { .. } => "queue_job_failed",
            ServerEvent::QueueJobCancelled { .. } => "queue_job_cancelled",
        }
    }

    /// The job this event refers to, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            ServerEvent::JobProgress { job_id, .. }
            | ServerEvent::JobCompleted { job_id, .. }
            | ServerEvent::JobFailed { job_id, .. }
            | ServerEvent::JobCancelled { job_id, .. }
            | ServerEvent::JobInterrupted { job_id, .. }
            | ServerEvent::QueueJobStarted { job_id, .. }
            | ServerEvent::QueueJobCompleted { job_id, .. } => Some(job_id),
            ServerEvent::QueueJobFailed { job_id, .. } => job_id.as_ref(),
            _ => None,
        }
    }
}

/// Outbound requests. Fire-and-forget: responses, where any exist, arrive
/// as further inbound events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Join the room for one restaurant's job events.
    SubscribeEntity { entity_id: EntityId },
    /// Leave a restaurant's room.
    UnsubscribeEntity { entity_id: EntityId },
    /// Ask for the authoritative `jobs_snapshot`.
    RequestJobsSnapshot,
    /// Ask for the authoritative `queue_snapshot`.
    RequestQueueSnapshot,
}
