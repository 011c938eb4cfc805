//! Queue domain types for work waiting on an execution slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityId, JobId, JobKind};

/// Unique identifier for a queue item. Server-assigned, opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(pub String);

impl QueueItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueueItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for an execution slot.
    #[default]
    Waiting,
    /// A worker picked the item up.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl QueueStatus {
    /// Check if the item is done, for better or worse.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work waiting for, or occupying, an execution slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier for this queue entry.
    pub queue_id: QueueItemId,
    /// Bound to the running job once processing starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Type of work queued.
    pub kind: JobKind,
    /// Restaurant the work targets.
    pub entity_id: EntityId,
    /// Current status.
    pub status: QueueStatus,
    /// 1-based rank among waiting items. Only meaningful while `Waiting`.
    #[serde(default)]
    pub position: u32,
    /// When the item entered the queue.
    pub queued_at: DateTime<Utc>,
    /// When processing started, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the item reached a terminal state, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueItem {
    /// Create a new waiting queue item.
    pub fn new(queue_id: QueueItemId, kind: JobKind, entity_id: EntityId, position: u32) -> Self {
        Self {
            queue_id,
            job_id: None,
            kind,
            entity_id,
            status: QueueStatus::Waiting,
            position,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Aggregate counters maintained in lock-step with queue mutations.
///
/// Counters never go negative: every decrement saturates at zero, because
/// at-least-once delivery can replay transitions in an order that would
/// otherwise under-count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub total: u64,
    pub waiting: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl QueueStats {
    /// Items still in flight (waiting + processing).
    pub fn active(&self) -> u64 {
        self.waiting + self.processing
    }

    /// Items that reached a terminal state.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// Decrement the bucket a status maps to, clamped at zero.
    pub fn decrement(&mut self, status: QueueStatus) {
        let bucket = self.bucket_mut(status);
        *bucket = bucket.saturating_sub(1);
    }

    /// Increment the bucket a status maps to.
    pub fn increment(&mut self, status: QueueStatus) {
        let bucket = self.bucket_mut(status);
        *bucket = bucket.saturating_add(1);
    }

    fn bucket_mut(&mut self, status: QueueStatus) -> &mut u64 {
        match status {
            QueueStatus::Waiting => &mut self.waiting,
            QueueStatus::Processing => &mut self.processing,
            QueueStatus::Completed => &mut self.completed,
            QueueStatus::Failed => &mut self.failed,
            QueueStatus::Cancelled => &mut self.cancelled,
        }
    }
}
