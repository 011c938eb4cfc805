//! Canonical in-memory store of queued work items.
//!
//! Aggregate counters move in lock-step with every item mutation and all
//! decrements saturate at zero: at-least-once delivery can replay a
//! transition (a duplicate `queue_job_started` after a resync, say) in an
//! order that would otherwise under- or over-count.

use chrono::{DateTime, Utc};
use sync_core::{JobId, QueueItem, QueueItemId, QueueStats, QueueStatus};

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct QueueTable {
    items: HashMap<QueueItemId, QueueItem>,
    stats: QueueStats,
}

impl QueueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table with an authoritative snapshot.
    pub fn apply_snapshot(&mut self, items: Vec<QueueItem>, stats: QueueStats) {
        self.items = items
            .into_iter()
            .map(|i| (i.queue_id.clone(), i))
            .collect();
        self.stats = stats;
    }

    /// Transition a waiting item to processing and bind it to its job.
    /// A repeat delivery for an item already processing is a no-op, so
    /// counters are never double-moved.
    pub fn mark_processing(
        &mut self,
        queue_id: &QueueItemId,
        job_id: JobId,
        timestamp: DateTime<Utc>,
    ) -> bool {
        match self.items.get_mut(queue_id) {
            Some(item) if item.status == QueueStatus::Waiting => {
                item.status = QueueStatus::Processing;
                item.job_id = Some(job_id);
                item.started_at = Some(timestamp);
                item.position = 0;
                self.stats.decrement(QueueStatus::Waiting);
                self.stats.increment(QueueStatus::Processing);
                self.recompute_positions();
                true
            }
            _ => false,
        }
    }

    /// Completion evicts immediately; there is nothing useful to display.
    pub fn remove_completed(&mut self, queue_id: &QueueItemId) -> bool {
        self.finish(queue_id, QueueStatus::Completed, None, true)
    }

    /// Mark an item failed. It stays in the table so the failure is
    /// visible for a grace period; the owning lifecycle schedules the
    /// matching [`evict`](Self::evict).
    pub fn mark_failed(&mut self, queue_id: &QueueItemId, error: String) -> bool {
        self.finish(queue_id, QueueStatus::Failed, Some(error), false)
    }

    /// Cancellation evicts immediately.
    pub fn remove_cancelled(&mut self, queue_id: &QueueItemId) -> bool {
        self.finish(queue_id, QueueStatus::Cancelled, None, true)
    }

    /// Remove a terminal item from the table. Safe to call when the item
    /// is already gone or, due to reordering, never went terminal.
    pub fn evict(&mut self, queue_id: &QueueItemId) -> bool {
        match self.items.get(queue_id) {
            Some(item) if item.status.is_terminal() => {
                self.items.remove(queue_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, queue_id: &QueueItemId) -> Option<&QueueItem> {
        self.items.get(queue_id)
    }

    /// Consistent copy for consumers: processing items first, then waiting
    /// by position, then terminal stragglers awaiting eviction.
    pub fn snapshot(&self) -> (Vec<QueueItem>, QueueStats) {
        let mut items: Vec<QueueItem> = self.items.values().cloned().collect();
        items.sort_by(|a, b| {
            rank(a.status)
                .cmp(&rank(b.status))
                .then(a.position.cmp(&b.position))
                .then(a.queued_at.cmp(&b.queued_at))
        });
        (items, self.stats)
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn finish(
        &mut self,
        queue_id: &QueueItemId,
        status: QueueStatus,
        error: Option<String>,
        evict: bool,
    ) -> bool {
        let Some(item) = self.items.get_mut(queue_id) else {
            return false;
        };
        if item.status.is_terminal() {
            return false;
        }

        self.stats.decrement(item.status);
        self.stats.increment(status);

        item.status = status;
        item.error = error;
        item.completed_at = Some(Utc::now());
        item.position = 0;

        if evict {
            self.items.remove(queue_id);
        }
        self.recompute_positions();
        true
    }

    /// Rerank waiting items 1-based. Order: previous rank, then queue age.
    fn recompute_positions(&mut self) {
        let mut waiting: Vec<&mut QueueItem> = self
            .items
            .values_mut()
            .filter(|i| i.status == QueueStatus::Waiting)
            .collect();
        waiting.sort_by(|a, b| a.position.cmp(&b.position).then(a.queued_at.cmp(&b.queued_at)));
        for (index, item) in waiting.into_iter().enumerate() {
            item.position = index as u32 + 1;
        }
    }
}

fn rank(status: QueueStatus) -> u8 {
    match status {
        QueueStatus::Processing => 0,
        QueueStatus::Waiting => 1,
        QueueStatus::Failed => 2,
        QueueStatus::Completed => 3,
        QueueStatus::Cancelled => 4,
    }
}
