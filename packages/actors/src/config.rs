//! Tunables for the sync lifecycle.

use std::time::Duration;

/// Configuration for the sync actor.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long completed-job ids stay in the ledger.
    pub completion_retention: Duration,
    /// Interval between ledger sweeps while connected. One sweep per
    /// retention window by default.
    pub sweep_interval: Duration,
    /// How long a failed queue item stays visible before eviction. Not
    /// load-bearing; purely a display choice.
    pub failed_item_grace: Duration,
    /// Capacity of the change-notification broadcast channel.
    pub notify_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            completion_retention: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            failed_item_grace: Duration::from_secs(3),
            notify_capacity: 1024,
        }
    }
}

impl SyncConfig {
    /// Set the completion retention window, keeping the sweep interval
    /// locked to it.
    pub fn with_completion_retention(mut self, retention: Duration) -> Self {
        self.completion_retention = retention;
        self.sweep_interval = retention;
        self
    }

    /// Set the sweep interval independently of the retention window.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set how long failed queue items remain visible.
    pub fn with_failed_item_grace(mut self, grace: Duration) -> Self {
        self.failed_item_grace = grace;
        self
    }

    /// Set the notification channel capacity.
    pub fn with_notify_capacity(mut self, capacity: usize) -> Self {
        self.notify_capacity = capacity;
        self
    }
}
