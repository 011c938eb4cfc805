//! Message types for the sync actor.

use ractor::RpcReplyPort;
use serde_json::Value;
use sync_core::{EntityId, Job, JobId, QueueItem, QueueItemId, QueueStats, ServerEvent};
use tokio::sync::broadcast;

/// Change signal published after any table mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncNotification {
    /// The job table changed.
    JobsChanged,
    /// The queue table or its stats changed.
    QueueChanged,
}

/// Connection lifecycle of the event channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Messages for the SyncActor.
#[derive(Debug)]
pub enum SyncMessage {
    /// The transport started a connection attempt.
    TransportConnecting,

    /// The transport (re)connected; resync from snapshots.
    TransportUp,

    /// The transport dropped. State is frozen, not cleared.
    TransportDown,

    /// A typed inbound event.
    Inbound { event: Box<ServerEvent> },

    /// A raw `(event name, payload)` pair straight off the channel.
    /// Malformed payloads are logged and dropped here.
    InboundRaw { event: String, payload: Value },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// List every job still active.
    ListActiveJobs { reply: RpcReplyPort<Vec<Job>> },

    /// List jobs for one restaurant, newest first.
    ListEntityJobs {
        entity_id: EntityId,
        reply: RpcReplyPort<Vec<Job>>,
    },

    /// Consistent copy of the queue and its counters.
    GetQueueSnapshot {
        reply: RpcReplyPort<(Vec<QueueItem>, QueueStats)>,
    },

    /// Take a screen-lifetime hold on an entity's room.
    WatchRoom { entity_id: EntityId },

    /// Drop a screen-lifetime hold.
    LeaveRoom { entity_id: EntityId },

    /// Subscribe to change notifications.
    SubscribeChanges {
        reply: RpcReplyPort<broadcast::Receiver<SyncNotification>>,
    },

    /// Current lifecycle state, mostly for diagnostics.
    GetConnectionState { reply: RpcReplyPort<ConnectionState> },

    /// Periodic ledger sweep tick.
    SweepLedger,

    /// Grace period for a failed queue item elapsed.
    EvictFailedItem { queue_id: QueueItemId },

    /// Stop the actor.
    Shutdown,
}
