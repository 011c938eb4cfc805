//! Actor layer for the realtime job/queue sync core.
//!
//! One actor owns all reconciliation state and is its single writer.
//! External collaborators talk to it through [`SyncHandle`]: the
//! transport feeds connect/disconnect notifications and raw events in,
//! UI code reads table copies and listens on the change stream.

mod client;
mod config;
mod messages;
mod sink;
mod sync_actor;

pub use client::SyncHandle;
pub use config::SyncConfig;
pub use messages::{ConnectionState, SyncMessage, SyncNotification};
pub use sink::RequestSink;
pub use sync_actor::{SyncActor, SyncActorArgs, SyncActorState};

// Re-export ractor's concurrency primitives for callers doing raw rpc.
pub use ractor::concurrency;

// Re-export core types for convenience
pub use sync_core::{
    ClientRequest, EntityId, Job, JobId, JobKind, JobStatus, Progress, QueueItem, QueueItemId,
    QueueStats, QueueStatus, ServerEvent, SyncError,
};
