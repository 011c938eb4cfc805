//! Core domain types for the realtime job/queue sync layer.
//!
//! This crate contains shared types used across all packages:
//! - Job and JobStatus for long-running background work
//! - QueueItem and QueueStats for work awaiting an execution slot
//! - ServerEvent / ClientRequest for the pub/sub channel

mod error;
mod events;
mod job;
mod queue;

pub use error::SyncError;
pub use events::{ClientRequest, ServerEvent};
pub use job::{EntityId, Job, JobId, JobKind, JobStatus, Progress};
pub use queue::{QueueItem, QueueItemId, QueueStats, QueueStatus};
