//! Error taxonomy for the sync core.
//!
//! Most anomalies on the event channel are policy outcomes, not errors:
//! stale deliveries and post-completion replays are dropped silently, an
//! unknown job is synthesized, a disconnect freezes state until resync.
//! Only payloads we cannot make sense of surface as errors.

use thiserror::Error;

/// Errors surfaced by the sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A payload is missing required fields or carries ill-typed ones.
    /// Logged and dropped; there is no safe synthesis for it.
    #[error("malformed '{event}' payload: {detail}")]
    MalformedEvent { event: String, detail: String },

    /// The transport delivered an event name this client does not know.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The sync actor is gone (stopped or crashed) while a caller was
    /// talking to it.
    #[error("sync actor unavailable: {0}")]
    ActorUnavailable(String),
}
