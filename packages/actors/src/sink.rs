//! Outbound side of the channel.
//!
//! Every outbound call in this system is a fire-and-forget emit; where a
//! response exists it arrives later as an inbound event. The transport
//! supplies an implementation at construction time, so the actor never
//! touches a socket itself.

use sync_core::ClientRequest;
use tokio::sync::mpsc;

/// Fire-and-forget outbound request sink.
pub trait RequestSink: Send + 'static {
    /// Emit a request. A dead transport swallows it silently; the full
    /// resync on reconnect re-establishes ground truth.
    fn emit(&self, request: ClientRequest);
}

impl RequestSink for mpsc::UnboundedSender<ClientRequest> {
    fn emit(&self, request: ClientRequest) {
        if self.send(request).is_err() {
            tracing::debug!("request sink closed; emit dropped");
        }
    }
}
