//! Consumer-facing handle over the sync actor.
//!
//! Reads return copies of table state, never references into the actor;
//! the change stream tells consumers when re-reading is worthwhile.

use futures_util::Stream;
use ractor::{Actor, ActorRef};
use serde_json::Value;
use sync_core::{EntityId, Job, JobId, QueueItem, QueueStats, ServerEvent, SyncError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::messages::{ConnectionState, SyncMessage, SyncNotification};
use crate::sink::RequestSink;
use crate::sync_actor::{SyncActor, SyncActorArgs};

/// Cheap-to-clone handle on a running sync actor.
#[derive(Clone)]
pub struct SyncHandle {
    actor: ActorRef<SyncMessage>,
}

impl SyncHandle {
    /// Spawn the sync actor with its outbound sink and return a handle
    /// plus the actor's join handle.
    pub async fn spawn(
        config: SyncConfig,
        sink: Box<dyn RequestSink>,
    ) -> Result<(Self, JoinHandle<()>), SyncError> {
        let (actor, join) = Actor::spawn(None, SyncActor, SyncActorArgs { config, sink })
            .await
            .map_err(|e| SyncError::ActorUnavailable(e.to_string()))?;
        Ok((Self { actor }, join))
    }

    /// Wrap an already-spawned actor.
    pub fn from_actor(actor: ActorRef<SyncMessage>) -> Self {
        Self { actor }
    }

    pub fn transport_connecting(&self) -> Result<(), SyncError> {
        self.send(SyncMessage::TransportConnecting)
    }

    pub fn transport_up(&self) -> Result<(), SyncError> {
        self.send(SyncMessage::TransportUp)
    }

    pub fn transport_down(&self) -> Result<(), SyncError> {
        self.send(SyncMessage::TransportDown)
    }

    /// Feed a typed inbound event.
    pub fn deliver(&self, event: ServerEvent) -> Result<(), SyncError> {
        self.send(SyncMessage::Inbound {
            event: Box::new(event),
        })
    }

    /// Feed a raw `(event name, payload)` pair straight off the channel.
    pub fn deliver_raw(&self, event: impl Into<String>, payload: Value) -> Result<(), SyncError> {
        self.send(SyncMessage::InboundRaw {
            event: event.into(),
            payload,
        })
    }

    pub async fn job(&self, job_id: JobId) -> Result<Option<Job>, SyncError> {
        self.call(|reply| SyncMessage::GetJob { job_id, reply }).await
    }

    pub async fn active_jobs(&self) -> Result<Vec<Job>, SyncError> {
        self.call(|reply| SyncMessage::ListActiveJobs { reply }).await
    }

    pub async fn entity_jobs(&self, entity_id: EntityId) -> Result<Vec<Job>, SyncError> {
        self.call(|reply| SyncMessage::ListEntityJobs { entity_id, reply })
            .await
    }

    pub async fn queue_snapshot(&self) -> Result<(Vec<QueueItem>, QueueStats), SyncError> {
        self.call(|reply| SyncMessage::GetQueueSnapshot { reply })
            .await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, SyncError> {
        self.call(|reply| SyncMessage::GetConnectionState { reply })
            .await
    }

    /// Hold a restaurant's room open for the lifetime of a screen.
    pub fn watch_room(&self, entity_id: EntityId) -> Result<(), SyncError> {
        self.send(SyncMessage::WatchRoom { entity_id })
    }

    pub fn leave_room(&self, entity_id: EntityId) -> Result<(), SyncError> {
        self.send(SyncMessage::LeaveRoom { entity_id })
    }

    /// Subscribe to table-change notifications.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<SyncNotification>, SyncError> {
        self.call(|reply| SyncMessage::SubscribeChanges { reply })
            .await
    }

    /// Change notifications as a stream. Lagged receivers skip ahead
    /// rather than erroring; a consumer that fell behind re-reads the
    /// tables anyway.
    pub async fn changes(&self) -> Result<impl Stream<Item = SyncNotification>, SyncError> {
        let rx = self.subscribe().await?;
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => return Some((notification, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }

    pub fn shutdown(&self) -> Result<(), SyncError> {
        self.send(SyncMessage::Shutdown)
    }

    fn send(&self, message: SyncMessage) -> Result<(), SyncError> {
        self.actor
            .send_message(message)
            .map_err(|e| SyncError::ActorUnavailable(e.to_string()))
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(ractor::RpcReplyPort<T>) -> SyncMessage,
    ) -> Result<T, SyncError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(make(tx.into()))
            .map_err(|e| SyncError::ActorUnavailable(e.to_string()))?;
        rx.await
            .map_err(|_| SyncError::ActorUnavailable("reply dropped".to_string()))
    }
}
