//! The connection lifecycle actor.
//!
//! Owns the reconciler and is the single writer to it. Reacts to
//! transport up/down notifications: on connect it requests authoritative
//! snapshots and starts the ledger sweep ticker; on disconnect it stops
//! the ticker but deliberately keeps both tables, so the UI shows
//! last-known state instead of an empty list while the transport's own
//! backoff retries.

use ractor::{Actor, ActorProcessingErr, ActorRef};
use sync_core::ServerEvent;
use sync_state::Reconciler;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::messages::{ConnectionState, SyncMessage, SyncNotification};
use crate::sink::RequestSink;

/// Arguments for spawning the sync actor.
pub struct SyncActorArgs {
    pub config: SyncConfig,
    pub sink: Box<dyn RequestSink>,
}

/// State owned by the sync actor.
pub struct SyncActorState {
    config: SyncConfig,
    connection: ConnectionState,
    reconciler: Reconciler,
    sink: Box<dyn RequestSink>,
    notify_tx: broadcast::Sender<SyncNotification>,
    sweeper: Option<JoinHandle<()>>,
}

impl SyncActorState {
    fn new(args: SyncActorArgs) -> Self {
        let (notify_tx, _) = broadcast::channel(args.config.notify_capacity);
        Self {
            reconciler: Reconciler::new(args.config.completion_retention),
            config: args.config,
            connection: ConnectionState::Disconnected,
            sink: args.sink,
            notify_tx,
            sweeper: None,
        }
    }

    /// Run one event through the reconciler and act on the outcome.
    fn apply(&mut self, event: ServerEvent, myself: &ActorRef<SyncMessage>) {
        let outcome = self.reconciler.apply(event);

        for request in outcome.requests {
            self.sink.emit(request);
        }

        if let Some(queue_id) = outcome.evict_after_grace {
            let grace = self.config.failed_item_grace;
            let myself = myself.clone();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                // The actor may be gone by now; nothing left to evict then.
                let _ = myself.send_message(SyncMessage::EvictFailedItem { queue_id });
            });
        }

        if outcome.jobs_changed {
            let _ = self.notify_tx.send(SyncNotification::JobsChanged);
        }
        if outcome.queue_changed {
            let _ = self.notify_tx.send(SyncNotification::QueueChanged);
        }
    }

    /// Start the periodic ledger sweep. Idempotent: a second call while a
    /// ticker is alive does nothing, so repeated connect notifications
    /// never stack timers. Returns whether a fresh ticker was spawned.
    fn start_sweeper(&mut self, myself: &ActorRef<SyncMessage>) -> bool {
        if self.sweeper.is_some() {
            return false;
        }
        let interval = self.config.sweep_interval;
        let myself = myself.clone();
        self.sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it, there is nothing
            // to sweep yet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if myself.send_message(SyncMessage::SweepLedger).is_err() {
                    break;
                }
            }
        }));
        true
    }

    /// Stop the sweep ticker. Safe to call when it never started.
    fn stop_sweeper(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

/// Actor reconciling the inbound event stream into client-visible state.
pub struct SyncActor;

impl Actor for SyncActor {
    type Msg = SyncMessage;
    type State = SyncActorState;
    type Arguments = SyncActorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job sync actor");
        Ok(SyncActorState::new(args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SyncMessage::TransportConnecting => {
                state.connection = ConnectionState::Connecting;
                tracing::debug!("transport connecting");
            }

            SyncMessage::TransportUp => {
                state.connection = ConnectionState::Connected;
                tracing::info!("transport connected, requesting full resync");
                state.start_sweeper(&myself);
                state.sink.emit(sync_core::ClientRequest::RequestJobsSnapshot);
                state.sink.emit(sync_core::ClientRequest::RequestQueueSnapshot);
            }

            SyncMessage::TransportDown => {
                state.connection = ConnectionState::Disconnected;
                // Keep the tables: last-known state stays visible while
                // the transport retries.
                tracing::info!("transport disconnected, state frozen until resync");
                state.stop_sweeper();
            }

            SyncMessage::Inbound { event } => {
                state.apply(*event, &myself);
            }

            SyncMessage::InboundRaw { event, payload } => {
                match ServerEvent::parse(&event, payload) {
                    Ok(parsed) => state.apply(parsed, &myself),
                    Err(err) => {
                        tracing::warn!(event, %err, "dropping undecodable event");
                    }
                }
            }

            SyncMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.reconciler.job(&job_id));
            }

            SyncMessage::ListActiveJobs { reply } => {
                let _ = reply.send(state.reconciler.active_jobs());
            }

            SyncMessage::ListEntityJobs { entity_id, reply } => {
                let _ = reply.send(state.reconciler.jobs_for_entity(entity_id));
            }

            SyncMessage::GetQueueSnapshot { reply } => {
                let _ = reply.send(state.reconciler.queue_snapshot());
            }

            SyncMessage::WatchRoom { entity_id } => {
                if let Some(request) = state.reconciler.watch_room(entity_id) {
                    state.sink.emit(request);
                }
            }

            SyncMessage::LeaveRoom { entity_id } => {
                if let Some(request) = state.reconciler.leave_room(entity_id) {
                    state.sink.emit(request);
                }
            }

            SyncMessage::SubscribeChanges { reply } => {
                let _ = reply.send(state.notify_tx.subscribe());
            }

            SyncMessage::GetConnectionState { reply } => {
                let _ = reply.send(state.connection);
            }

            SyncMessage::SweepLedger => {
                let swept = state.reconciler.sweep_ledger();
                if swept > 0 {
                    tracing::debug!(swept, "completion ledger swept");
                }
            }

            SyncMessage::EvictFailedItem { queue_id } => {
                if state.reconciler.evict_queue_item(&queue_id) {
                    let _ = state.notify_tx.send(SyncNotification::QueueChanged);
                }
            }

            SyncMessage::Shutdown => {
                tracing::info!("Shutting down job sync actor");
                state.stop_sweeper();
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.stop_sweeper();
        Ok(())
    }
}
