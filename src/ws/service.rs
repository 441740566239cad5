//! The primary `HeatmapService` that owns the rooms, manages subscriber
//! connections and runs the periodic broadcast.

use crate::auth::AdminGate;
use crate::config::Config;
use crate::engine::{
    now_millis, now_secs,
    registry::RoomRegistry,
    room::{Click, IngestOutcome, RoomStatus},
};
use crate::ws::{
    handler::ConnectionContext,
    protocol::ServerMessage,
    types::{ConnectionId, Delivery, OUTBOUND_QUEUE_CAPACITY, Role, RoomName, WsState},
};
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{
    SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Aggregates clicks per room and fans snapshots out to subscribed sockets.
#[derive(Debug)]
pub struct HeatmapService {
    state: WsState,
    registry: RoomRegistry,
    gate: AdminGate,
    config: Config,
}

impl HeatmapService {
    /// Creates the service with an empty room registry. Background loops are not
    /// started; see [`HeatmapService::spawn_background_tasks`].
    pub fn new(config: Config) -> Arc<Self> {
        let gate = AdminGate::new(
            config.admin_secret.clone(),
            config.admin_max_failed_attempts,
            Duration::from_secs(config.admin_lockout_secs),
        );
        Arc::new(Self {
            state: WsState::default(),
            registry: RoomRegistry::new(config.room_settings()),
            gate,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub(crate) fn gate(&self) -> &AdminGate {
        &self.gate
    }

    /// Resolves a requested room name, falling back to the default streamer.
    pub fn room_name(&self, requested: Option<&str>) -> RoomName {
        requested
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.config.default_streamer)
            .to_owned()
    }

    /// Admits a batch of clicks from `source` into a room.
    pub async fn ingest<I>(&self, room_name: &str, source: &str, clicks: I) -> IngestOutcome
    where
        I: IntoIterator<Item = Option<Click>>,
    {
        let room = self.registry.get_or_create(room_name);
        let outcome = room.lock().await.ingest(source, clicks, now_secs());
        debug!(
            room = %room_name,
            %source,
            accepted = outcome.accepted,
            dropped = outcome.dropped,
            "Ingested batch"
        );
        outcome
    }

    pub async fn room_status(&self, room_name: &str) -> RoomStatus {
        let room = self.registry.get_or_create(room_name);
        room.lock().await.status()
    }

    /// Number of live subscribers for a room.
    pub fn subscriber_count(&self, room_name: &str) -> usize {
        self.state.subscribers(room_name).len()
    }

    /// Entry point called by the upgrade handler for each new connection.
    #[instrument(skip_all, fields(conn_id, room = %room, role = %role, %peer))]
    pub async fn handle_connection(
        self: Arc<Self>,
        socket: WebSocket,
        room: RoomName,
        role: Role,
        peer: String,
    ) {
        let conn_id = ConnectionId::new_v4();
        tracing::Span::current().record("conn_id", tracing::field::display(conn_id));

        let (sink, stream) = socket.split();
        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        tokio::spawn(run_writer(conn_id, sink, queue));

        // The greeting goes on the queue before the connection becomes visible to
        // broadcasts, so it is always the first frame the client sees.
        let status = self.room_status(&room).await;
        let greeting = ServerMessage::greeting(status, self.registry.settings().grid);
        match encode(&greeting) {
            Some(frame) => {
                if outbound.try_send(frame).is_err() {
                    warn!("Could not queue greeting. Client connection is likely dead.");
                    return;
                }
            }
            None => return,
        }

        self.state.subscribe(conn_id, room.clone(), outbound);
        info!("Client connected and subscribed.");

        let context = ConnectionContext {
            conn_id,
            room,
            role,
            peer,
        };
        let service = Arc::clone(&self);
        tokio::spawn(async move { service.run_client_message_receiver(stream, context).await });
    }

    /// Dedicated task that runs for each client, processing its incoming frames.
    #[instrument(skip(self, stream, context), fields(conn_id = %context.conn_id, room = %context.room, role = %context.role))]
    async fn run_client_message_receiver(
        &self,
        mut stream: SplitStream<WebSocket>,
        context: ConnectionContext,
    ) {
        debug!("Starting message receiver loop for client.");
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => self.handle_client_text(&context, text.as_str()).await,
                Message::Close(_) => {
                    debug!("Received close frame from client.");
                    break;
                }
                _ => {}
            }
        }
        self.state.unsubscribe(&context.conn_id, &context.room);
        info!("Client disconnected.");
    }

    /// Queues a message for every subscriber of a room without waiting on any socket.
    ///
    /// A full queue skips the frame for that subscriber only; a closed queue drops
    /// the subscriber.
    pub(crate) fn broadcast(&self, room_name: &str, message: &ServerMessage) {
        let subscribers = self.state.subscribers(room_name);
        if subscribers.is_empty() {
            return;
        }
        let Some(frame) = encode(message) else { return };
        self.fan_out(room_name, &subscribers, frame);
    }

    fn fan_out(&self, room_name: &str, subscribers: &[ConnectionId], frame: Message) {
        for conn_id in subscribers {
            match self.state.deliver(conn_id, frame.clone()) {
                Delivery::Queued => {}
                Delivery::Skipped => {
                    debug!(%conn_id, room = %room_name, "Outbound queue full, skipping frame");
                }
                Delivery::Closed => {
                    warn!(%conn_id, room = %room_name, "Dropping subscriber, client likely disconnected");
                    self.state.unsubscribe(conn_id, room_name);
                }
            }
        }
    }

    /// One broadcast tick: snapshot every room and queue it for its subscribers.
    ///
    /// Each room's lock is held only while copying the grid and ring; encoding and
    /// queueing happen after it is released.
    pub async fn broadcast_snapshots(&self) {
        for (name, room) in self.registry.rooms() {
            let snapshot = room.lock().await.snapshot();
            let subscribers = self.state.subscribers(&name);
            let message = ServerMessage::snapshot(snapshot, now_millis());
            if subscribers.is_empty() {
                continue;
            }
            if let Some(frame) = encode(&message) {
                self.fan_out(&name, &subscribers, frame);
            }
        }
    }

    /// Runs [`HeatmapService::broadcast_snapshots`] on a fixed period forever.
    pub async fn run_broadcast_loop(self: Arc<Self>) {
        let period = self.config.snapshot_period();
        info!(period_ms = period.as_millis() as u64, "Starting snapshot broadcast loop");
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            self.broadcast_snapshots().await;
        }
    }

    /// Logs per-room ingest rates over `interval` and zeroes the counters.
    pub async fn flush_stats(&self, interval: Duration) {
        let secs = interval.as_secs().max(1);
        for (name, room) in self.registry.rooms() {
            let (stats, status) = {
                let mut room = room.lock().await;
                (room.take_stats(), room.status())
            };
            info!(
                room = %name,
                "[stats] accepted={}/s dropped={}/s sampleN_client={}",
                stats.accepted / secs,
                stats.dropped / secs,
                status.client_sample_n
            );
        }
    }

    pub async fn run_stats_logger(self: Arc<Self>, interval: Duration) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first line covers a full interval.
        tick.tick().await;
        loop {
            tick.tick().await;
            self.flush_stats(interval).await;
        }
    }

    /// Starts the broadcast loop and, if enabled, the stats logger.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![tokio::spawn(Arc::clone(self).run_broadcast_loop())];
        if let Some(interval) = self.config.stats_interval() {
            handles.push(tokio::spawn(Arc::clone(self).run_stats_logger(interval)));
        }
        handles
    }
}

/// Drains a connection's queue into its socket until either side goes away.
async fn run_writer(
    conn_id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Message>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = sink.send(frame).await {
            warn!(%conn_id, "Failed to send to client sink: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(Utf8Bytes::from(json))),
        Err(e) => {
            error!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}
