//! Provides the Axum handler for upgrading subscription requests to WebSockets.

use crate::auth::PeerAddr;
use crate::ws::{service::HeatmapService, types::Role};
use axum::{
    extract::{Query, State, ws::WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Query parameters accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeQuery {
    /// Room to subscribe to. Defaults to the configured streamer.
    pub streamer: Option<String>,
    /// Informational role tag (`viewer`, `overlay`/`obs`, `admin`).
    pub role: Option<String>,
}

/// Upgrades the connection and hands it to the [`HeatmapService`].
///
/// The room is created on first reference. The new socket immediately receives
/// a `state` frame and from then on every snapshot broadcast for its room.
/// Control frames sent on it are handled by the service's control channel, with
/// failed secrets counted against the socket's peer address.
#[instrument(skip_all, fields(streamer = ?query.streamer, role = ?query.role, %peer))]
pub async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(service): State<Arc<HeatmapService>>,
    Query(query): Query<SubscribeQuery>,
    PeerAddr(peer): PeerAddr,
) -> Response {
    let room = service.room_name(query.streamer.as_deref());
    let role = Role::parse(query.role.as_deref());
    service.registry().get_or_create(&room);

    ws.on_upgrade(move |socket| async move {
        service.handle_connection(socket, room, role, peer).await;
    })
}
