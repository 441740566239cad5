// crowd-heatmap/src/ws/handler.rs

//! The control channel: admin frames that arrive on a subscription socket and
//! mutate the room they are subscribed to.

use crate::engine::now_millis;
use crate::ws::{
    protocol::{ControlAction, ControlMessage, ServerMessage},
    service::HeatmapService,
    types::{ConnectionId, Role, RoomName},
};
use tracing::{debug, info};

/// Per-connection state kept by the receiver task.
#[derive(Debug)]
pub struct ConnectionContext {
    /// The unique ID of the connection.
    pub conn_id: ConnectionId,
    /// The room this connection is subscribed to.
    pub room: RoomName,
    /// Informational role tag supplied on connect.
    pub role: Role,
    /// Socket peer address, as resolved by [`crate::auth::PeerAddr`]. Keys the
    /// control-secret lockout.
    pub peer: String,
}

impl HeatmapService {
    /// Handles one text frame from a client. Anything that is not a well-formed,
    /// authorized admin frame is ignored without a reply.
    pub(crate) async fn handle_client_text(&self, context: &ConnectionContext, text: &str) {
        let Some(message) = ControlMessage::parse(text) else {
            debug!("Ignoring non-JSON frame from client");
            return;
        };
        if !message.is_admin() {
            debug!(kind = ?message.kind, "Ignoring non-admin frame from client");
            return;
        }
        if !self.gate().authorize(&context.peer, message.secret.as_deref()) {
            return;
        }
        let Some(action) = message.action() else {
            debug!(action = ?message.action, "Ignoring unrecognized or malformed control action");
            return;
        };
        self.apply_control(&context.room, action).await;
    }

    /// Applies an already-authorized control action to a room and broadcasts the
    /// resulting state change to its subscribers.
    pub async fn apply_control(&self, room_name: &str, action: ControlAction) {
        let room = self.registry().get_or_create(room_name);
        let messages = {
            let mut room = room.lock().await;
            match action {
                ControlAction::Toggle => {
                    let active = room.toggle();
                    info!(room = %room_name, active, "Toggled room");
                    vec![ServerMessage::state(room.status())]
                }
                ControlAction::Reset => {
                    let ts = now_millis();
                    room.reset(ts);
                    info!(room = %room_name, "Reset room");
                    vec![ServerMessage::Reset { ts }, ServerMessage::state(room.status())]
                }
                ControlAction::SetSampleN(n) => {
                    if !room.set_client_sample_n(n) {
                        debug!(room = %room_name, value = n, "Ignoring invalid client sample factor");
                        return;
                    }
                    info!(room = %room_name, client_sample_n = n, "Changed client sample factor");
                    vec![ServerMessage::state(room.status())]
                }
            }
        };

        for message in &messages {
            self.broadcast(room_name, message);
        }
    }
}
