// crowd-heatmap/src/ws/types.rs

//! Internal types used by the `HeatmapService`.

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A unique identifier for a single WebSocket connection.
pub type ConnectionId = Uuid;

/// A room identifier (the streamer name), used for subscription mapping.
pub type RoomName = String;

/// Frames queued per connection before further broadcasts to it are skipped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// The sending half of a connection's outbound queue. A dedicated writer task
/// drains the other half into the socket, so producers never wait on the network.
pub type Outbound = mpsc::Sender<Message>;

/// What a connection declared itself as when it subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Viewer,
    Overlay,
    Admin,
}

impl Role {
    /// Unknown or missing tags are treated as viewers.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("overlay") | Some("obs") => Role::Overlay,
            Some("admin") => Role::Admin,
            _ => Role::Viewer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Viewer => "viewer",
            Role::Overlay => "overlay",
            Role::Admin => "admin",
        })
    }
}

/// Outcome of handing a frame to one connection's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    /// The queue is full; this frame is skipped for that connection only.
    Skipped,
    /// The writer is gone; the connection should be dropped from its room.
    Closed,
}

/// Holds the connection and subscription maps for the service.
///
/// `DashMap` is used for concurrent access without `async` locks.
#[derive(Default)]
pub(crate) struct WsState {
    /// Maps a `ConnectionId` to its outbound queue.
    pub(crate) connections: DashMap<ConnectionId, Outbound>,

    /// Maps a room to the set of `ConnectionId`s subscribed to it.
    pub(crate) subscriptions: DashMap<RoomName, HashSet<ConnectionId>>,
}

impl WsState {
    pub(crate) fn subscribe(&self, conn_id: ConnectionId, room: RoomName, outbound: Outbound) {
        self.connections.insert(conn_id, outbound);
        self.subscriptions.entry(room).or_default().insert(conn_id);
    }

    pub(crate) fn unsubscribe(&self, conn_id: &ConnectionId, room: &str) {
        self.connections.remove(conn_id);
        let now_empty = match self.subscriptions.get_mut(room) {
            Some(mut subscribers) => {
                subscribers.remove(conn_id);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.subscriptions.remove_if(room, |_, s| s.is_empty());
        }
    }

    /// Current subscriber ids for a room. The map guard is released before returning.
    pub(crate) fn subscribers(&self, room: &str) -> Vec<ConnectionId> {
        self.subscriptions
            .get(room)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn deliver(&self, conn_id: &ConnectionId, message: Message) -> Delivery {
        let Some(outbound) = self.connections.get(conn_id).map(|o| o.clone()) else {
            return Delivery::Closed;
        };
        match outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Skipped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl fmt::Debug for WsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsState")
            .field("connections_count", &self.connections.len())
            .field("subscriptions_count", &self.subscriptions.len())
            .finish()
    }
}
