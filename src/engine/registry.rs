//! Owns every room for the lifetime of the service.

use crate::engine::{
    now_millis,
    room::{Room, RoomSettings},
};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A room behind its own lock. Rooms never share a lock with each other.
pub type SharedRoom = Arc<Mutex<Room>>;

/// Lazily creates rooms on first reference and keeps them until the registry is dropped.
///
/// There is no per-room deletion: a room named once by ingestion, a control
/// message or a subscription lives as long as the registry does.
pub struct RoomRegistry {
    rooms: DashMap<String, SharedRoom>,
    settings: Arc<RoomSettings>,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: DashMap::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    /// Returns the named room, creating it if this is the first reference.
    pub fn get_or_create(&self, name: &str) -> SharedRoom {
        if let Some(room) = self.rooms.get(name) {
            return Arc::clone(room.value());
        }
        let entry = self.rooms.entry(name.to_owned()).or_insert_with(|| {
            info!(room = %name, "Creating room");
            Arc::new(Mutex::new(Room::new(
                name,
                Arc::clone(&self.settings),
                now_millis(),
            )))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, name: &str) -> Option<SharedRoom> {
        self.rooms.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Point-in-time list of all rooms. The map lock is not held afterwards.
    pub fn rooms(&self) -> Vec<(String, SharedRoom)> {
        self.rooms
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms_count", &self.rooms.len())
            .field("settings", &self.settings)
            .finish()
    }
}
