//! JSON frames exchanged over the subscription socket.

use crate::engine::{
    grid::GridSize,
    room::{RoomSnapshot, RoomStatus},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dense grid counts as sent in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GridCounts {
    pub w: usize,
    pub h: usize,
    pub counts: Vec<u32>,
}

/// Server-to-client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Current room state. The grid size is only included in the greeting.
    State {
        state: RoomStatus,
        #[serde(rename = "gridSize", skip_serializing_if = "Option::is_none")]
        grid_size: Option<GridSize>,
    },
    Snapshot {
        grid: GridCounts,
        #[serde(rename = "sampleDots")]
        sample_dots: Vec<[f32; 2]>,
        ts: u64,
    },
    Reset {
        ts: u64,
    },
}

impl ServerMessage {
    pub fn greeting(state: RoomStatus, grid_size: GridSize) -> Self {
        ServerMessage::State {
            state,
            grid_size: Some(grid_size),
        }
    }

    pub fn state(state: RoomStatus) -> Self {
        ServerMessage::State {
            state,
            grid_size: None,
        }
    }

    pub fn snapshot(snapshot: RoomSnapshot, ts: u64) -> Self {
        ServerMessage::Snapshot {
            grid: GridCounts {
                w: snapshot.grid.w,
                h: snapshot.grid.h,
                counts: snapshot.counts,
            },
            sample_dots: snapshot.dots,
            ts,
        }
    }
}

/// A control frame as it arrives from a client, before validation.
///
/// Fields are loose on purpose: anything that does not describe a known
/// action with a well-formed payload is dropped by [`ControlMessage::action`].
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub action: Option<String>,
    pub value: Option<Value>,
    pub secret: Option<String>,
}

/// A validated control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Toggle,
    Reset,
    SetSampleN(u32),
}

impl ControlMessage {
    /// Parses a raw text frame. Non-JSON or non-object frames yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn is_admin(&self) -> bool {
        self.kind.as_deref() == Some("admin")
    }

    /// The requested action, if recognized and well formed.
    pub fn action(&self) -> Option<ControlAction> {
        match self.action.as_deref()? {
            "toggle" => Some(ControlAction::Toggle),
            "reset" => Some(ControlAction::Reset),
            "setSampleN" => positive_integer(self.value.as_ref()?).map(ControlAction::SetSampleN),
            _ => None,
        }
    }
}

/// Accepts `3` and `3.0`, rejects zero, negatives, fractions and non-numbers.
fn positive_integer(value: &Value) -> Option<u32> {
    let n = value.as_u64().or_else(|| {
        let f = value.as_f64()?;
        (f.fract() == 0.0 && f >= 1.0 && f <= f64::from(u32::MAX)).then_some(f as u64)
    })?;
    u32::try_from(n).ok().filter(|&n| n >= 1)
}
