//! WebSocket subscription layer: connection lifecycle, the control channel and
//! the snapshot broadcast loop.

pub mod handler;
pub mod protocol;
pub mod service;
pub mod types;
pub mod upgrade;
