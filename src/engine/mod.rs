//! The aggregation core: binning, sampling, admission control and per-room state.
//!
//! Nothing in here touches the network. The `ws` and `http` modules drive these
//! types and do all I/O outside of the room locks.

pub mod grid;
pub mod limiter;
pub mod registry;
pub mod ring;
pub mod room;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wall-clock Unix time in whole seconds, the rate limiter's window key.
pub fn now_secs() -> u64 {
    now_millis() / 1000
}
