//! Per-source fixed-window admission control.
//!
//! Each source key gets a one-second window `{second, count}`. Bursts are cut off
//! hard at `max_per_sec` and the count starts over when the wall-clock second
//! changes; there is no smoothing across boundaries.

use std::collections::HashMap;

/// How often (in seconds) stale windows are swept out of the map.
const SWEEP_EVERY_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    second: u64,
    count: u32,
}

/// Fixed-window rate limiter keyed by source address.
///
/// Memory stays proportional to the sources seen in the last few seconds: a window
/// whose second is not the current one behaves exactly like a missing entry, so
/// the periodic sweep can drop it without changing any admission decision.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_per_sec: u32,
    windows: HashMap<String, Window>,
    last_sweep: u64,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_per_sec: u32) -> Self {
        Self {
            enabled,
            max_per_sec: max_per_sec.max(1),
            windows: HashMap::new(),
            last_sweep: 0,
        }
    }

    /// Decides whether one more event from `source` fits in the window for `second`.
    ///
    /// A rejection leaves the window untouched.
    pub fn admit(&mut self, source: &str, second: u64) -> bool {
        if !self.enabled {
            return true;
        }
        self.maybe_sweep(second);

        let window = self
            .windows
            .entry(source.to_owned())
            .or_insert(Window { second, count: 0 });
        if window.second != second {
            *window = Window { second, count: 0 };
        }
        if window.count >= self.max_per_sec {
            return false;
        }
        window.count += 1;
        true
    }

    /// Number of source windows currently held.
    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }

    fn maybe_sweep(&mut self, now: u64) {
        if now.saturating_sub(self.last_sweep) < SWEEP_EVERY_SECS {
            return;
        }
        self.windows.retain(|_, w| w.second >= now);
        self.last_sweep = now;
    }
}
