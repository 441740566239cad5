//! Per-room aggregation state and the operations that mutate it.

use crate::engine::{grid::GridSize, limiter::RateLimiter, ring::RingBuffer};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Process-wide knobs shared by every room. Fixed at startup.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub grid: GridSize,
    pub ring_capacity: usize,
    /// Every Nth accepted event is copied into the recent-points ring.
    pub server_sample_n: u64,
    /// Initial advisory decimation factor handed to viewers.
    pub client_default_sample_n: u32,
    pub rate_limit_enabled: bool,
    pub rate_limit_max_per_sec: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            grid: GridSize::new(64, 36),
            ring_capacity: 2000,
            server_sample_n: 16,
            client_default_sample_n: 32,
            rate_limit_enabled: true,
            rate_limit_max_per_sec: 200,
        }
    }
}

/// The publicly visible part of a room, sent in `state` messages and the state endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub active: bool,
    /// Unix milliseconds of the last histogram clear (or room creation).
    pub last_reset: u64,
    /// Suggested client-side decimation. Advisory only; never used for admission.
    pub client_sample_n: u32,
}

/// A single click in normalized overlay coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    pub x: f64,
    pub y: f64,
}

impl Click {
    /// Reads `{x, y}` from an arbitrary JSON value. Anything without two numeric
    /// coordinates yields `None`. Extra fields such as `ts` are ignored.
    pub fn from_json(value: &Value) -> Option<Self> {
        let x = value.get("x")?.as_f64()?;
        let y = value.get("y")?.as_f64()?;
        Some(Self { x, y })
    }
}

/// Accepted/dropped counters since the last stats flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    /// Events refused by the rate limiter. Malformed and inactive-gate rejections
    /// are not counted here.
    pub dropped: u64,
}

/// Result of one ingestion batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub accepted: u64,
    pub dropped: u64,
    pub active: bool,
    pub client_sample_n: u32,
}

/// Copy of a room's histogram and recent points, taken under the room lock.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub grid: GridSize,
    /// Dense row-major counts, `grid.w * grid.h` long.
    pub counts: Vec<u32>,
    /// Recent sampled points, oldest first.
    pub dots: Vec<[f32; 2]>,
}

#[derive(Debug)]
pub struct Room {
    name: String,
    status: RoomStatus,
    grid: Vec<u32>,
    ring: RingBuffer,
    server_sample_counter: u64,
    limiter: RateLimiter,
    stats: IngestStats,
    settings: Arc<RoomSettings>,
}

impl Room {
    /// Creates an inactive room with an empty histogram.
    pub fn new(name: impl Into<String>, settings: Arc<RoomSettings>, now_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: RoomStatus {
                active: false,
                last_reset: now_ms,
                client_sample_n: settings.client_default_sample_n.max(1),
            },
            grid: vec![0; settings.grid.cells()],
            ring: RingBuffer::new(settings.ring_capacity),
            server_sample_counter: 0,
            limiter: RateLimiter::new(settings.rate_limit_enabled, settings.rate_limit_max_per_sec),
            stats: IngestStats::default(),
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn counts(&self) -> &[u32] {
        &self.grid
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Admits a batch of clicks from `source` during wall-clock `second`.
    ///
    /// Events are processed in order and independently; a batch may be partly
    /// accepted. `None` entries stand for malformed clicks and are skipped.
    pub fn ingest<I>(&mut self, source: &str, clicks: I, second: u64) -> IngestOutcome
    where
        I: IntoIterator<Item = Option<Click>>,
    {
        let mut accepted = 0;
        let mut dropped = 0;

        for click in clicks {
            let Some(click) = click else { continue };
            if !self.limiter.admit(source, second) {
                dropped += 1;
                continue;
            }
            if !self.status.active {
                continue;
            }

            let idx = self.settings.grid.bin(click.x, click.y);
            self.grid[idx] = self.grid[idx].saturating_add(1);
            self.sample(click);
            accepted += 1;
        }

        self.stats.accepted += accepted;
        self.stats.dropped += dropped;

        IngestOutcome {
            accepted,
            dropped,
            active: self.status.active,
            client_sample_n: self.status.client_sample_n,
        }
    }

    /// Deterministic every-Nth sampling into the recent-points ring.
    fn sample(&mut self, click: Click) {
        self.server_sample_counter += 1;
        if self.server_sample_counter % self.settings.server_sample_n.max(1) == 0 {
            self.ring.push(click.x as f32, click.y as f32);
        }
    }

    /// Flips the active gate and returns the new value.
    pub fn toggle(&mut self) -> bool {
        self.status.active = !self.status.active;
        self.status.active
    }

    /// Zeroes the histogram and empties the ring. The active flag is left alone.
    pub fn reset(&mut self, now_ms: u64) {
        self.grid.fill(0);
        self.ring.reset();
        self.status.last_reset = now_ms;
    }

    /// Applies a new advisory sample factor. Returns `false` (and changes nothing)
    /// unless `value` is at least one.
    pub fn set_client_sample_n(&mut self, value: u32) -> bool {
        if value < 1 {
            return false;
        }
        self.status.client_sample_n = value;
        true
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            grid: self.settings.grid,
            counts: self.grid.clone(),
            dots: self.ring.read_all(),
        }
    }

    /// Returns the counters accumulated since the previous call and zeroes them.
    pub fn take_stats(&mut self) -> IngestStats {
        std::mem::take(&mut self.stats)
    }
}
