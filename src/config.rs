//! Process configuration read from the environment.
//!
//! Every key is optional. Missing values use the defaults below; values that fail
//! to parse are logged and replaced by the default rather than aborting startup.

use crate::engine::{grid::GridSize, room::RoomSettings};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const MIN_SNAPSHOT_PERIOD: Duration = Duration::from_millis(1);

/// All settings fixed at process start. Uniform across rooms.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub port: u16,
    pub admin_secret: String,
    pub allowed_origins: Vec<String>,
    pub default_streamer: String,
    pub grid: GridSize,
    pub snapshot_fps: u32,
    pub client_default_sample_n: u32,
    pub server_sample_n: u32,
    pub recent_dots_capacity: usize,
    pub rate_limit_enabled: bool,
    pub rate_limit_max_per_sec: u32,
    /// Seconds between stats log lines. Zero turns the logger off.
    pub log_ingest_stats_every_sec: u64,
    pub admin_max_failed_attempts: u32,
    pub admin_lockout_secs: u64,
    pub body_limit_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8787,
            admin_secret: "CHANGE_ME".to_string(),
            allowed_origins: Vec::new(),
            default_streamer: "dougdoug".to_string(),
            grid: GridSize::new(64, 36),
            snapshot_fps: 10,
            client_default_sample_n: 32,
            server_sample_n: 16,
            recent_dots_capacity: 2000,
            rate_limit_enabled: true,
            rate_limit_max_per_sec: 200,
            log_ingest_stats_every_sec: 5,
            admin_max_failed_attempts: 5,
            admin_lockout_secs: 30,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. `from_env` is the production entry point;
    /// tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            bind_host: get("BIND_HOST").unwrap_or(d.bind_host),
            port: parse_or(&get, "PORT", d.port),
            admin_secret: get("ADMIN_SECRET").unwrap_or(d.admin_secret),
            allowed_origins: get("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(d.allowed_origins),
            default_streamer: get("DEFAULT_STREAMER").unwrap_or(d.default_streamer),
            grid: GridSize::new(
                parse_or(&get, "GRID_W", d.grid.w),
                parse_or(&get, "GRID_H", d.grid.h),
            ),
            snapshot_fps: parse_or(&get, "SNAPSHOT_FPS", d.snapshot_fps).max(1),
            client_default_sample_n: parse_or(&get, "CLIENT_DEFAULT_SAMPLE_N", d.client_default_sample_n)
                .max(1),
            server_sample_n: parse_or(&get, "SERVER_SAMPLE_N", d.server_sample_n).max(1),
            recent_dots_capacity: parse_or(&get, "RECENT_DOTS_CAPACITY", d.recent_dots_capacity).max(1),
            rate_limit_enabled: get("RATE_LIMIT_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(d.rate_limit_enabled),
            rate_limit_max_per_sec: parse_or(&get, "RATE_LIMIT_MAX_PER_SEC_PER_IP", d.rate_limit_max_per_sec)
                .max(1),
            log_ingest_stats_every_sec: parse_or(&get, "LOG_INGEST_STATS_EVERY_SEC", d.log_ingest_stats_every_sec),
            admin_max_failed_attempts: parse_or(&get, "ADMIN_MAX_FAILED_ATTEMPTS", d.admin_max_failed_attempts)
                .max(1),
            admin_lockout_secs: parse_or(&get, "ADMIN_LOCKOUT_SECS", d.admin_lockout_secs),
            body_limit_bytes: parse_or(&get, "BODY_LIMIT_BYTES", d.body_limit_bytes).max(1),
        }
    }

    /// Settings handed to every room.
    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            grid: self.grid,
            ring_capacity: self.recent_dots_capacity,
            server_sample_n: u64::from(self.server_sample_n),
            client_default_sample_n: self.client_default_sample_n,
            rate_limit_enabled: self.rate_limit_enabled,
            rate_limit_max_per_sec: self.rate_limit_max_per_sec,
        }
    }

    /// Broadcast period for `snapshot_fps`, never shorter than 1 ms.
    pub fn snapshot_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.snapshot_fps.max(1))).max(MIN_SNAPSHOT_PERIOD)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.log_ingest_stats_every_sec > 0).then(|| Duration::from_secs(self.log_ingest_stats_every_sec))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(%key, value = %raw, error = %e, fallback = %default, "Invalid config value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = from_map(&[]);
        assert_eq!(cfg.port, 8787);
        assert_eq!(cfg.grid, GridSize::new(64, 36));
        assert_eq!(cfg.snapshot_period(), Duration::from_millis(100));
        assert_eq!(cfg.stats_interval(), Some(Duration::from_secs(5)));
        assert!(cfg.rate_limit_enabled);
        assert!(cfg.allowed_origins.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let cfg = from_map(&[
            ("PORT", "9000"),
            ("GRID_W", "4"),
            ("GRID_H", "4"),
            ("ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
            ("RATE_LIMIT_ENABLED", "false"),
            ("LOG_INGEST_STATS_EVERY_SEC", "0"),
            ("ADMIN_SECRET", "hunter2"),
        ]);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.grid.cells(), 16);
        assert_eq!(cfg.allowed_origins, vec!["https://a.example", "https://b.example"]);
        assert!(!cfg.rate_limit_enabled);
        assert_eq!(cfg.stats_interval(), None);
        assert_eq!(cfg.admin_secret, "hunter2");
    }

    #[test]
    fn bad_values_fall_back_and_floors_apply() {
        let cfg = from_map(&[
            ("PORT", "not-a-port"),
            ("SNAPSHOT_FPS", "0"),
            ("SERVER_SAMPLE_N", "0"),
            ("RATE_LIMIT_MAX_PER_SEC_PER_IP", "-3"),
        ]);
        assert_eq!(cfg.port, 8787);
        assert_eq!(cfg.snapshot_fps, 1);
        assert_eq!(cfg.server_sample_n, 1);
        assert_eq!(cfg.rate_limit_max_per_sec, 200);
    }

    #[test]
    fn very_high_frame_rate_keeps_a_nonzero_period() {
        let cfg = from_map(&[("SNAPSHOT_FPS", "2000")]);
        assert_eq!(cfg.snapshot_fps, 2000);
        assert_eq!(cfg.snapshot_period(), Duration::from_millis(1));

        let cfg = from_map(&[("SNAPSHOT_FPS", "4294967295")]);
        assert_eq!(cfg.snapshot_period(), Duration::from_millis(1));

        let cfg = from_map(&[("SNAPSHOT_FPS", "30")]);
        assert_eq!(cfg.snapshot_period(), Duration::from_micros(33_333));
    }
}
