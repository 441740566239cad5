//! Request identity helpers: the source-address extractor used for rate limiting,
//! the peer-address extractor and the shared-secret gate in front of control messages.
//!
//! ## Example
//!
//! ```rust,no_run
//! # use axum::{routing::post, Router};
//! use crowd_heatmap::auth::SourceKey;
//!
//! async fn ingest(SourceKey(source): SourceKey) -> String {
//!     format!("hello {source}")
//! }
//!
//! let app: Router = Router::new().route("/ingest", post(ingest));
//! ```

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use dashmap::DashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// The key a request is rate limited under.
///
/// Resolved from `cf-connecting-ip`, then the first hop of `x-forwarded-for`,
/// then the peer address (when the server was started with connect info), and
/// finally the literal `"unknown"`. Never rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceKey(pub String);

impl<S> FromRequestParts<S> for SourceKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(SourceKey(resolve_source(&parts.headers, peer)))
    }
}

fn resolve_source(headers: &HeaderMap, peer: Option<String>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("cf-connecting-ip")
        .map(str::to_owned)
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        })
        .or(peer)
        .unwrap_or_else(|| "unknown".to_owned())
}

/// The socket peer's IP address, ignoring forwarding headers.
///
/// Used where a client must not be able to pick its own key, such as the
/// control-secret lockout. Falls back to `"unknown"` when the server was started
/// without connect info. Never rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr(pub String);

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        Ok(PeerAddr(peer))
    }
}

/// How often failure records are swept out of the gate.
const SWEEP_EVERY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    failures: u32,
    last_failure: Instant,
    locked_until: Option<Instant>,
}

impl FailureRecord {
    /// A record that is neither locked nor recent counts the same as no record.
    fn is_live(&self, now: Instant, lockout: Duration) -> bool {
        match self.locked_until {
            Some(until) => now < until,
            None => now.saturating_duration_since(self.last_failure) < lockout,
        }
    }
}

/// Checks control-message secrets and throttles peers that keep guessing.
///
/// After `max_failures` wrong secrets a peer is locked out for `lockout`;
/// while locked out every control message from it is ignored. A correct secret
/// clears the record, and failures older than one lockout period are forgotten.
/// Keys are socket peer addresses ([`PeerAddr`]), never header-derived ones.
#[derive(Debug)]
pub struct AdminGate {
    secret: String,
    max_failures: u32,
    lockout: Duration,
    failures: DashMap<String, FailureRecord>,
    last_sweep: Mutex<Instant>,
}

impl AdminGate {
    pub fn new(secret: impl Into<String>, max_failures: u32, lockout: Duration) -> Self {
        Self {
            secret: secret.into(),
            max_failures: max_failures.max(1),
            lockout,
            failures: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Returns `true` if `candidate` matches the shared secret and `peer` is not
    /// locked out.
    pub fn authorize(&self, peer: &str, candidate: Option<&str>) -> bool {
        self.authorize_at(peer, candidate, Instant::now())
    }

    /// Number of peers with a failure record.
    pub fn tracked_peers(&self) -> usize {
        self.failures.len()
    }

    fn authorize_at(&self, peer: &str, candidate: Option<&str>, now: Instant) -> bool {
        self.maybe_sweep(now);

        if let Some(record) = self.failures.get(peer) {
            if record.locked_until.is_some_and(|until| now < until) {
                warn!(%peer, "Control message ignored, peer is locked out");
                return false;
            }
        }

        if candidate.is_some_and(|c| secrets_match(c, &self.secret)) {
            self.failures.remove(peer);
            return true;
        }

        let fresh = FailureRecord {
            failures: 0,
            last_failure: now,
            locked_until: None,
        };
        let mut record = self.failures.entry(peer.to_owned()).or_insert(fresh);
        if !record.is_live(now, self.lockout) {
            // Previous lockout expired or the old failures went stale; start over.
            *record = fresh;
        }
        record.failures += 1;
        record.last_failure = now;
        warn!(%peer, failures = record.failures, "Rejected control message with bad secret");
        if record.failures >= self.max_failures {
            record.locked_until = Some(now + self.lockout);
            warn!(%peer, lockout_secs = self.lockout.as_secs(), "Locking out control peer");
        }
        false
    }

    fn maybe_sweep(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < SWEEP_EVERY {
            return;
        }
        *last = now;
        drop(last);
        self.failures.retain(|_, record| record.is_live(now, self.lockout));
    }
}

/// Compares without returning early on the first mismatching byte.
fn secrets_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn source_prefers_cloudflare_then_forwarded_then_peer() {
        let mut headers = HeaderMap::new();
        assert_eq!(resolve_source(&headers, None), "unknown");
        assert_eq!(resolve_source(&headers, Some("9.9.9.9".into())), "9.9.9.9");

        headers.insert("x-forwarded-for", HeaderValue::from_static("1.1.1.1, 10.0.0.1"));
        assert_eq!(resolve_source(&headers, Some("9.9.9.9".into())), "1.1.1.1");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("2.2.2.2"));
        assert_eq!(resolve_source(&headers, Some("9.9.9.9".into())), "2.2.2.2");
    }

    #[test]
    fn correct_secret_passes() {
        let gate = AdminGate::new("s3cret", 3, Duration::from_secs(30));
        assert!(gate.authorize("a", Some("s3cret")));
        assert!(!gate.authorize("a", Some("s3cre")));
        assert!(!gate.authorize("a", None));
    }

    #[test]
    fn lockout_after_repeated_failures() {
        let gate = AdminGate::new("s3cret", 3, Duration::from_secs(30));
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(!gate.authorize_at("a", Some("nope"), t0));
        }
        // Locked out, even with the right secret.
        assert!(!gate.authorize_at("a", Some("s3cret"), t0 + Duration::from_secs(1)));
        // Other sources are unaffected.
        assert!(gate.authorize_at("b", Some("s3cret"), t0));
        // Lockout expires.
        assert!(gate.authorize_at("a", Some("s3cret"), t0 + Duration::from_secs(31)));
    }

    #[tokio::test]
    async fn peer_addr_ignores_forwarding_headers() {
        let peer: SocketAddr = "192.0.2.7:50000".parse().unwrap();
        let (mut parts, ()) = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.1")
            .header("cf-connecting-ip", "203.0.113.2")
            .extension(ConnectInfo(peer))
            .body(())
            .unwrap()
            .into_parts();

        let PeerAddr(addr) = PeerAddr::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(addr, "192.0.2.7");
        let SourceKey(source) = SourceKey::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(source, "203.0.113.2");

        let (mut bare, ()) = axum::http::Request::builder().body(()).unwrap().into_parts();
        let PeerAddr(addr) = PeerAddr::from_request_parts(&mut bare, &()).await.unwrap();
        assert_eq!(addr, "unknown");
    }

    #[test]
    fn stale_failures_are_forgotten() {
        let gate = AdminGate::new("s3cret", 3, Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(!gate.authorize_at("a", Some("x"), t0));
        assert!(!gate.authorize_at("a", Some("x"), t0));
        // Quiet for longer than a lockout period: the count starts over.
        assert!(!gate.authorize_at("a", Some("x"), t0 + Duration::from_secs(31)));
        assert!(gate.authorize_at("a", Some("s3cret"), t0 + Duration::from_secs(32)));
    }

    #[test]
    fn sweep_bounds_failure_records() {
        let gate = AdminGate::new("s3cret", 2, Duration::from_secs(30));
        let t0 = Instant::now();
        for i in 0..100 {
            assert!(!gate.authorize_at(&format!("10.0.0.{i}"), Some("x"), t0));
        }
        assert_eq!(gate.tracked_peers(), 100);

        let t1 = t0 + Duration::from_secs(20);
        assert!(!gate.authorize_at("victim", Some("x"), t1));
        assert!(!gate.authorize_at("victim", Some("x"), t1));
        assert_eq!(gate.tracked_peers(), 101);

        // The one-off failures are stale; the locked peer stays locked.
        assert!(!gate.authorize_at("victim", Some("s3cret"), t0 + Duration::from_secs(35)));
        assert_eq!(gate.tracked_peers(), 1);

        assert!(gate.authorize_at("victim", Some("s3cret"), t1 + Duration::from_secs(31)));
        assert_eq!(gate.tracked_peers(), 0);
    }

    #[test]
    fn success_clears_failure_count() {
        let gate = AdminGate::new("s3cret", 2, Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(!gate.authorize_at("a", Some("x"), t0));
        assert!(gate.authorize_at("a", Some("s3cret"), t0));
        assert!(!gate.authorize_at("a", Some("x"), t0));
        assert!(gate.authorize_at("a", Some("s3cret"), t0));
    }
}
