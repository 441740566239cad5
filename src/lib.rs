//! # Crowd Heatmap
//!
//! Real-time click aggregation for stream overlays. Viewers post batches of
//! normalized click coordinates; the service bins them into a per-room histogram,
//! keeps a deterministic subsample of raw points, and pushes a compact snapshot
//! to the overlay's WebSocket at a fixed frame rate.
//!
//! ## Core Features
//!
//! - **Per-room state**: rooms are created on first reference and fully isolated,
//!   each behind its own lock.
//! - **Admission control**: a hard per-second cap per source address, with bounded memory.
//! - **Two sampling strategies**: an advisory client-side factor sent to viewers, and a
//!   deterministic every-Nth server-side sampler that feeds the recent-points ring.
//! - **Fire-and-forget fan-out**: each socket has its own outbound queue, so a slow
//!   subscriber never delays snapshots for the others.
//! - **Control channel**: toggle, reset and sample-factor changes over the same socket,
//!   gated by a shared secret with lockout on repeated failures.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use crowd_heatmap::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ServerError> {
//!     crowd_heatmap::run(Config::from_env()).await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod ws;

use crate::config::Config;
use crate::error::{ServerError, ServerResult};
use crate::ws::service::HeatmapService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Public prelude for convenience.
///
/// `use crowd_heatmap::prelude::*;`
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{
        grid::GridSize,
        registry::RoomRegistry,
        room::{Click, IngestOutcome, Room, RoomSettings, RoomStatus},
    };
    pub use crate::error::ServerError;
    pub use crate::http::router;
    pub use crate::ws::{protocol::ServerMessage, service::HeatmapService};
}

/// Binds the configured address, starts the background loops and serves until
/// the listener fails.
pub async fn run(config: Config) -> ServerResult<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
    let service = HeatmapService::new(config);
    serve(listener, service).await
}

/// Serves the application on an already-bound listener.
pub async fn serve(listener: TcpListener, service: Arc<HeatmapService>) -> ServerResult<()> {
    let local_addr = listener.local_addr()?;
    for task in service.spawn_background_tasks() {
        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!("Background task stopped: {}", e);
            }
        });
    }
    info!(addr = %local_addr, "Listening");

    let app = http::router(service);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
