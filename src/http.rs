//! Plain HTTP endpoints (ingestion, state polling, health) and router assembly.

use crate::auth::SourceKey;
use crate::engine::room::{Click, RoomStatus};
use crate::ws::{service::HeatmapService, upgrade::upgrade_handler};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
};
use tracing::warn;

/// Reply to `POST /ingest`: adaptive hints for the viewer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub ok: bool,
    pub client_sample_n: u32,
    pub active: bool,
}

/// Reply to `GET /state`.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub status: RoomStatus,
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub streamer: Option<String>,
}

/// Builds the full application router: HTTP endpoints plus the `/ws` upgrade,
/// behind CORS and a request body limit.
///
/// The HTTP endpoints refuse requests whose `Origin` is not on the allow-list;
/// the `/ws` upgrade is not origin-checked.
pub fn router(service: Arc<HeatmapService>) -> Router {
    let body_limit = service.config().body_limit_bytes;
    let cors = cors_layer(&service.config().allowed_origins);

    Router::new()
        .route("/ingest", post(ingest))
        .route("/state", get(state))
        .route("/healthz", get(|| async { "ok" }))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&service), enforce_origin))
        .route("/ws", get(upgrade_handler))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(service)
}

/// Requests without an `Origin` header pass untouched; browsers are only allowed
/// from the configured list.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid entry in ALLOWED_ORIGINS");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Rejects cross-origin requests from origins outside `ALLOWED_ORIGINS` with 403.
/// Requests without an `Origin` header pass.
async fn enforce_origin(
    State(service): State<Arc<HeatmapService>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        if !origin_allowed(origin, &service.config().allowed_origins) {
            warn!(?origin, path = %request.uri().path(), "Rejecting request from disallowed origin");
            return StatusCode::FORBIDDEN.into_response();
        }
    }
    next.run(request).await
}

fn origin_allowed(origin: &HeaderValue, allowed: &[String]) -> bool {
    origin
        .to_str()
        .is_ok_and(|origin| allowed.iter().any(|a| a == origin))
}

/// True for `application/json`, with or without parameters.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// `POST /ingest` with `{streamer, clicks: [{x, y, ts?}]}`.
///
/// The body is parsed leniently: a non-JSON content type or an unreadable body
/// becomes an empty batch for the default room, and individual malformed clicks
/// are skipped.
async fn ingest(
    State(service): State<Arc<HeatmapService>>,
    SourceKey(source): SourceKey,
    headers: HeaderMap,
    body: Bytes,
) -> Json<IngestResponse> {
    let body: Value = if is_json(&headers) {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    let room = service.room_name(streamer_of(&body).as_deref());
    let clicks = body
        .get("clicks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let outcome = service
        .ingest(&room, &source, clicks.iter().map(Click::from_json))
        .await;

    Json(IngestResponse {
        ok: true,
        client_sample_n: outcome.client_sample_n,
        active: outcome.active,
    })
}

/// `GET /state?streamer=` for viewers that poll instead of subscribing.
async fn state(
    State(service): State<Arc<HeatmapService>>,
    Query(query): Query<StateQuery>,
) -> Json<StateResponse> {
    let room = service.room_name(query.streamer.as_deref());
    let status = service.room_status(&room).await;
    Json(StateResponse { ok: true, status })
}

/// Strings are used as-is; other scalars (numbers, booleans) are stringified.
fn streamer_of(body: &Value) -> Option<String> {
    match body.get("streamer")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
