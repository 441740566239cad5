//! End-to-end checks against a live server on an ephemeral port.

use crowd_heatmap::prelude::*;
use crowd_heatmap::ws::protocol::ControlAction;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "test-secret";

fn test_config() -> Config {
    Config {
        grid: GridSize::new(4, 4),
        snapshot_fps: 20,
        server_sample_n: 1,
        admin_secret: SECRET.to_string(),
        log_ingest_stats_every_sec: 0,
        ..Config::default()
    }
}

async fn start_with(config: Config) -> (SocketAddr, Arc<HeatmapService>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = HeatmapService::new(config);
    let serving = Arc::clone(&service);
    tokio::spawn(async move {
        crowd_heatmap::serve(listener, serving).await.unwrap();
    });
    (addr, service)
}

async fn start_server() -> SocketAddr {
    start_with(test_config()).await.0
}

async fn subscribe(addr: SocketAddr, streamer: &str) -> Socket {
    let url = format!("ws://{addr}/ws?streamer={streamer}&role=overlay");
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

/// Reads frames until one of the given type arrives (or the timeout hits).
async fn next_of_type(socket: &mut Socket, kind: &str) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            let frame = socket.next().await.expect("socket closed").unwrap();
            if let Message::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} frame within timeout"))
}

async fn send_admin(socket: &mut Socket, body: Value) {
    socket.send(Message::Text(body.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn health_and_state_endpoints() {
    let addr = start_server().await;

    let health = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(health, "ok");

    let state: Value = reqwest::get(format!("http://{addr}/state?streamer=poller"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["ok"], true);
    assert_eq!(state["active"], false);
    assert_eq!(state["clientSampleN"], 32);
    assert!(state["lastReset"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn malformed_ingest_body_is_tolerated() {
    let addr = start_server().await;
    let resp: Value = reqwest::Client::new()
        .post(format!("http://{addr}/ingest"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp, json!({"ok": true, "clientSampleN": 32, "active": false}));
}

#[tokio::test]
async fn overlay_session_end_to_end() {
    let addr = start_server().await;
    let mut socket = subscribe(addr, "e2e").await;

    // Greeting.
    let greeting = next_of_type(&mut socket, "state").await;
    assert_eq!(greeting["gridSize"], json!({"w": 4, "h": 4}));
    assert_eq!(greeting["state"]["active"], false);

    // A wrong secret is ignored; the right one toggles exactly once.
    send_admin(&mut socket, json!({"type": "admin", "action": "toggle", "secret": "nope"})).await;
    send_admin(&mut socket, json!({"type": "admin", "action": "toggle", "secret": SECRET})).await;
    let state = next_of_type(&mut socket, "state").await;
    assert_eq!(state["state"]["active"], true);

    // Sample factor of zero is ignored; four is applied.
    send_admin(
        &mut socket,
        json!({"type": "admin", "action": "setSampleN", "value": 0, "secret": SECRET}),
    )
    .await;
    send_admin(
        &mut socket,
        json!({"type": "admin", "action": "setSampleN", "value": 4, "secret": SECRET}),
    )
    .await;
    let state = next_of_type(&mut socket, "state").await;
    assert_eq!(state["state"]["clientSampleN"], 4);

    // Ingest one good click and one malformed one.
    let resp: Value = reqwest::Client::new()
        .post(format!("http://{addr}/ingest"))
        .json(&json!({
            "streamer": "e2e",
            "clicks": [{"x": 0.1, "y": 0.1, "ts": 1}, {"x": "bad", "y": 0.5}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp, json!({"ok": true, "clientSampleN": 4, "active": true}));

    let snapshot = timeout(Duration::from_secs(5), async {
        loop {
            let snap = next_of_type(&mut socket, "snapshot").await;
            if snap["grid"]["counts"][0] == 1 {
                return snap;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(snapshot["grid"]["w"], 4);
    assert_eq!(snapshot["grid"]["counts"].as_array().unwrap().len(), 16);
    assert_eq!(snapshot["sampleDots"].as_array().unwrap().len(), 1);

    // Reset clears the grid and ring.
    send_admin(&mut socket, json!({"type": "admin", "action": "reset", "secret": SECRET})).await;
    let reset = next_of_type(&mut socket, "reset").await;
    assert!(reset["ts"].as_u64().is_some());
    // A tick that copied the grid just before the reset may still land after it.
    let after = timeout(Duration::from_secs(5), async {
        loop {
            let snap = next_of_type(&mut socket, "snapshot").await;
            if snap["grid"]["counts"].as_array().unwrap().iter().all(|c| c == 0) {
                return snap;
            }
        }
    })
    .await
    .unwrap();
    assert!(after["sampleDots"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn disallowed_origins_and_non_json_bodies_are_not_counted() {
    let (addr, service) = start_with(Config {
        allowed_origins: vec!["https://good.example".to_string()],
        ..test_config()
    })
    .await;
    service.apply_control("guarded", ControlAction::Toggle).await;
    let body = json!({"streamer": "guarded", "clicks": [{"x": 0.1, "y": 0.1}]});
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/ingest"))
        .header("origin", "https://evil.example")
        .header("content-type", "text/plain")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    let resp = client
        .post(format!("http://{addr}/ingest"))
        .header("origin", "https://evil.example")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    // Same-origin tools send no Origin header, but the body still has to be JSON.
    let resp = client
        .post(format!("http://{addr}/ingest"))
        .header("content-type", "text/plain")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let counts = |service: Arc<HeatmapService>| async move {
        let room = service.registry().get("guarded").unwrap();
        let grid = room.lock().await.counts().to_vec();
        grid
    };
    assert!(counts(Arc::clone(&service)).await.iter().all(|c| *c == 0));

    let resp = client
        .post(format!("http://{addr}/ingest"))
        .header("origin", "https://good.example")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "https://good.example"
    );
    assert_eq!(counts(service).await[0], 1);
}
