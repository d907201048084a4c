use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use ripple_api::config::Config;
use ripple_api::AppState;

pub const TEST_SECRET: &str = "test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a real TCP server for WebSocket testing. The server runs in the
/// background; the returned state shares the hub with it.
pub async fn spawn_server() -> (SocketAddr, AppState) {
    spawn_server_with(Config {
        auth_secret: Some(TEST_SECRET.to_string()),
        handshake_timeout_secs: 5,
        outbound_buffer: 64,
        ..Config::default()
    })
    .await
}

pub async fn spawn_server_with(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config);
    let app = ripple_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

pub fn mint_token(principal: &str) -> String {
    ripple_api::auth::issue_token(TEST_SECRET, principal, chrono::Duration::hours(1))
        .expect("mint token")
}

/// Connect to the gateway, IDENTIFY, and wait for READY.
/// Returns the stream and the assigned connection id.
pub async fn connect_and_identify(addr: SocketAddr, token: Option<String>) -> (WsStream, String) {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let (mut write, mut read) = ws.split();

    let identify = serde_json::json!({
        "op": 2,
        "d": { "token": token }
    });
    write
        .send(tungstenite::Message::Text(identify.to_string().into()))
        .await
        .expect("send identify");

    // Read READY.
    let ready = loop {
        let msg = time::timeout(Duration::from_secs(5), read.next())
            .await
            .expect("timeout waiting for READY")
            .expect("stream ended")
            .expect("ws read error");
        let text = match msg {
            tungstenite::Message::Text(t) => t,
            _ => continue,
        };
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).expect("parse frame");
        if frame["op"] == 0 && frame["t"] == "READY" {
            break frame["d"].clone();
        }
    };

    let connection_id = ready["connection_id"].as_str().expect("connection_id").to_string();
    (read.reunite(write).expect("reunite"), connection_id)
}

/// Read frames until a DISPATCH with the given event name arrives; returns
/// its payload. Panics after 5 seconds.
pub async fn recv_event(ws: &mut WsStream, name: &str) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap_or_else(|_| panic!("timeout waiting for {name}"))
            .expect("stream ended")
            .expect("ws read error");
        let text = match msg {
            tungstenite::Message::Text(t) => t,
            _ => continue,
        };
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).expect("parse frame");
        if frame["op"] == 0 && frame["t"] == name {
            return frame["d"].clone();
        }
    }
}

/// Assert that no DISPATCH with the given name arrives within the window.
pub async fn expect_no_event(ws: &mut WsStream, name: &str, window: Duration) {
    let deadline = time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match time::timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(tungstenite::Message::Text(text)))) => {
                let frame: serde_json::Value =
                    serde_json::from_str(text.as_str()).expect("parse frame");
                assert_ne!(frame["t"], name, "unexpected {name}: {frame}");
            }
            Ok(Some(Ok(_))) => continue,
            Ok(_) => return,
        }
    }
}

/// Send an INVOKE and wait for its RESULT payload.
pub async fn invoke(
    ws: &mut WsStream,
    id: u64,
    method: &str,
    args: serde_json::Value,
) -> serde_json::Value {
    let frame = serde_json::json!({
        "op": 3,
        "d": { "id": id, "method": method, "args": args }
    });
    ws.send(tungstenite::Message::Text(frame.to_string().into()))
        .await
        .expect("send invoke");

    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for RESULT")
            .expect("stream ended")
            .expect("ws read error");
        let text = match msg {
            tungstenite::Message::Text(t) => t,
            _ => continue,
        };
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).expect("parse frame");
        if frame["op"] == 4 && frame["d"]["id"] == id {
            return frame["d"].clone();
        }
    }
}

/// Wait for a close frame and return its code, if any.
pub async fn recv_close(ws: &mut WsStream) -> Option<u16> {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close")?;
        match msg {
            Ok(tungstenite::Message::Close(Some(frame))) => return Some(frame.code.into()),
            Ok(tungstenite::Message::Close(None)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}
