//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time;

use ripple_common::events::EventName;
use ripple_common::protocol::{
    ClientFrame, IdentifyPayload, InvokePayload, MethodName, ReadyPayload, ServerFrame,
    OP_HEARTBEAT, OP_IDENTIFY, OP_INVOKE,
};
use ripple_common::{ChangeEvent, ChangeKind, ANONYMOUS_PRINCIPAL};

use crate::auth;
use crate::AppState;

use super::dispatch::DispatchReport;
use super::hub::Hub;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;
const CLOSE_KICKED: u16 = 4010;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: wait for IDENTIFY within the handshake timeout.
    let handshake_timeout = Duration::from_secs(state.config.handshake_timeout_secs);
    let identify = match time::timeout(handshake_timeout, read_identify(&mut ws_rx)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err((code, reason))) => {
            tracing::debug!(%reason, "handshake failed");
            let _ = send_close(&mut ws_tx, code, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Step 2: resolve the principal from the token, if any.
    let principal = match identify.token {
        Some(token) => match state.config.auth_secret.as_deref() {
            Some(secret) => match auth::verify_token(secret, &token) {
                Ok(claims) => claims.sub,
                Err(err) => {
                    tracing::debug!(%err, "identify token rejected");
                    let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Invalid token").await;
                    return;
                }
            },
            // No secret configured: tokens cannot be validated.
            None => ANONYMOUS_PRINCIPAL.to_string(),
        },
        None => ANONYMOUS_PRINCIPAL.to_string(),
    };

    // Step 3: admit the connection.
    let (out_tx, out_rx) = mpsc::channel(state.config.outbound_buffer);
    let info = match state.hub.register(&principal, out_tx) {
        Ok(info) => info,
        Err(err) => {
            tracing::warn!(%err, "admission failed");
            let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Admission failed").await;
            return;
        }
    };

    // Step 4: READY goes out on the socket directly, ahead of any broadcast
    // already queued for this connection (its own USER_CONNECTED included).
    let ready = ServerFrame::dispatch(
        EventName::READY,
        serde_json::to_value(ReadyPayload {
            connection_id: info.connection_id.clone(),
            principal: principal.clone(),
            heartbeat_interval: state.config.heartbeat_interval_ms,
        })
        .unwrap_or(Value::Null),
    );
    if send_frame(&mut ws_tx, &ready).await.is_err() {
        state.hub.disconnect(&info.connection_id);
        return;
    }

    tracing::info!(
        connection_id = %info.connection_id,
        principal = %principal,
        "gateway session established"
    );

    run_session(&state, &info.connection_id, &principal, ws_tx, ws_rx, out_rx).await;

    state.hub.disconnect(&info.connection_id);
    tracing::info!(connection_id = %info.connection_id, "gateway session ended");
}

/// Read frames until the client sends IDENTIFY. Anything else fails the
/// handshake with an application close code.
async fn read_identify(
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<IdentifyPayload, (u16, &'static str)> {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => return Err((CLOSE_UNKNOWN_ERROR, "read error")),
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => return Err((CLOSE_UNKNOWN_ERROR, "client closed")),
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => continue,
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(_) => return Err((CLOSE_UNKNOWN_ERROR, "Invalid JSON")),
        };

        if frame.op != OP_IDENTIFY {
            return Err((CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY"));
        }

        return serde_json::from_value(frame.d)
            .map_err(|_| (CLOSE_UNKNOWN_ERROR, "Invalid IDENTIFY payload"));
    }
    Err((CLOSE_UNKNOWN_ERROR, "connection closed before identify"))
}

/// Main session loop: read client frames, forward queued dispatches, enforce
/// the heartbeat deadline.
async fn run_session(
    state: &AppState,
    connection_id: &str,
    principal: &str,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut out_rx: mpsc::Receiver<ServerFrame>,
) {
    // Client must heartbeat within 1.5× the advertised interval.
    let heartbeat_deadline =
        Duration::from_millis(state.config.heartbeat_interval_ms * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame: ClientFrame = match serde_json::from_str(&text) {
                            Ok(f) => f,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match frame.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                if send_frame(&mut ws_tx, &ServerFrame::heartbeat_ack()).await.is_err() {
                                    break;
                                }
                            }
                            OP_INVOKE => {
                                let payload: InvokePayload = match serde_json::from_value(frame.d) {
                                    Ok(p) => p,
                                    Err(_) => {
                                        let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid INVOKE payload").await;
                                        break;
                                    }
                                };
                                if let Some(reply) = handle_invoke(&state.hub, connection_id, principal, payload) {
                                    if send_frame(&mut ws_tx, &reply).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            OP_IDENTIFY => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Already identified").await;
                                break;
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(?err, connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Dispatched frame queued for this connection.
            out = out_rx.recv() => {
                match out {
                    Some(frame) => {
                        if send_frame(&mut ws_tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped: the registry evicted this connection.
                    None => {
                        let _ = send_close(&mut ws_tx, CLOSE_KICKED, "Disconnected by server").await;
                        break;
                    }
                }
            }

            // Heartbeat deadline check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(connection_id, "heartbeat timeout — closing connection");
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

/// Execute an INVOKE. Returns the RESULT frame, or `None` for
/// fire-and-forget calls (no id).
fn handle_invoke(
    hub: &Hub,
    connection_id: &str,
    principal: &str,
    payload: InvokePayload,
) -> Option<ServerFrame> {
    let InvokePayload { id, method, args } = payload;
    let outcome = dispatch_method(hub, connection_id, principal, &method, args);
    if let Err(err) = &outcome {
        tracing::debug!(connection_id, method = %method, error = %err, "invoke rejected");
    }
    id.map(|id| ServerFrame::result(id, outcome))
}

#[derive(serde::Deserialize)]
struct GroupArgs {
    group: String,
}

#[derive(serde::Deserialize)]
struct ChangeArgs {
    kind: ChangeKind,
    entity_type: String,
    entity_id: String,
    #[serde(default)]
    new_data: Option<Value>,
    #[serde(default)]
    originator: Option<String>,
}

#[derive(serde::Deserialize)]
struct SendToUserArgs {
    principal: String,
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(serde::Deserialize)]
struct SendToGroupArgs {
    group: String,
    event: String,
    #[serde(default)]
    data: Value,
}

fn dispatch_method(
    hub: &Hub,
    connection_id: &str,
    principal: &str,
    method: &str,
    args: Value,
) -> Result<Value, String> {
    match method {
        MethodName::JOIN_GROUP => {
            let args: GroupArgs = parse_args(args)?;
            hub.join_group(connection_id, &args.group)
                .map_err(|e| e.to_string())?;
            Ok(Value::Null)
        }
        MethodName::LEAVE_GROUP => {
            let args: GroupArgs = parse_args(args)?;
            hub.leave_group(connection_id, &args.group)
                .map_err(|e| e.to_string())?;
            Ok(Value::Null)
        }
        MethodName::BROADCAST_CHANGE => {
            let args: ChangeArgs = parse_args(args)?;
            let originator = args
                .originator
                .filter(|o| !o.is_empty())
                .unwrap_or_else(|| principal.to_string());
            let change = ChangeEvent::new(
                args.kind,
                args.entity_type,
                args.entity_id,
                args.new_data,
                originator,
            );
            Ok(report_json(hub.broadcast_change(change)))
        }
        MethodName::SEND_TO_USER => {
            let args: SendToUserArgs = parse_args(args)?;
            if args.event.is_empty() {
                return Err("event name must not be empty".to_string());
            }
            Ok(report_json(hub.send_to_user(
                &args.principal,
                &args.event,
                args.data,
            )))
        }
        MethodName::SEND_TO_GROUP => {
            let args: SendToGroupArgs = parse_args(args)?;
            if args.event.is_empty() {
                return Err("event name must not be empty".to_string());
            }
            Ok(report_json(hub.send_to_group(
                &args.group,
                &args.event,
                args.data,
            )))
        }
        _ => Err(format!("unknown method `{method}`")),
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))
}

fn report_json(report: DispatchReport) -> Value {
    serde_json::json!({
        "attempted": report.attempted,
        "delivered": report.delivered,
    })
}

async fn send_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::error!(%err, "failed to encode frame");
            Ok(())
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use ripple_common::protocol::ResultPayload;

    use super::*;

    fn hub_with_connection(principal: &str) -> (Hub, String, mpsc::Receiver<ServerFrame>) {
        let hub = Hub::new();
        let (tx, rx) = mpsc::channel(32);
        let info = hub.register(principal, tx).unwrap();
        (hub, info.connection_id, rx)
    }

    fn invoke(
        hub: &Hub,
        connection_id: &str,
        principal: &str,
        id: Option<u64>,
        method: &str,
        args: Value,
    ) -> Option<ResultPayload> {
        let frame = handle_invoke(
            hub,
            connection_id,
            principal,
            InvokePayload {
                id,
                method: method.to_string(),
                args,
            },
        )?;
        Some(serde_json::from_value(frame.d).unwrap())
    }

    #[test]
    fn join_group_invoke_succeeds() {
        let (hub, conn, _rx) = hub_with_connection("alice");
        let result = invoke(
            &hub,
            &conn,
            "alice",
            Some(1),
            MethodName::JOIN_GROUP,
            serde_json::json!({ "group": "g1" }),
        )
        .unwrap();
        assert!(result.ok);
        assert_eq!(hub.registry().members_of("g1"), vec![conn]);
    }

    #[test]
    fn fire_and_forget_invoke_returns_no_result() {
        let (hub, conn, _rx) = hub_with_connection("alice");
        let reply = invoke(
            &hub,
            &conn,
            "alice",
            None,
            MethodName::JOIN_GROUP,
            serde_json::json!({ "group": "g1" }),
        );
        assert!(reply.is_none());
        assert_eq!(hub.registry().members_of("g1"), vec![conn]);
    }

    #[test]
    fn unknown_method_returns_error_result() {
        let (hub, conn, _rx) = hub_with_connection("alice");
        let result = invoke(
            &hub,
            &conn,
            "alice",
            Some(7),
            "nope",
            serde_json::json!({}),
        )
        .unwrap();
        assert!(!result.ok);
        assert_eq!(result.id, 7);
        assert!(result.error.unwrap().contains("unknown method"));
    }

    #[test]
    fn invalid_arguments_return_error_result() {
        let (hub, conn, _rx) = hub_with_connection("alice");
        let result = invoke(
            &hub,
            &conn,
            "alice",
            Some(2),
            MethodName::JOIN_GROUP,
            serde_json::json!({ "grp": "typo" }),
        )
        .unwrap();
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("invalid arguments"));
    }

    #[test]
    fn broadcast_change_defaults_originator_to_principal() {
        let (hub, conn, mut rx) = hub_with_connection("alice");
        while rx.try_recv().is_ok() {}

        let result = invoke(
            &hub,
            &conn,
            "alice",
            Some(3),
            MethodName::BROADCAST_CHANGE,
            serde_json::json!({ "kind": "update", "entity_type": "order", "entity_id": "42" }),
        )
        .unwrap();
        assert!(result.ok);
        assert_eq!(result.data.unwrap()["delivered"], 1);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.t.as_deref(), Some(EventName::DATA_CHANGED));
        assert_eq!(frame.d["originator"], "alice");
    }

    #[test]
    fn send_to_user_rejects_empty_event_name() {
        let (hub, conn, _rx) = hub_with_connection("alice");
        let result = invoke(
            &hub,
            &conn,
            "alice",
            Some(4),
            MethodName::SEND_TO_USER,
            serde_json::json!({ "principal": "bob", "event": "", "data": {} }),
        )
        .unwrap();
        assert!(!result.ok);
    }
}
