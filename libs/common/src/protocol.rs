//! Gateway opcodes and wire-format frames.
//!
//! Frames are JSON text messages. Clients open the socket, send IDENTIFY, and
//! receive a READY dispatch; after that the server pushes DISPATCH frames and
//! answers INVOKE frames with RESULT frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_INVOKE: u8 = 3;
pub const OP_RESULT: u8 = 4;
pub const OP_HEARTBEAT_ACK: u8 = 5;

// ---------------------------------------------------------------------------
// Server → Client frame
// ---------------------------------------------------------------------------

/// A frame sent from the server to the client over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    pub op: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

impl ServerFrame {
    /// Build a DISPATCH frame (op=0).
    pub fn dispatch(event_name: &str, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            d: data,
        }
    }

    /// Build a RESULT frame (op=4) answering an INVOKE.
    pub fn result(id: u64, outcome: Result<Value, String>) -> Self {
        let payload = match outcome {
            Ok(data) => ResultPayload {
                id,
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(message) => ResultPayload {
                id,
                ok: false,
                data: None,
                error: Some(message),
            },
        };
        Self {
            op: OP_RESULT,
            t: None,
            d: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Build a HEARTBEAT_ACK frame (op=5).
    pub fn heartbeat_ack() -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            d: serde_json::json!({}),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server frame
// ---------------------------------------------------------------------------

/// A frame sent from the client to the server over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl ClientFrame {
    /// Build an IDENTIFY frame (op=2). `token` is optional; connections
    /// without one are admitted as the anonymous principal.
    pub fn identify(token: Option<String>) -> Self {
        Self {
            op: OP_IDENTIFY,
            d: serde_json::to_value(IdentifyPayload { token }).unwrap_or(Value::Null),
        }
    }

    /// Build a HEARTBEAT frame (op=1).
    pub fn heartbeat() -> Self {
        Self {
            op: OP_HEARTBEAT,
            d: serde_json::json!({}),
        }
    }

    /// Build an INVOKE frame (op=3). `id: None` marks the call
    /// fire-and-forget: the server will not answer with a RESULT.
    pub fn invoke(id: Option<u64>, method: &str, args: Value) -> Self {
        Self {
            op: OP_INVOKE,
            d: serde_json::to_value(InvokePayload {
                id,
                method: method.to_string(),
                args,
            })
            .unwrap_or(Value::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentifyPayload {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokePayload {
    #[serde(default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultPayload {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of the READY dispatch sent once after a successful IDENTIFY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub connection_id: String,
    pub principal: String,
    /// Interval at which the client must send HEARTBEAT frames (ms).
    pub heartbeat_interval: u64,
}

// ---------------------------------------------------------------------------
// Invokable method names
// ---------------------------------------------------------------------------

/// Methods a client may call via INVOKE.
pub struct MethodName;

impl MethodName {
    pub const JOIN_GROUP: &'static str = "joinGroup";
    pub const LEAVE_GROUP: &'static str = "leaveGroup";
    pub const BROADCAST_CHANGE: &'static str = "broadcastChange";
    pub const SEND_TO_USER: &'static str = "sendToUser";
    pub const SEND_TO_GROUP: &'static str = "sendToGroup";
}
