//! Transport seam: the connection run loop drives these traits, so the
//! backoff and cancellation logic is testable without a socket.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ripple_common::events::EventName;
use ripple_common::protocol::{ClientFrame, ReadyPayload, ServerFrame, OP_DISPATCH};

use crate::error::{ClientError, Result};
use crate::options::{ClientOptions, TokenSupplier};

/// Session parameters the server hands back in READY.
#[derive(Debug, Clone)]
pub struct Ready {
    pub connection_id: String,
    pub principal: String,
    pub heartbeat_interval: Duration,
}

/// One live, identified connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: &ClientFrame) -> Result<()>;
    /// Next frame from the server; `None` once the transport is gone.
    async fn recv(&mut self) -> Option<ServerFrame>;
    async fn close(&mut self);
}

/// Performs one bounded connect-and-handshake attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn Transport>, Ready)>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

pub struct WsConnector {
    endpoint: String,
    token_supplier: Option<TokenSupplier>,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(options: &ClientOptions) -> Self {
        Self {
            endpoint: options.endpoint.clone(),
            token_supplier: options.token_supplier.clone(),
            handshake_timeout: options.handshake_timeout,
        }
    }

    async fn connect_inner(&self) -> Result<(Box<dyn Transport>, Ready)> {
        let (ws, _) = connect_async(&self.endpoint)
            .await
            .map_err(|err| ClientError::Connection(err.to_string()))?;
        let mut transport = WsTransport { ws };

        let token = self.token_supplier.as_ref().and_then(|supply| supply());
        transport.send(&ClientFrame::identify(token)).await?;

        loop {
            match transport.recv().await {
                Some(frame)
                    if frame.op == OP_DISPATCH
                        && frame.t.as_deref() == Some(EventName::READY) =>
                {
                    let payload: ReadyPayload = serde_json::from_value(frame.d)?;
                    let ready = Ready {
                        connection_id: payload.connection_id,
                        principal: payload.principal,
                        // A zero interval would wedge the heartbeat timer.
                        heartbeat_interval: Duration::from_millis(
                            payload.heartbeat_interval.max(1_000),
                        ),
                    };
                    return Ok((Box::new(transport) as Box<dyn Transport>, ready));
                }
                Some(_) => continue,
                None => {
                    return Err(ClientError::Connection(
                        "closed during handshake".to_string(),
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(Box<dyn Transport>, Ready)> {
        time::timeout(self.handshake_timeout, self.connect_inner())
            .await
            .map_err(|_| ClientError::HandshakeTimeout)?
    }
}

struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &ClientFrame) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))
    }

    async fn recv(&mut self) -> Option<ServerFrame> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(text.as_str()) {
                    Ok(frame) => return Some(frame),
                    Err(err) => {
                        tracing::debug!(%err, "skipping unparseable frame");
                        continue;
                    }
                },
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(err)) => {
                    tracing::debug!(%err, "ws read error");
                    return None;
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
