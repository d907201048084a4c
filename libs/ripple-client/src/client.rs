//! The client connection manager.
//!
//! A single background task owns the transport and drives an explicit state
//! machine; public methods talk to it over a command channel, so application
//! calls never block on backoff sleeps. Reconnect attempts follow the
//! configured schedule, and a successful reconnect replays every group join
//! from this logical session — in join order, before the state flips back to
//! Connected — so server events emitted on join arrive subscribed.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;

use ripple_common::protocol::{
    ClientFrame, MethodName, ResultPayload, ServerFrame, OP_DISPATCH, OP_HEARTBEAT_ACK, OP_RESULT,
};

use crate::error::{ClientError, Result};
use crate::handlers::{Handler, HandlerId, HandlerRegistry};
use crate::options::ClientOptions;
use crate::state::ConnectionState;
use crate::transport::{Connector, Ready, Transport, WsConnector};

/// Commands sent from the public API to the background task.
enum Command {
    Connect {
        done: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Invoke {
        method: String,
        args: Value,
        done: oneshot::Sender<Result<Value>>,
    },
    Send {
        method: String,
        args: Value,
        done: oneshot::Sender<Result<()>>,
    },
}

/// Client handle. Dropping it stops the background task.
pub struct RippleClient {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    handlers: Arc<HandlerRegistry>,
    _task: JoinHandle<()>,
}

impl RippleClient {
    /// Build a client against the configured WebSocket endpoint. Must be
    /// called from within a tokio runtime.
    pub fn new(options: ClientOptions) -> Self {
        let connector = Arc::new(WsConnector::new(&options));
        Self::with_connector(options, connector)
    }

    /// Build a client over a custom transport. This is the seam the state
    /// machine tests use; production code wants [`RippleClient::new`].
    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let handlers = Arc::new(HandlerRegistry::new());

        let runner = Runner {
            connector,
            options,
            cmd_rx,
            state_tx,
            handlers: handlers.clone(),
            joined_groups: Vec::new(),
            pending: HashMap::new(),
            next_invoke_id: 1,
            connect_waiter: None,
        };
        let task = tokio::spawn(runner.run());

        Self {
            cmd_tx,
            state_rx,
            handlers,
            _task: task,
        }
    }

    /// Establish the connection. A failed handshake surfaces here and leaves
    /// the client Disconnected; automatic retry only applies to later drops.
    pub async fn connect(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Connect { done }).await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Tear the connection down. Always succeeds locally, cancels any pending
    /// reconnect, and guarantees no handler fires after it resolves.
    pub async fn disconnect(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Disconnect { done }).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Call a server method and wait for its result. Fails with
    /// `NotConnected` outside the Connected state.
    pub async fn invoke(&self, method: &str, args: Value) -> Result<Value> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Invoke {
            method: method.to_string(),
            args,
            done,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Fire-and-forget variant of [`invoke`](Self::invoke).
    pub async fn send(&self, method: &str, args: Value) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Send {
            method: method.to_string(),
            args,
            done,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Join a group. The membership is remembered and replayed after every
    /// reconnect; re-joining is safe.
    pub async fn join_group(&self, group: &str) -> Result<()> {
        self.invoke(
            MethodName::JOIN_GROUP,
            serde_json::json!({ "group": group }),
        )
        .await
        .map(|_| ())
    }

    /// Leave a group. Leaving a group never joined is a no-op server-side.
    pub async fn leave_group(&self, group: &str) -> Result<()> {
        self.invoke(
            MethodName::LEAVE_GROUP,
            serde_json::json!({ "group": group }),
        )
        .await
        .map(|_| ())
    }

    /// Register a listener for a named event. Safe to call in any state;
    /// listeners registered before the connection exists are inert until
    /// Connected.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers.on(event, Arc::new(handler) as Handler)
    }

    /// Remove one listener.
    pub fn off(&self, handle: &HandlerId) -> bool {
        self.handlers.off(handle)
    }

    /// Remove every listener for an event.
    pub fn off_all(&self, event: &str) -> usize {
        self.handlers.off_all(event)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel observing state transitions, for connectivity UIs.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

enum Phase {
    Idle,
    Session {
        transport: Box<dyn Transport>,
        ready: Ready,
        resumed: bool,
    },
    Retry {
        attempt: u32,
    },
}

enum Attempt {
    Established {
        transport: Box<dyn Transport>,
        ready: Ready,
    },
    Failed(ClientError),
    Cancelled,
}

enum Step {
    Frame(Option<ServerFrame>),
    Cmd(Option<Command>),
    Heartbeat,
}

enum GroupAction {
    Join(String),
    Leave(String),
}

struct PendingInvoke {
    done: oneshot::Sender<Result<Value>>,
    action: Option<GroupAction>,
}

struct Runner {
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    handlers: Arc<HandlerRegistry>,
    /// Groups joined during this logical session, in join order.
    joined_groups: Vec<String>,
    pending: HashMap<u64, PendingInvoke>,
    next_invoke_id: u64,
    /// Caller awaiting `connect()`; answered once the session is Connected.
    connect_waiter: Option<oneshot::Sender<Result<()>>>,
}

impl Runner {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            let next = match phase {
                Phase::Idle => self.idle().await,
                Phase::Session {
                    transport,
                    ready,
                    resumed,
                } => self.session(transport, ready, resumed).await,
                Phase::Retry { attempt } => self.retry(attempt).await,
            };
            match next {
                Some(p) => phase = p,
                None => break,
            }
        }
        tracing::debug!("client task stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn report_error(&self, err: ClientError) {
        tracing::warn!(%err, "connection failed terminally");
        if let Some(callback) = &self.options.on_error {
            callback(&err);
        }
    }

    /// Fail every in-flight invoke; their transport is gone.
    fn fail_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.done.send(Err(ClientError::Closed));
        }
    }

    fn end_logical_session(&mut self) {
        self.fail_pending();
        if let Some(done) = self.connect_waiter.take() {
            let _ = done.send(Err(ClientError::Closed));
        }
        self.joined_groups.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Transport gone: reconnect if configured, otherwise surface once.
    fn after_drop(&mut self) -> Phase {
        self.fail_pending();
        if self.options.auto_reconnect {
            self.set_state(ConnectionState::Reconnecting);
            tracing::info!("connection lost — reconnecting");
            Phase::Retry { attempt: 0 }
        } else {
            self.end_logical_session();
            self.report_error(ClientError::Closed);
            Phase::Idle
        }
    }

    async fn idle(&mut self) -> Option<Phase> {
        loop {
            match self.cmd_rx.recv().await? {
                Command::Connect { done } => {
                    self.set_state(ConnectionState::Connecting);
                    match self.attempt().await {
                        Attempt::Established { transport, ready } => {
                            // Answered once the session reaches Connected.
                            self.connect_waiter = Some(done);
                            return Some(Phase::Session {
                                transport,
                                ready,
                                resumed: false,
                            });
                        }
                        Attempt::Failed(err) => {
                            self.set_state(ConnectionState::Disconnected);
                            let _ = done.send(Err(err));
                        }
                        Attempt::Cancelled => {
                            let _ = done.send(Err(ClientError::Connection(
                                "cancelled by disconnect".to_string(),
                            )));
                        }
                    }
                }
                Command::Disconnect { done } => {
                    let _ = done.send(());
                }
                Command::Invoke { done, .. } => {
                    let _ = done.send(Err(ClientError::NotConnected));
                }
                Command::Send { done, .. } => {
                    let _ = done.send(Err(ClientError::NotConnected));
                }
            }
        }
    }

    /// One connect attempt, abandoned immediately if a disconnect arrives
    /// while it is in flight.
    async fn attempt(&mut self) -> Attempt {
        let connector = self.connector.clone();
        let connect_fut = async move { connector.connect().await };
        tokio::pin!(connect_fut);

        loop {
            tokio::select! {
                result = &mut connect_fut => {
                    return match result {
                        Ok((transport, ready)) => Attempt::Established { transport, ready },
                        Err(err) => Attempt::Failed(err),
                    };
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return Attempt::Cancelled,
                        Some(Command::Disconnect { done }) => {
                            self.set_state(ConnectionState::Disconnected);
                            let _ = done.send(());
                            return Attempt::Cancelled;
                        }
                        Some(Command::Connect { done }) => {
                            // Already connecting; treat as satisfied.
                            let _ = done.send(Ok(()));
                        }
                        Some(Command::Invoke { done, .. }) => {
                            let _ = done.send(Err(ClientError::NotConnected));
                        }
                        Some(Command::Send { done, .. }) => {
                            let _ = done.send(Err(ClientError::NotConnected));
                        }
                    }
                }
            }
        }
    }

    async fn session(
        &mut self,
        mut transport: Box<dyn Transport>,
        ready: Ready,
        resumed: bool,
    ) -> Option<Phase> {
        // Replay group joins before anything else happens on this transport,
        // so events the server emits on join arrive subscribed. Joins are
        // idempotent server-side, which makes the replay safe to repeat.
        for group in self.joined_groups.clone() {
            let frame = ClientFrame::invoke(
                None,
                MethodName::JOIN_GROUP,
                serde_json::json!({ "group": group }),
            );
            if let Err(err) = transport.send(&frame).await {
                tracing::warn!(%err, %group, "group re-join failed");
                return Some(self.after_drop());
            }
        }

        self.set_state(ConnectionState::Connected);
        if let Some(done) = self.connect_waiter.take() {
            let _ = done.send(Ok(()));
        }
        tracing::info!(
            connection_id = %ready.connection_id,
            principal = %ready.principal,
            resumed,
            "session established"
        );

        let mut heartbeat = time::interval(ready.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // First tick fires immediately; skip it.

        loop {
            let step = tokio::select! {
                frame = transport.recv() => Step::Frame(frame),
                cmd = self.cmd_rx.recv() => Step::Cmd(cmd),
                _ = heartbeat.tick() => Step::Heartbeat,
            };

            match step {
                Step::Frame(Some(frame)) => self.handle_frame(frame),
                Step::Frame(None) => return Some(self.after_drop()),
                Step::Cmd(None) => {
                    transport.close().await;
                    return None;
                }
                Step::Cmd(Some(Command::Connect { done })) => {
                    let _ = done.send(Ok(()));
                }
                Step::Cmd(Some(Command::Disconnect { done })) => {
                    transport.close().await;
                    self.end_logical_session();
                    let _ = done.send(());
                    return Some(Phase::Idle);
                }
                Step::Cmd(Some(Command::Invoke { method, args, done })) => {
                    let id = self.next_invoke_id;
                    self.next_invoke_id += 1;
                    let action = group_action(&method, &args);
                    let frame = ClientFrame::invoke(Some(id), &method, args);
                    match transport.send(&frame).await {
                        Ok(()) => {
                            self.pending.insert(id, PendingInvoke { done, action });
                        }
                        Err(err) => {
                            let _ = done.send(Err(err));
                            return Some(self.after_drop());
                        }
                    }
                }
                Step::Cmd(Some(Command::Send { method, args, done })) => {
                    let frame = ClientFrame::invoke(None, &method, args);
                    match transport.send(&frame).await {
                        Ok(()) => {
                            let _ = done.send(Ok(()));
                        }
                        Err(err) => {
                            let _ = done.send(Err(err));
                            return Some(self.after_drop());
                        }
                    }
                }
                Step::Heartbeat => {
                    if let Err(err) = transport.send(&ClientFrame::heartbeat()).await {
                        tracing::debug!(%err, "heartbeat send failed");
                        return Some(self.after_drop());
                    }
                }
            }
        }
    }

    async fn retry(&mut self, attempt: u32) -> Option<Phase> {
        if let Some(max) = self.options.max_reconnect_attempts {
            if attempt >= max {
                self.end_logical_session();
                self.report_error(ClientError::ReconnectExhausted(max));
                return Some(Phase::Idle);
            }
        }

        let delay = self.options.backoff.delay_for(attempt);
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        // Sleep out the backoff, but stay responsive: a disconnect cancels
        // the timer and no attempt fires after it.
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return None,
                        Some(Command::Disconnect { done }) => {
                            self.end_logical_session();
                            let _ = done.send(());
                            return Some(Phase::Idle);
                        }
                        Some(Command::Connect { done }) => {
                            let _ = done.send(Ok(()));
                        }
                        Some(Command::Invoke { done, .. }) => {
                            let _ = done.send(Err(ClientError::NotConnected));
                        }
                        Some(Command::Send { done, .. }) => {
                            let _ = done.send(Err(ClientError::NotConnected));
                        }
                    }
                }
            }
        }

        match self.attempt().await {
            Attempt::Established { transport, ready } => Some(Phase::Session {
                transport,
                ready,
                resumed: true,
            }),
            Attempt::Failed(err) => {
                tracing::warn!(attempt, %err, "reconnect attempt failed");
                Some(Phase::Retry {
                    attempt: attempt + 1,
                })
            }
            Attempt::Cancelled => Some(Phase::Idle),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame.op {
            OP_DISPATCH => {
                if let Some(name) = frame.t.as_deref() {
                    let count = self.handlers.dispatch(name, &frame.d);
                    tracing::trace!(event = name, listeners = count, "event dispatched");
                }
            }
            OP_RESULT => {
                let payload: ResultPayload = match serde_json::from_value(frame.d) {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::debug!(%err, "malformed RESULT frame");
                        return;
                    }
                };
                let Some(pending) = self.pending.remove(&payload.id) else {
                    tracing::debug!(id = payload.id, "RESULT for unknown invoke");
                    return;
                };
                if payload.ok {
                    self.apply_group_action(pending.action);
                    let _ = pending
                        .done
                        .send(Ok(payload.data.unwrap_or(Value::Null)));
                } else {
                    let message = payload
                        .error
                        .unwrap_or_else(|| "invoke failed".to_string());
                    let _ = pending.done.send(Err(ClientError::Invoke(message)));
                }
            }
            OP_HEARTBEAT_ACK => {}
            other => tracing::debug!(op = other, "unexpected frame from server"),
        }
    }

    /// Group bookkeeping follows confirmed invokes only, so a rejected join
    /// never ends up in the replay set.
    fn apply_group_action(&mut self, action: Option<GroupAction>) {
        match action {
            Some(GroupAction::Join(group)) => {
                if !self.joined_groups.contains(&group) {
                    self.joined_groups.push(group);
                }
            }
            Some(GroupAction::Leave(group)) => {
                self.joined_groups.retain(|g| g != &group);
            }
            None => {}
        }
    }
}

fn group_action(method: &str, args: &Value) -> Option<GroupAction> {
    let group = args.get("group")?.as_str()?.to_string();
    match method {
        MethodName::JOIN_GROUP => Some(GroupAction::Join(group)),
        MethodName::LEAVE_GROUP => Some(GroupAction::Leave(group)),
        _ => None,
    }
}
