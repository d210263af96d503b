//! Session-scoped streaming connection to a VASP simulator.
//!
//! `StreamingConnection::open` spawns a background worker that owns the
//! websocket, performs the Socket.IO connect, sends the `vasp_context`
//! handshake exactly once, and republishes inbound log and transaction events
//! on two feeds in arrival order.
//!
//! There is no reconnect and no send queue: a dropped transport leaves the
//! connection `Closed`, and requests issued before the handshake are dropped.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::stream::context::SessionContext;
use crate::stream::feed::EventFeed;
use crate::stream::proto::{
    ClientEvent, LogMessage, Packet, ServerEvent, Transaction, TransactionRequest,
};

/// Hosted simulator endpoint.
pub const DEMO_ENDPOINT: &str = "https://demo.bob.vaspbot.net";
/// Local development endpoint for the simulator backend.
pub const LOCAL_ENDPOINT: &str = "http://localhost:5000";
const SOCKET_IO_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Base address of the simulator backend.
///
/// The same base serves the websocket channel and the REST directory.
#[derive(Clone, Debug, Default)]
pub struct StreamEndpoint {
    local: bool,
    endpoint_override: Option<String>,
}

impl StreamEndpoint {
    /// Endpoint pointing at the hosted simulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables local mode endpoint routing.
    pub fn with_local_mode(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sets an explicit base URL. Takes precedence over local mode.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim_end().trim_end_matches('/').to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        if let Some(endpoint) = self.endpoint_override.as_deref() {
            return endpoint;
        }
        if self.local {
            LOCAL_ENDPOINT
        } else {
            DEMO_ENDPOINT
        }
    }

    /// Websocket URL of the Socket.IO channel.
    pub fn socket_url(&self) -> String {
        let base = self.base_url();
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}{SOCKET_IO_PATH}")
    }
}

/// Lifecycle of a streaming connection. `Closed` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed,
}

/// Result of handing a request to a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// Queued for the transport. Delivery is not acknowledged.
    Forwarded,
    /// Dropped because the connection is not past its handshake.
    Dropped,
}

/// Outbound seam for transfer requests.
pub trait TransactionSink {
    fn send_transaction_request(&self, request: TransactionRequest) -> SendOutcome;
}

/// Errors that end a connection worker. They are logged, never returned to
/// the code that opened the connection.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization error on an outbound frame.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server-side protocol termination.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One live channel bound to one [`SessionContext`].
#[derive(Debug)]
pub struct StreamingConnection {
    context: SessionContext,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound: mpsc::UnboundedSender<TransactionRequest>,
    logs: EventFeed<LogMessage>,
    transactions: EventFeed<Transaction>,
}

impl StreamingConnection {
    /// Starts connecting to `endpoint` on behalf of `context`.
    ///
    /// Never fails from the caller's point of view: transport errors are
    /// logged and leave the connection `Closed`. Must be called from within a
    /// tokio runtime; without one the connection is returned already closed.
    pub fn open(context: SessionContext, endpoint: &StreamEndpoint) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let logs = EventFeed::new();
        let transactions = EventFeed::new();

        let connection = Self {
            context: context.clone(),
            state: Arc::clone(&state),
            outbound: outbound_tx,
            logs: logs.clone(),
            transactions: transactions.clone(),
        };

        let url = endpoint.socket_url();
        info!(
            event = "stream_connection_opening",
            vasp_id = context.vasp_id(),
            context_id = context.session_id(),
            role = %context.role(),
            url = %url
        );

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(connection_worker(
                    url,
                    context,
                    state,
                    outbound_rx,
                    logs,
                    transactions,
                ));
            }
            Err(err) => {
                warn!(
                    event = "stream_connection_failed",
                    vasp_id = context.vasp_id(),
                    error = %err
                );
                connection.close();
            }
        }

        connection
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Waits until the handshake was sent or the connection ended.
    ///
    /// Returns `true` when the connection reached `Connected`.
    pub async fn wait_until_connected(&self) -> bool {
        let mut changes = self.state.subscribe();
        changes
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state == ConnectionState::Connected)
            .unwrap_or(false)
    }

    /// Feed of log lines for this connection's institution.
    pub fn logs(&self) -> &EventFeed<LogMessage> {
        &self.logs
    }

    /// Feed of settled transactions seen by this connection.
    pub fn transactions(&self) -> &EventFeed<Transaction> {
        &self.transactions
    }

    /// Forwards a request over the transport.
    ///
    /// Requests issued before the handshake, or after close, are dropped.
    pub fn send(&self, request: TransactionRequest) -> SendOutcome {
        if self.state() != ConnectionState::Connected {
            debug!(
                event = "transaction_request_dropped",
                vasp_id = self.context.vasp_id(),
                state = ?self.state(),
                reason = "not_connected"
            );
            return SendOutcome::Dropped;
        }
        match self.outbound.send(request) {
            Ok(()) => SendOutcome::Forwarded,
            Err(_) => {
                debug!(
                    event = "transaction_request_dropped",
                    vasp_id = self.context.vasp_id(),
                    reason = "worker_stopped"
                );
                SendOutcome::Dropped
            }
        }
    }

    /// Releases the transport and discards both feeds.
    ///
    /// Once this returns no further event reaches any listener of this
    /// connection. Closing twice is a no-op.
    pub fn close(&self) {
        let was_closed = self.state.send_replace(ConnectionState::Closed) == ConnectionState::Closed;
        self.logs.close();
        self.transactions.close();
        if !was_closed {
            info!(
                event = "stream_connection_closed",
                vasp_id = self.context.vasp_id(),
                context_id = self.context.session_id()
            );
        }
    }
}

impl TransactionSink for StreamingConnection {
    fn send_transaction_request(&self, request: TransactionRequest) -> SendOutcome {
        self.send(request)
    }
}

impl Drop for StreamingConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn connection_worker(
    url: String,
    context: SessionContext,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound_rx: mpsc::UnboundedReceiver<TransactionRequest>,
    logs: EventFeed<LogMessage>,
    transactions: EventFeed<Transaction>,
) {
    let mut closed = state.subscribe();
    let outcome = tokio::select! {
        outcome = run_connection(&url, &context, &state, outbound_rx, &logs, &transactions) => outcome,
        _ = closed.wait_for(|state| *state == ConnectionState::Closed) => Ok(()),
    };

    if let Err(err) = outcome {
        warn!(
            event = "stream_connection_failed",
            vasp_id = context.vasp_id(),
            context_id = context.session_id(),
            error = %err
        );
    }

    if state.send_replace(ConnectionState::Closed) != ConnectionState::Closed {
        info!(
            event = "stream_connection_ended",
            vasp_id = context.vasp_id(),
            context_id = context.session_id()
        );
    }
}

async fn run_connection(
    url: &str,
    context: &SessionContext,
    state: &watch::Sender<ConnectionState>,
    mut outbound_rx: mpsc::UnboundedReceiver<TransactionRequest>,
    logs: &EventFeed<LogMessage>,
    transactions: &EventFeed<Transaction>,
) -> Result<(), StreamError> {
    let (mut socket, _) = connect_async(url).await?;
    debug!(event = "websocket_open", vasp_id = context.vasp_id());

    let mut handshake_sent = false;

    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                let Some(request) = maybe_outbound else {
                    return Ok(());
                };
                let text = ClientEvent::TransactionRequest(request).to_text()?;
                socket.send(Message::Text(text.into())).await?;
                debug!(event = "transaction_request_sent", vasp_id = context.vasp_id());
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        let packet = match Packet::from_text(text.as_str()) {
                            Ok(packet) => packet,
                            Err(err) => {
                                debug!(
                                    event = "stream_frame_dropped",
                                    vasp_id = context.vasp_id(),
                                    error = %err
                                );
                                continue;
                            }
                        };
                        match packet {
                            Packet::Open(_) => {
                                socket.send(Message::Text(Packet::Connect.to_text()?.into())).await?;
                            }
                            Packet::Connect => {
                                if handshake_sent {
                                    continue;
                                }
                                let handshake = ClientEvent::VaspContext(context.to_wire()).to_text()?;
                                socket.send(Message::Text(handshake.into())).await?;
                                handshake_sent = true;
                                state.send_if_modified(|current| {
                                    if *current == ConnectionState::Connecting {
                                        *current = ConnectionState::Connected;
                                        true
                                    } else {
                                        false
                                    }
                                });
                                info!(
                                    event = "stream_connected",
                                    vasp_id = context.vasp_id(),
                                    context_id = context.session_id()
                                );
                            }
                            Packet::Ping(payload) => {
                                socket.send(Message::Text(Packet::Pong(payload).to_text()?.into())).await?;
                            }
                            Packet::Event { name, payload } => {
                                route_event(context, &name, payload, logs, transactions);
                            }
                            Packet::Disconnect | Packet::Close => {
                                return Err(StreamError::Protocol("server closed the session".to_string()));
                            }
                            Packet::ConnectError(reason) => {
                                return Err(StreamError::Protocol(format!("connect refused: {reason}")));
                            }
                            Packet::Pong(_) | Packet::Noop => {}
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        socket.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(StreamError::Protocol("websocket closed".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(StreamError::WebSocket(err)),
                }
            }
        }
    }
}

fn route_event(
    context: &SessionContext,
    name: &str,
    payload: serde_json::Value,
    logs: &EventFeed<LogMessage>,
    transactions: &EventFeed<Transaction>,
) {
    match ServerEvent::from_event(name, payload) {
        Ok(ServerEvent::VaspLogMessage(message)) => {
            logs.publish(&message);
        }
        Ok(ServerEvent::Transaction(transaction)) => {
            debug!(
                event = "transaction_observed",
                vasp_id = context.vasp_id(),
                transaction_id = %transaction.transaction_id
            );
            transactions.publish(&transaction);
        }
        Ok(ServerEvent::Unknown(name)) => {
            debug!(event = "stream_event_ignored", vasp_id = context.vasp_id(), name = %name);
        }
        Err(err) => {
            debug!(
                event = "stream_payload_dropped",
                vasp_id = context.vasp_id(),
                name = %name,
                error = %err
            );
        }
    }
}
