//! Notification Socket Client
//!
//! Connects to the vendor notification WebSocket for real-time order
//! events. Manages the full connection lifecycle:
//! - Token authentication immediately after connect
//! - Application-level heartbeat with silence detection
//! - Automatic reconnection with exponential backoff
//! - A bounded attempt budget; exhaustion parks the client in `Failed`
//!   so the polling fallback can take over

pub mod heartbeat;
pub mod messages;
pub mod reconnect;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::order::OrderArrival;
use crate::infrastructure::config::AuthToken;

use self::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use self::messages::{decode_frame, ClientFrame, ServerFrame};
use self::reconnect::{ReconnectConfig, ReconnectPolicy};

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the notification socket client.
#[derive(Debug, thiserror::Error)]
pub enum SocketClientError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection attempt timed out.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Connection closed abnormally.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Connection State
// =============================================================================

/// Observable lifecycle state of the notification socket.
///
/// Published over a watch channel; the polling fallback keys its
/// activation off the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected, not trying.
    #[default]
    Disconnected,
    /// Initial connection attempt in flight.
    Connecting,
    /// Authenticated and live.
    Connected,
    /// Lost the connection; retrying on the backoff schedule.
    Reconnecting,
    /// Attempt budget exhausted; no further retries this session.
    Failed,
}

impl ConnectionState {
    /// Get the state name for logging and metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

// =============================================================================
// Socket Events
// =============================================================================

/// Events emitted by the notification socket client.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Successfully connected and authenticated.
    Connected,
    /// Disconnected from server.
    Disconnected,
    /// Reconnecting to server.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// Received an order-bearing notification.
    Order(OrderArrival),
    /// Received a non-order notification.
    Generic {
        /// Display title.
        title: String,
        /// Display message.
        message: String,
    },
    /// Received a frame with an unknown type tag.
    Passthrough(Value),
    /// Attempt budget exhausted; client has stopped.
    Failed,
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the notification socket client.
#[derive(Debug, Clone)]
pub struct SocketClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Authentication token.
    pub token: AuthToken,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl SocketClientConfig {
    /// Create a new configuration with default timings.
    #[must_use]
    pub fn new(url: String, token: AuthToken) -> Self {
        Self {
            url,
            token,
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

// =============================================================================
// Socket Handle
// =============================================================================

/// Handle for interacting with a running socket client.
///
/// Cheap to clone; safe to hold across reconnects.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    outbound_tx: mpsc::Sender<String>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SocketHandle {
    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Send a raw text frame to the server.
    ///
    /// Silently drops the frame (with a warning) unless the connection is
    /// live; callers never block on a dead socket.
    pub async fn send(&self, frame: String) {
        if self.state() != ConnectionState::Connected {
            tracing::warn!(
                state = self.state().as_str(),
                "Dropping outbound frame; socket not connected"
            );
            return;
        }
        if self.outbound_tx.send(frame).await.is_err() {
            tracing::warn!("Dropping outbound frame; socket task gone");
        }
    }
}

// =============================================================================
// Socket Client
// =============================================================================

/// Notification WebSocket client.
pub struct NotificationSocketClient {
    config: SocketClientConfig,
    event_tx: mpsc::Sender<SocketEvent>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: Mutex<mpsc::Receiver<String>>,
    cancel: CancellationToken,
}

impl NotificationSocketClient {
    /// Create a new client and its handle.
    #[must_use]
    pub fn new(
        config: SocketClientConfig,
        event_tx: mpsc::Sender<SocketEvent>,
        cancel: CancellationToken,
    ) -> (Self, SocketHandle) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);

        let client = Self {
            config,
            event_tx,
            state_tx,
            outbound_rx: Mutex::new(outbound_rx),
            cancel,
        };
        let handle = SocketHandle {
            outbound_tx,
            state_rx,
        };
        (client, handle)
    }

    /// Run the connection loop.
    ///
    /// Connects, authenticates, and processes frames until cancelled, the
    /// server closes normally, or the reconnect budget is exhausted. On
    /// exhaustion the state parks at `Failed` and `Err` is returned; the
    /// caller is expected to keep running on the polling fallback.
    ///
    /// # Errors
    ///
    /// Returns `SocketClientError::MaxReconnectAttemptsExceeded` once the
    /// reconnect budget is spent.
    pub async fn run(self: Arc<Self>) -> Result<(), SocketClientError> {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());
        self.set_state(ConnectionState::Connecting);

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Notification socket client cancelled");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Notification socket closed gracefully");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Notification socket error");
                    let _ = self.event_tx.send(SocketEvent::Disconnected).await;

                    if let Some(delay) = reconnect_policy.next_delay() {
                        let attempt = reconnect_policy.attempt_count();
                        tracing::info!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Reconnecting to notification socket"
                        );
                        metrics::counter!("order_alert_socket_reconnects_total").increment(1);

                        self.set_state(ConnectionState::Reconnecting);
                        let _ = self
                            .event_tx
                            .send(SocketEvent::Reconnecting { attempt })
                            .await;

                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                tracing::info!("Cancelled during reconnect delay");
                                self.set_state(ConnectionState::Disconnected);
                                return Ok(());
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        tracing::error!(
                            attempts = reconnect_policy.attempt_count(),
                            "Notification socket reconnect budget exhausted"
                        );
                        self.set_state(ConnectionState::Failed);
                        let _ = self.event_tx.send(SocketEvent::Failed).await;
                        return Err(SocketClientError::MaxReconnectAttemptsExceeded);
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send_replace(state);
    }

    /// Connect, authenticate, and process frames until error or close.
    ///
    /// Returns `Ok(())` only on a normal close (code 1000) or
    /// cancellation; every other exit is an error that feeds the
    /// reconnect schedule.
    async fn connect_and_run(
        &self,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), SocketClientError> {
        tracing::info!(url = %self.config.url, "Connecting to notification socket");

        let connect = tokio_tungstenite::connect_async(&self.config.url);
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(self.config.connect_timeout, connect) => {
                match result {
                    Ok(connected) => connected?,
                    Err(_) => {
                        return Err(SocketClientError::ConnectTimeout(
                            self.config.connect_timeout,
                        ));
                    }
                }
            }
        };
        let (mut write, mut read) = ws_stream.split();

        // Authenticate before anything else; the server drops unauthenticated
        // connections after a grace period.
        let auth = ClientFrame::Authenticate {
            token: self.config.token.expose().to_string(),
        };
        let json = serde_json::to_string(&auth)
            .map_err(|e| SocketClientError::ConnectionFailed(format!("serialize auth: {e}")))?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SocketClientError::ConnectionFailed(format!("send auth: {e}")))?;

        // Set up heartbeat
        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = CancellationToken::new();
        let heartbeat_manager = HeartbeatManager::new(
            self.config.heartbeat.clone(),
            heartbeat_state.clone(),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        );
        let _heartbeat_handle = tokio::spawn(heartbeat_manager.run());

        let mut outbound_rx = self.outbound_rx.lock().await;
        let result = self
            .frame_loop(
                &mut write,
                &mut read,
                &mut outbound_rx,
                &heartbeat_state,
                &mut heartbeat_rx,
                reconnect_policy,
            )
            .await;

        heartbeat_cancel.cancel();
        result
    }

    async fn frame_loop<W, R>(
        &self,
        write: &mut W,
        read: &mut R,
        outbound_rx: &mut mpsc::Receiver<String>,
        heartbeat_state: &Arc<HeartbeatState>,
        heartbeat_rx: &mut mpsc::Receiver<HeartbeatEvent>,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), SocketClientError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Ok(());
                }
                heartbeat_event = heartbeat_rx.recv() => {
                    match heartbeat_event {
                        Some(HeartbeatEvent::SendPing) => {
                            let ping = serde_json::to_string(&ClientFrame::Ping)
                                .unwrap_or_else(|_| r#"{"type":"ping"}"#.to_string());
                            write.send(Message::Text(ping.into())).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            tracing::warn!("Heartbeat timeout; forcing reconnect");
                            return Err(SocketClientError::ConnectionClosed);
                        }
                        None => {
                            tracing::debug!("Heartbeat channel closed");
                        }
                    }
                }
                frame = outbound_rx.recv() => {
                    if let Some(text) = frame {
                        write.send(Message::Text(text.into())).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_traffic();
                            self.handle_text_frame(&text, reconnect_policy).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat_state.record_traffic();
                            if let Ok(text) = String::from_utf8(data.to_vec()) {
                                self.handle_text_frame(&text, reconnect_policy).await;
                            } else {
                                tracing::warn!(len = data.len(), "Non-UTF8 binary frame");
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat_state.record_traffic();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat_state.record_traffic();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            heartbeat_state.record_traffic();
                            let normal = frame
                                .as_ref()
                                .is_some_and(|f| f.code == CloseCode::Normal);
                            tracing::info!(
                                code = ?frame.as_ref().map(|f| f.code),
                                "Server sent close frame"
                            );
                            // Only a clean 1000 ends the session; every
                            // other close is treated as a drop to recover
                            // from.
                            if normal {
                                return Ok(());
                            }
                            return Err(SocketClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore other message types
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(SocketClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Handle a decoded text frame.
    ///
    /// Malformed frames are logged and skipped; one bad frame must not
    /// tear down the connection.
    async fn handle_text_frame(&self, text: &str, reconnect_policy: &mut ReconnectPolicy) {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed frame");
                return;
            }
        };

        match frame {
            ServerFrame::ConnectionEstablished { message } => {
                tracing::info!(message = ?message, "Notification socket authenticated");
                reconnect_policy.reset();
                self.set_state(ConnectionState::Connected);
                let _ = self.event_tx.send(SocketEvent::Connected).await;
            }
            ServerFrame::Pong => {
                tracing::trace!("Heartbeat pong received");
            }
            ServerFrame::Notification(body) => {
                if let Some(arrival) = body.to_arrival() {
                    tracing::debug!(
                        order_id = arrival.order_id,
                        order_number = %arrival.order_number,
                        "Order notification received"
                    );
                    let _ = self.event_tx.send(SocketEvent::Order(arrival)).await;
                } else {
                    let _ = self
                        .event_tx
                        .send(SocketEvent::Generic {
                            title: body.title,
                            message: body.message,
                        })
                        .await;
                }
            }
            ServerFrame::Unrecognized { frame_type, raw } => {
                tracing::debug!(frame_type = %frame_type, "Forwarding unrecognized frame");
                let _ = self.event_tx.send(SocketEvent::Passthrough(raw)).await;
            }
        }
    }
}
