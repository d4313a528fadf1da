//! Heartbeat Manager
//!
//! Keeps the notification socket alive with periodic application-level
//! pings and detects dead connections: silence (no inbound traffic of any
//! kind) for twice the ping interval forces a reconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration) -> Self {
        Self { ping_interval }
    }

    /// Silence threshold after which the connection is considered dead.
    #[must_use]
    pub fn silence_timeout(&self) -> Duration {
        self.ping_interval * 2
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone)]
pub enum HeartbeatEvent {
    /// Request to send a ping frame.
    SendPing,
    /// No traffic within the silence timeout; connection is dead.
    Timeout,
}

/// Traffic tracking shared between the heartbeat manager and the socket
/// read loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_traffic: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_traffic: RwLock::new(Instant::now()),
        }
    }

    /// Record that any inbound frame arrived.
    pub fn record_traffic(&self) {
        *self.last_traffic.write() = Instant::now();
    }

    /// Time elapsed since the last inbound frame.
    #[must_use]
    pub fn time_since_traffic(&self) -> Duration {
        self.last_traffic.read().elapsed()
    }

    /// Reset for a new connection.
    pub fn reset(&self) {
        *self.last_traffic.write() = Instant::now();
    }
}

/// Heartbeat manager that monitors connection liveness.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat loop until cancelled or a timeout is detected.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would ping before the handshake settles.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check liveness and request a ping.
    ///
    /// Returns `Err(())` if a timeout occurred and the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        let silence = self.state.time_since_traffic();
        if silence > self.config.silence_timeout() {
            tracing::warn!(
                silence_secs = silence.as_secs(),
                timeout_secs = self.config.silence_timeout().as_secs(),
                "Notification socket silent past heartbeat timeout"
            );
            let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
            return Err(());
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Heartbeat event channel closed");
            return Err(());
        }

        Ok(())
    }
}
