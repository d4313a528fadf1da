//! Alert Escalator
//!
//! Re-fires the alert for every unacknowledged order on a fixed cadence
//! until the vendor acknowledges it or the attempt budget runs out. One
//! scheduler task owns every session; commands arrive over a channel so
//! begin/acknowledge never race a fire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AlertSink, OrderAlert};
use crate::domain::order::{OrderArrival, OrderId};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the escalation schedule.
#[derive(Debug, Clone)]
pub struct EscalatorConfig {
    /// Delay between escalation attempts.
    pub cadence: Duration,
    /// Total attempts per order, the immediate first one included.
    pub max_attempts: u32,
}

impl Default for EscalatorConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

// =============================================================================
// Commands and Events
// =============================================================================

/// Commands accepted by the scheduler task.
#[derive(Debug)]
enum EscalatorCommand {
    Begin(OrderArrival),
    Acknowledge(OrderId),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The vendor acted on the order.
    Acknowledged,
    /// The attempt budget ran out without vendor action.
    Expired,
}

/// Events emitted by the scheduler task.
#[derive(Debug, Clone)]
pub enum EscalatorEvent {
    /// A session ended; the order id is now eligible for dedup release.
    SessionEnded {
        /// Order whose session ended.
        order_id: OrderId,
        /// Why it ended.
        reason: SessionEndReason,
    },
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug)]
struct AlertSession {
    arrival: OrderArrival,
    attempts_fired: u32,
    next_fire_at: Instant,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for driving a running escalator.
#[derive(Debug, Clone)]
pub struct EscalatorHandle {
    cmd_tx: mpsc::Sender<EscalatorCommand>,
    active: Arc<AtomicUsize>,
}

impl EscalatorHandle {
    /// Start an escalation session for a newly admitted order.
    ///
    /// The first attempt fires immediately. Beginning an order that
    /// already has a session is a no-op.
    pub async fn begin(&self, arrival: OrderArrival) {
        if self.cmd_tx.send(EscalatorCommand::Begin(arrival)).await.is_err() {
            tracing::warn!("Escalator task gone; dropping begin");
        }
    }

    /// Acknowledge an order, cancelling any remaining attempts.
    pub async fn acknowledge(&self, order_id: OrderId) {
        if self
            .cmd_tx
            .send(EscalatorCommand::Acknowledge(order_id))
            .await
            .is_err()
        {
            tracing::warn!("Escalator task gone; dropping acknowledge");
        }
    }

    /// Number of sessions currently escalating.
    #[must_use]
    pub fn active_alert_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Escalator
// =============================================================================

/// Scheduler that owns all active alert sessions.
pub struct AlertEscalator {
    config: EscalatorConfig,
    sink: Arc<dyn AlertSink>,
    cmd_rx: mpsc::Receiver<EscalatorCommand>,
    event_tx: mpsc::Sender<EscalatorEvent>,
    active: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl AlertEscalator {
    /// Create a new escalator and its handle.
    #[must_use]
    pub fn new(
        config: EscalatorConfig,
        sink: Arc<dyn AlertSink>,
        event_tx: mpsc::Sender<EscalatorEvent>,
        cancel: CancellationToken,
    ) -> (Self, EscalatorHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let active = Arc::new(AtomicUsize::new(0));

        let escalator = Self {
            config,
            sink,
            cmd_rx,
            event_tx,
            active: active.clone(),
            cancel,
        };
        let handle = EscalatorHandle { cmd_tx, active };
        (escalator, handle)
    }

    /// Run the scheduler until cancelled.
    pub async fn run(mut self) {
        let mut sessions: HashMap<OrderId, AlertSession> = HashMap::new();

        loop {
            let next_fire = sessions.values().map(|s| s.next_fire_at).min();

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(active = sessions.len(), "Alert escalator stopped");
                    return;
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(EscalatorCommand::Begin(arrival)) => {
                            self.handle_begin(&mut sessions, arrival);
                        }
                        Some(EscalatorCommand::Acknowledge(order_id)) => {
                            self.handle_acknowledge(&mut sessions, order_id).await;
                        }
                        None => {
                            tracing::debug!("Escalator command channel closed");
                            return;
                        }
                    }
                }
                () = Self::sleep_until_next(next_fire) => {
                    self.fire_due(&mut sessions).await;
                }
            }
        }
    }

    /// Sleep until the earliest pending fire, or forever when idle.
    async fn sleep_until_next(next_fire: Option<Instant>) {
        match next_fire {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    fn handle_begin(&self, sessions: &mut HashMap<OrderId, AlertSession>, arrival: OrderArrival) {
        if sessions.contains_key(&arrival.order_id) {
            tracing::debug!(order_id = arrival.order_id, "Session already active");
            return;
        }

        tracing::info!(
            order_id = arrival.order_id,
            order_number = %arrival.order_number,
            channel = arrival.channel.as_str(),
            "Starting alert escalation"
        );
        sessions.insert(
            arrival.order_id,
            AlertSession {
                arrival,
                attempts_fired: 0,
                next_fire_at: Instant::now(),
            },
        );
        self.update_active(sessions.len());
    }

    async fn handle_acknowledge(
        &self,
        sessions: &mut HashMap<OrderId, AlertSession>,
        order_id: OrderId,
    ) {
        if sessions.remove(&order_id).is_none() {
            tracing::debug!(order_id, "Acknowledge for unknown session");
            return;
        }

        tracing::info!(order_id, "Alert acknowledged");
        self.sink.clear(order_id).await;
        self.update_active(sessions.len());
        self.emit_ended(order_id, SessionEndReason::Acknowledged).await;
    }

    async fn fire_due(&self, sessions: &mut HashMap<OrderId, AlertSession>) {
        let now = Instant::now();
        let due: Vec<OrderId> = sessions
            .iter()
            .filter(|(_, s)| s.next_fire_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for order_id in due {
            let Some(session) = sessions.get_mut(&order_id) else {
                continue;
            };

            session.attempts_fired += 1;
            let alert = OrderAlert {
                order_id,
                order_number: session.arrival.order_number.clone(),
                amount: session.arrival.amount.clone(),
                attempt: session.attempts_fired,
                suppress_os_notification: session.arrival.os_notified
                    && session.attempts_fired == 1,
            };

            tracing::debug!(
                order_id,
                attempt = alert.attempt,
                "Firing alert attempt"
            );
            metrics::counter!("order_alert_escalation_fires_total").increment(1);

            if let Err(e) = self.sink.alert(&alert).await {
                // One failed modality must not silence the rest of the
                // schedule.
                tracing::warn!(order_id, attempt = alert.attempt, error = %e, "Alert sink failed");
            }

            if session.attempts_fired >= self.config.max_attempts {
                tracing::info!(
                    order_id,
                    attempts = session.attempts_fired,
                    "Escalation expired without acknowledgment"
                );
                sessions.remove(&order_id);
                self.update_active(sessions.len());
                self.emit_ended(order_id, SessionEndReason::Expired).await;
            } else {
                session.next_fire_at = now + self.config.cadence;
            }
        }
    }

    fn update_active(&self, count: usize) {
        self.active.store(count, Ordering::SeqCst);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("order_alert_active_sessions").set(count as f64);
    }

    async fn emit_ended(&self, order_id: OrderId, reason: SessionEndReason) {
        let _ = self
            .event_tx
            .send(EscalatorEvent::SessionEnded { order_id, reason })
            .await;
    }
}
