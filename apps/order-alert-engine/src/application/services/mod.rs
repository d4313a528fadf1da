//! Alert Engine Core
//!
//! The single event loop that reconciles every delivery channel into one
//! consistent alert view. All arrivals, acknowledgments, and
//! cross-context signals funnel through one task, so dedup admission and
//! session creation are atomic without locks spanning awaits.
//!
//! Channel adapters (socket, polling, push) convert their raw input into
//! `OrderArrival` values and submit them through the handle; the engine
//! neither knows nor cares which transport fired first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::dedup::Deduplicator;
use crate::domain::order::{OrderArrival, OrderId};
use crate::infrastructure::api::{ApiError, OrdersApiClient};
use crate::infrastructure::escalation::{EscalatorEvent, EscalatorHandle};
use crate::infrastructure::metrics::{record_admission, record_arrival, record_duplicate};
use crate::infrastructure::push::{parse_push_payload, PushEvent};
use crate::infrastructure::socket::ConnectionState;
use crate::infrastructure::sync::{CrossContextSync, SyncEnvelope, SyncKind};

/// Reason sent to the backend when the vendor rejects an order.
pub const REJECT_REASON: &str = "Rejected by vendor";

/// Number of notification history entries retained.
pub const HISTORY_CAPACITY: usize = 50;

// =============================================================================
// UI-Facing Types
// =============================================================================

/// How an order left the pending view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// The vendor accepted it here.
    Accepted,
    /// The vendor rejected it here.
    Rejected,
    /// It was handled elsewhere: another device, another context, or
    /// the backend retired it.
    HandledElsewhere,
}

/// Events the engine surfaces to the UI layer.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// A new order was admitted; show the order modal.
    ShowOrderModal {
        /// Order identifier.
        order_id: OrderId,
        /// Human-readable order number.
        order_number: String,
        /// Order total as delivered.
        amount: String,
    },
    /// An order left the pending view.
    OrderResolved {
        /// Order identifier.
        order_id: OrderId,
        /// How it was resolved.
        status: AckStatus,
    },
    /// A non-order notification arrived.
    GenericNotice {
        /// Display title.
        title: String,
        /// Display message.
        message: String,
    },
    /// An unrecognized socket frame for listeners with wider protocols.
    Passthrough(Value),
    /// Both the socket and the poller have been failing; order
    /// discovery may be stalled.
    DegradedConnectivity,
}

/// One row of the visible pending-order list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    /// Order identifier.
    pub order_id: OrderId,
    /// Human-readable order number.
    pub order_number: String,
    /// Order total as delivered.
    pub amount: String,
}

/// One entry in the notification history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Display title.
    pub title: String,
    /// Display message.
    pub message: String,
    /// Associated order, if any.
    pub order_id: Option<OrderId>,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Whether the vendor has seen it.
    pub read: bool,
}

// =============================================================================
// Internal Messages
// =============================================================================

#[derive(Debug)]
enum CoreMsg {
    Arrival(OrderArrival),
    Acknowledged {
        order_id: OrderId,
        status: AckStatus,
        broadcast: bool,
    },
    Generic {
        title: String,
        message: String,
    },
    Passthrough(Value),
    PollSucceeded,
    Reset,
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Default)]
struct EngineState {
    pending: HashMap<OrderId, PendingSummary>,
    history: Vec<HistoryEntry>,
    unread: usize,
    last_poll_success: Option<Instant>,
    degraded_reported: bool,
}

impl EngineState {
    fn push_history(&mut self, entry: HistoryEntry) {
        if !entry.read {
            self.unread += 1;
        }
        self.history.insert(0, entry);
        self.history.truncate(HISTORY_CAPACITY);
    }
}

struct EngineInner {
    api: Arc<OrdersApiClient>,
    escalator: EscalatorHandle,
    sync: CrossContextSync,
    dedup: Mutex<Deduplicator>,
    state: RwLock<EngineState>,
    ui_tx: broadcast::Sender<UiEvent>,
    socket_state_rx: watch::Receiver<ConnectionState>,
    degraded_after: Duration,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for interacting with a running alert engine.
#[derive(Clone)]
pub struct AlertEngineHandle {
    core_tx: mpsc::Sender<CoreMsg>,
    inner: Arc<EngineInner>,
}

impl AlertEngineHandle {
    /// Subscribe to UI events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.inner.ui_tx.subscribe()
    }

    /// Submit a canonical order arrival from a channel adapter.
    pub async fn submit_arrival(&self, arrival: OrderArrival) {
        self.send(CoreMsg::Arrival(arrival)).await;
    }

    /// Submit a raw push payload; junk payloads are dropped.
    pub async fn submit_push_payload(&self, payload: &Value) {
        match parse_push_payload(payload) {
            Some(PushEvent::Order(arrival)) => self.send(CoreMsg::Arrival(arrival)).await,
            Some(PushEvent::Generic { title, message }) => {
                self.send(CoreMsg::Generic { title, message }).await;
            }
            None => {
                tracing::debug!("Ignoring push payload with no usable content");
            }
        }
    }

    /// Submit a non-order notification.
    pub async fn submit_generic(&self, title: String, message: String) {
        self.send(CoreMsg::Generic { title, message }).await;
    }

    /// Submit an unrecognized socket frame for passthrough.
    pub async fn submit_passthrough(&self, raw: Value) {
        self.send(CoreMsg::Passthrough(raw)).await;
    }

    /// Report that an order left the backend pending list without local
    /// action.
    pub async fn submit_retired(&self, order_id: OrderId) {
        self.send(CoreMsg::Acknowledged {
            order_id,
            status: AckStatus::HandledElsewhere,
            broadcast: false,
        })
        .await;
    }

    /// Report a successful poll fetch for degraded-connectivity tracking.
    pub async fn submit_poll_success(&self) {
        self.send(CoreMsg::PollSucceeded).await;
    }

    /// Accept an order: backend first, then local teardown.
    ///
    /// # Errors
    ///
    /// Returns the API error when the backend refuses; local alert state
    /// is left untouched so the vendor can retry.
    pub async fn accept(&self, order_id: OrderId) -> Result<(), ApiError> {
        self.inner.api.accept_order(order_id).await?;
        self.send(CoreMsg::Acknowledged {
            order_id,
            status: AckStatus::Accepted,
            broadcast: true,
        })
        .await;
        Ok(())
    }

    /// Reject an order with the standard reason.
    ///
    /// # Errors
    ///
    /// Returns the API error when the backend refuses; local alert state
    /// is left untouched so the vendor can retry.
    pub async fn reject(&self, order_id: OrderId) -> Result<(), ApiError> {
        self.inner.api.reject_order(order_id, REJECT_REASON).await?;
        self.send(CoreMsg::Acknowledged {
            order_id,
            status: AckStatus::Rejected,
            broadcast: true,
        })
        .await;
        Ok(())
    }

    /// Drop all alert state. Used on logout.
    pub async fn reset(&self) {
        self.send(CoreMsg::Reset).await;
    }

    /// Orders currently awaiting vendor action.
    #[must_use]
    pub fn pending_orders(&self) -> Vec<PendingSummary> {
        let mut orders: Vec<PendingSummary> =
            self.inner.state.read().pending.values().cloned().collect();
        orders.sort_by_key(|o| o.order_id);
        orders
    }

    /// Recent notification history, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.state.read().history.clone()
    }

    /// Number of unread history entries.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.inner.state.read().unread
    }

    /// Mark the whole history as read.
    pub fn mark_history_read(&self) {
        let mut state = self.inner.state.write();
        for entry in &mut state.history {
            entry.read = true;
        }
        state.unread = 0;
    }

    /// Number of orders currently escalating.
    #[must_use]
    pub fn active_alert_count(&self) -> usize {
        self.inner.escalator.active_alert_count()
    }

    async fn send(&self, msg: CoreMsg) {
        if self.core_tx.send(msg).await.is_err() {
            tracing::warn!("Engine core gone; dropping message");
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The engine core event loop.
pub struct AlertEngine {
    inner: Arc<EngineInner>,
    core_rx: mpsc::Receiver<CoreMsg>,
    escalator_events: mpsc::Receiver<EscalatorEvent>,
    // Subscribed at construction time: a broadcast receiver only sees
    // envelopes published after subscribe(), so waiting until the task
    // is first polled would lose signals sent during startup.
    sync_rx: broadcast::Receiver<SyncEnvelope>,
    cancel: CancellationToken,
}

impl AlertEngine {
    /// Create an engine and its handle.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        api: Arc<OrdersApiClient>,
        escalator: EscalatorHandle,
        escalator_events: mpsc::Receiver<EscalatorEvent>,
        sync: CrossContextSync,
        socket_state_rx: watch::Receiver<ConnectionState>,
        degraded_after: Duration,
        cancel: CancellationToken,
    ) -> (Self, AlertEngineHandle) {
        let (core_tx, core_rx) = mpsc::channel(256);
        let (ui_tx, _) = broadcast::channel(256);

        let inner = Arc::new(EngineInner {
            api,
            escalator,
            sync,
            dedup: Mutex::new(Deduplicator::default()),
            state: RwLock::new(EngineState::default()),
            ui_tx,
            socket_state_rx,
            degraded_after,
        });
        let sync_rx = inner.sync.subscribe();

        let engine = Self {
            inner: inner.clone(),
            core_rx,
            escalator_events,
            sync_rx,
            cancel,
        };
        let handle = AlertEngineHandle { core_tx, inner };
        (engine, handle)
    }

    /// Run the core loop until cancelled.
    pub async fn run(mut self) {
        let mut degraded_tick = tokio::time::interval(Duration::from_secs(5));
        degraded_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(context_id = self.inner.sync.context_id(), "Alert engine running");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Alert engine stopped");
                    return;
                }
                msg = self.core_rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_core(msg).await,
                        None => return,
                    }
                }
                event = self.escalator_events.recv() => {
                    if let Some(EscalatorEvent::SessionEnded { order_id, .. }) = event {
                        // The session is gone; the id may now age out of
                        // the dedup set, but stays rejected while it lasts.
                        self.inner.dedup.lock().release(order_id);
                    }
                }
                envelope = self.sync_rx.recv() => {
                    match envelope {
                        Ok(envelope) => self.handle_sync(envelope).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Lagged behind cross-context signals");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Cross-context transport closed");
                        }
                    }
                }
                _ = degraded_tick.tick() => {
                    self.check_degraded();
                }
            }
        }
    }

    async fn handle_core(&self, msg: CoreMsg) {
        match msg {
            CoreMsg::Arrival(arrival) => self.handle_arrival(arrival, true).await,
            CoreMsg::Acknowledged {
                order_id,
                status,
                broadcast,
            } => self.handle_acknowledged(order_id, status, broadcast).await,
            CoreMsg::Generic { title, message } => {
                self.inner.state.write().push_history(HistoryEntry {
                    title: title.clone(),
                    message: message.clone(),
                    order_id: None,
                    timestamp: Utc::now(),
                    read: false,
                });
                self.emit(UiEvent::GenericNotice { title, message });
            }
            CoreMsg::Passthrough(raw) => {
                self.emit(UiEvent::Passthrough(raw));
            }
            CoreMsg::PollSucceeded => {
                let mut state = self.inner.state.write();
                state.last_poll_success = Some(Instant::now());
                state.degraded_reported = false;
            }
            CoreMsg::Reset => self.handle_reset().await,
        }
    }

    /// Admit or reject an arrival. `publish` is false for arrivals that
    /// came from a sibling context, which must not echo back.
    async fn handle_arrival(&self, arrival: OrderArrival, publish: bool) {
        record_arrival(arrival.channel);

        if !self.inner.dedup.lock().admit(arrival.order_id) {
            tracing::debug!(
                order_id = arrival.order_id,
                channel = arrival.channel.as_str(),
                "Duplicate arrival rejected"
            );
            record_duplicate(arrival.channel);
            return;
        }

        tracing::info!(
            order_id = arrival.order_id,
            order_number = %arrival.order_number,
            channel = arrival.channel.as_str(),
            "New order admitted"
        );
        record_admission(arrival.channel);

        {
            let mut state = self.inner.state.write();
            state.pending.insert(
                arrival.order_id,
                PendingSummary {
                    order_id: arrival.order_id,
                    order_number: arrival.order_number.clone(),
                    amount: arrival.amount.clone(),
                },
            );
            state.push_history(HistoryEntry {
                title: "New order".to_string(),
                message: format!("Order {} received", arrival.order_number),
                order_id: Some(arrival.order_id),
                timestamp: Utc::now(),
                read: false,
            });
        }

        self.emit(UiEvent::ShowOrderModal {
            order_id: arrival.order_id,
            order_number: arrival.order_number.clone(),
            amount: arrival.amount.clone(),
        });

        if publish {
            self.inner.sync.publish_alert(&arrival);
        }
        self.inner.escalator.begin(arrival).await;
    }

    async fn handle_acknowledged(&self, order_id: OrderId, status: AckStatus, broadcast: bool) {
        self.inner.escalator.acknowledge(order_id).await;

        let removed = {
            let mut state = self.inner.state.write();
            let removed = state.pending.remove(&order_id);
            if let Some(summary) = &removed {
                let verb = match status {
                    AckStatus::Accepted => "accepted",
                    AckStatus::Rejected => "rejected",
                    AckStatus::HandledElsewhere => "handled elsewhere",
                };
                state.push_history(HistoryEntry {
                    title: "Order resolved".to_string(),
                    message: format!("Order {} {verb}", summary.order_number),
                    order_id: Some(order_id),
                    // The vendor initiated or already saw this; not unread.
                    timestamp: Utc::now(),
                    read: true,
                });
            }
            removed
        };

        tracing::info!(order_id, status = ?status, known = removed.is_some(), "Order resolved");
        self.emit(UiEvent::OrderResolved { order_id, status });

        if broadcast {
            let order_number =
                removed.map_or_else(|| order_id.to_string(), |s| s.order_number);
            self.inner.sync.publish_acknowledged(order_id, &order_number);
        }
    }

    async fn handle_sync(&self, envelope: SyncEnvelope) {
        if !self.inner.sync.accepts(&envelope) {
            return;
        }

        tracing::debug!(
            kind = ?envelope.kind,
            order_id = envelope.order_id,
            origin = envelope.origin,
            "Acting on cross-context signal"
        );
        match envelope.kind {
            SyncKind::OrderAlert => {
                // Local dedup decides again; a signal for an order this
                // context already alerted is dropped there.
                self.handle_arrival(envelope.to_arrival(), false).await;
            }
            SyncKind::OrderAcknowledged => {
                self.handle_acknowledged(
                    envelope.order_id,
                    AckStatus::HandledElsewhere,
                    false,
                )
                .await;
            }
        }
    }

    async fn handle_reset(&self) {
        let pending_ids: Vec<OrderId> =
            self.inner.state.read().pending.keys().copied().collect();
        for order_id in pending_ids {
            self.inner.escalator.acknowledge(order_id).await;
        }

        self.inner.dedup.lock().clear();
        let mut state = self.inner.state.write();
        state.pending.clear();
        state.history.clear();
        state.unread = 0;
        state.degraded_reported = false;
        tracing::info!("Alert engine state reset");
    }

    fn check_degraded(&self) {
        if *self.inner.socket_state_rx.borrow() != ConnectionState::Failed {
            return;
        }

        let mut state = self.inner.state.write();
        if state.degraded_reported {
            return;
        }
        let poll_stale = state
            .last_poll_success
            .is_none_or(|at| at.elapsed() > self.inner.degraded_after);
        if poll_stale {
            tracing::warn!(
                degraded_after_secs = self.inner.degraded_after.as_secs(),
                "Socket failed and polling stale; connectivity degraded"
            );
            state.degraded_reported = true;
            drop(state);
            self.emit(UiEvent::DegradedConnectivity);
        }
    }

    fn emit(&self, event: UiEvent) {
        // No UI subscriber is fine; the engine keeps state regardless.
        let _ = self.inner.ui_tx.send(event);
    }
}
