//! Cross-Context Sync
//!
//! Keeps multiple concurrently running engine contexts (tabs, windows,
//! webviews) consistent: an order alert or acknowledgment in one context
//! is signaled to the others. The transport is best-effort broadcast;
//! receivers re-run their own dedup, so a duplicate or lost signal is
//! never fatal.
//!
//! Envelopes are stamped with the origin context id and a timestamp;
//! receivers drop their own signals and anything older than the
//! freshness window, since a revived context can replay stale state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::order::{Channel, OrderArrival, OrderId};

/// How long a signal stays actionable.
pub const FRESHNESS_WINDOW_SECS: i64 = 300;

/// What a cross-context signal announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    /// A new order was admitted and is alerting in the origin context.
    OrderAlert,
    /// The order was acknowledged in the origin context.
    OrderAcknowledged,
}

/// Signal payload shared between contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Signal kind.
    #[serde(rename = "type")]
    pub kind: SyncKind,
    /// Order the signal is about.
    pub order_id: OrderId,
    /// Human-readable order number.
    pub order_number: String,
    /// Order total as delivered.
    pub amount: String,
    /// Channel that delivered the order in the origin context. Absent on
    /// acknowledgment signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    /// When the signal was published.
    pub timestamp: DateTime<Utc>,
    /// Id of the publishing context; receivers skip their own signals.
    pub origin: u64,
}

impl SyncEnvelope {
    /// Whether the signal is still inside the freshness window.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) <= ChronoDuration::seconds(FRESHNESS_WINDOW_SECS)
    }

    /// Convert an alert signal into a local arrival. The receiving
    /// context re-runs dedup on it like any other channel input.
    #[must_use]
    pub fn to_arrival(&self) -> OrderArrival {
        OrderArrival {
            order_id: self.order_id,
            order_number: self.order_number.clone(),
            amount: self.amount.clone(),
            // Keep the channel the origin context saw, so logs and
            // metrics attribute the order to its real source.
            channel: self.channel.unwrap_or(Channel::Push),
            // Another context already alerted the OS layer.
            os_notified: true,
        }
    }
}

/// Best-effort signal fan-out between contexts.
///
/// The in-process implementation backs tests and single-process
/// deployments; a host shell can bridge this to storage events or a
/// broadcast channel.
pub trait SignalTransport: Send + Sync {
    /// Publish a signal to every context, the publisher included.
    fn publish(&self, envelope: &SyncEnvelope);

    /// Subscribe to the signal stream.
    fn subscribe(&self) -> broadcast::Receiver<SyncEnvelope>;
}

/// Transport backed by a tokio broadcast channel.
#[derive(Debug)]
pub struct InProcessTransport {
    tx: broadcast::Sender<SyncEnvelope>,
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessTransport {
    /// Create a transport with a small replay-free buffer.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }
}

impl SignalTransport for InProcessTransport {
    fn publish(&self, envelope: &SyncEnvelope) {
        // No subscribers is fine; signaling is best-effort.
        let _ = self.tx.send(envelope.clone());
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncEnvelope> {
        self.tx.subscribe()
    }
}

/// Per-context signaling endpoint.
pub struct CrossContextSync {
    transport: std::sync::Arc<dyn SignalTransport>,
    /// Random id distinguishing this context from its siblings.
    context_id: u64,
}

impl CrossContextSync {
    /// Create an endpoint with a fresh random context id.
    #[must_use]
    pub fn new(transport: std::sync::Arc<dyn SignalTransport>) -> Self {
        Self {
            transport,
            context_id: rand::random(),
        }
    }

    /// This context's id.
    #[must_use]
    pub const fn context_id(&self) -> u64 {
        self.context_id
    }

    /// Announce a locally admitted order to sibling contexts.
    pub fn publish_alert(&self, arrival: &OrderArrival) {
        self.publish(
            SyncKind::OrderAlert,
            arrival.order_id,
            &arrival.order_number,
            &arrival.amount,
            Some(arrival.channel),
        );
    }

    /// Announce a local acknowledgment to sibling contexts.
    pub fn publish_acknowledged(&self, order_id: OrderId, order_number: &str) {
        self.publish(SyncKind::OrderAcknowledged, order_id, order_number, "0", None);
    }

    fn publish(
        &self,
        kind: SyncKind,
        order_id: OrderId,
        order_number: &str,
        amount: &str,
        channel: Option<Channel>,
    ) {
        let envelope = SyncEnvelope {
            kind,
            order_id,
            order_number: order_number.to_string(),
            amount: amount.to_string(),
            channel,
            timestamp: Utc::now(),
            origin: self.context_id,
        };
        tracing::debug!(
            kind = ?kind,
            order_id,
            "Publishing cross-context signal"
        );
        self.transport.publish(&envelope);
    }

    /// Subscribe to sibling signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEnvelope> {
        self.transport.subscribe()
    }

    /// Decide whether a received envelope should be acted on: not our
    /// own echo, and still fresh.
    #[must_use]
    pub fn accepts(&self, envelope: &SyncEnvelope) -> bool {
        if envelope.origin == self.context_id {
            return false;
        }
        if !envelope.is_fresh(Utc::now()) {
            tracing::debug!(order_id = envelope.order_id, "Dropping stale sync signal");
            return false;
        }
        true
    }
}
