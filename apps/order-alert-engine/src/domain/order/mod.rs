//! Order Types
//!
//! Channel-agnostic representations of vendor orders and the arrival
//! signals the delivery channels produce. Two records with the same `id`
//! are the same business event regardless of which channel delivered them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier of a vendor order.
pub type OrderId = u64;

/// Delivery channel an order-arrival signal came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Live notification WebSocket.
    Socket,
    /// Platform push notification.
    Push,
    /// HTTP polling fallback.
    Poll,
}

impl Channel {
    /// Get the channel name for logging and metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

/// A line item on a pending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Item identifier.
    pub id: u64,
    /// Product display name.
    pub product_name: String,
    /// Quantity ordered.
    pub quantity: u32,
    /// Price per unit.
    #[serde(with = "rust_decimal::serde::str")]
    pub unit_price: Decimal,
    /// Line total.
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
}

/// An order awaiting vendor accept/reject action.
///
/// This is the shape returned by `GET /orders/vendor/pending/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    /// Order identifier (business identity).
    pub id: OrderId,
    /// Human-readable order number.
    pub order_number: String,
    /// Order total.
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    /// Customer display name.
    #[serde(default)]
    pub customer_name: String,
    /// Delivery contact phone.
    #[serde(default)]
    pub delivery_phone: String,
    /// Delivery address.
    #[serde(default)]
    pub delivery_address: String,
    /// Line items.
    #[serde(default)]
    pub items: Vec<OrderItem>,
    /// Order creation time.
    pub created_at: DateTime<Utc>,
}

/// Canonical order-arrival signal.
///
/// Every channel adapter converts its raw input into this shape so the
/// downstream dedup/escalation logic is channel-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderArrival {
    /// Order identifier.
    pub order_id: OrderId,
    /// Human-readable order number.
    pub order_number: String,
    /// Order total, kept as the raw string the channel delivered.
    pub amount: String,
    /// Channel the signal came through.
    pub channel: Channel,
    /// Whether an OS-level notification was already shown for this event
    /// before it reached the engine (push payloads that are not data-only).
    pub os_notified: bool,
}

impl OrderArrival {
    /// Build an arrival from a polled pending order.
    #[must_use]
    pub fn from_pending(order: &PendingOrder) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount: order.total_amount.to_string(),
            channel: Channel::Poll,
            os_notified: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        assert_eq!(Channel::Socket.as_str(), "socket");
        assert_eq!(Channel::Push.as_str(), "push");
        assert_eq!(Channel::Poll.as_str(), "poll");
    }

    #[test]
    fn pending_order_deserializes_api_shape() {
        let json = r#"{
            "id": 501,
            "order_number": "ORD-501",
            "total_amount": "349.50",
            "customer_name": "A. Vendor",
            "delivery_phone": "+1555000",
            "delivery_address": "12 Main St",
            "items": [
                {"id": 1, "product_name": "Widget", "quantity": 2,
                 "unit_price": "100.00", "total_price": "200.00"}
            ],
            "created_at": "2024-05-01T10:00:00Z"
        }"#;

        let order: PendingOrder = serde_json::from_str(json).unwrap();
        assert_eq!(order.id, 501);
        assert_eq!(order.order_number, "ORD-501");
        assert_eq!(order.total_amount.to_string(), "349.50");
        assert_eq!(order.items.len(), 1);
    }

    #[test]
    fn pending_order_tolerates_missing_optional_fields() {
        let json = r#"{
            "id": 7,
            "order_number": "ORD-7",
            "total_amount": "10.00",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;

        let order: PendingOrder = serde_json::from_str(json).unwrap();
        assert!(order.customer_name.is_empty());
        assert!(order.items.is_empty());
    }

    #[test]
    fn arrival_from_pending_uses_poll_channel() {
        let order = PendingOrder {
            id: 9,
            order_number: "ORD-9".to_string(),
            total_amount: Decimal::new(1999, 2),
            customer_name: String::new(),
            delivery_phone: String::new(),
            delivery_address: String::new(),
            items: vec![],
            created_at: Utc::now(),
        };

        let arrival = OrderArrival::from_pending(&order);
        assert_eq!(arrival.channel, Channel::Poll);
        assert_eq!(arrival.order_id, 9);
        assert_eq!(arrival.amount, "19.99");
        assert!(!arrival.os_notified);
    }
}
