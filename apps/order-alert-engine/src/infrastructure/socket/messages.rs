//! Notification Socket Frames
//!
//! Typed representations of the frames exchanged with the notification
//! service. Inbound frames are classified by their `type` tag; frames with
//! an unrecognized tag are forwarded opaquely rather than rejected, so the
//! server can introduce new event kinds without breaking old clients.
//!
//! # Protocol
//!
//! Client sends:
//! - `{"type": "authenticate", "token": "..."}` on connect
//! - `{"type": "ping"}` on heartbeat
//!
//! Server sends:
//! - `{"type": "connection_established", "message": "..."}`
//! - `{"type": "pong"}`
//! - `{"type": "order_notification" | "notification", "notification":
//!   {"id", "type", "title", "message", "data", "action_url"}}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::order::{Channel, OrderArrival, OrderId};

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authentication handshake carrying the vendor's token.
    Authenticate {
        /// Bearer token for the notification service.
        token: String,
    },
    /// Application-level heartbeat.
    Ping,
}

/// The `notification` object inside an order-bearing frame.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationBody {
    /// Notification id; usually the order id, but the server may send it
    /// as either a number or a string.
    #[serde(default)]
    pub id: Option<Value>,
    /// Notification kind (`order`, `payment`, `system`).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Display message.
    #[serde(default)]
    pub message: String,
    /// Free-form payload; order frames carry order fields here.
    #[serde(default)]
    pub data: Option<Value>,
    /// Optional deep link.
    #[serde(default)]
    pub action_url: Option<String>,
}

impl NotificationBody {
    /// Extract the order id, accepting both numeric and string encodings,
    /// falling back to `data.order_id` / `data.orderId`.
    #[must_use]
    pub fn order_id(&self) -> Option<OrderId> {
        if let Some(id) = self.id.as_ref().and_then(value_as_order_id) {
            return Some(id);
        }
        let data = self.data.as_ref()?;
        data.get("order_id")
            .or_else(|| data.get("orderId"))
            .and_then(value_as_order_id)
    }

    /// Extract the human-readable order number from the data payload.
    #[must_use]
    pub fn order_number(&self) -> Option<String> {
        let data = self.data.as_ref()?;
        data.get("order_number")
            .or_else(|| data.get("orderNumber"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    }

    /// Extract the order amount from the data payload.
    #[must_use]
    pub fn amount(&self) -> Option<String> {
        let data = self.data.as_ref()?;
        data.get("total_amount")
            .or_else(|| data.get("amount"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    /// Convert into the canonical arrival signal, if an order id is
    /// present. Bodies without a usable id are generic notices.
    #[must_use]
    pub fn to_arrival(&self) -> Option<OrderArrival> {
        let order_id = self.order_id()?;
        Some(OrderArrival {
            order_id,
            order_number: self.order_number().unwrap_or_else(|| order_id.to_string()),
            amount: self.amount().unwrap_or_else(|| "0".to_string()),
            channel: Channel::Socket,
            os_notified: false,
        })
    }
}

/// Frames received from the server, classified by the `type` tag.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    /// Handshake acknowledgment; the connection is authenticated.
    ConnectionEstablished {
        /// Optional greeting from the server.
        message: Option<String>,
    },
    /// Heartbeat response.
    Pong,
    /// Order-bearing notification.
    Notification(NotificationBody),
    /// Frame with an unknown `type`; forwarded opaquely.
    Unrecognized {
        /// The unrecognized tag value.
        frame_type: String,
        /// The whole frame for downstream listeners.
        raw: Value,
    },
}

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame was not valid JSON.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame had no `type` tag.
    #[error("frame missing `type` tag")]
    MissingType,

    /// An order frame had no `notification` object.
    #[error("order frame missing `notification` object")]
    MissingNotification,
}

/// Decode a text frame from the server.
pub fn decode_frame(text: &str) -> Result<ServerFrame, FrameError> {
    let value: Value = serde_json::from_str(text)?;

    let frame_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_owned();

    match frame_type.as_str() {
        "connection_established" => Ok(ServerFrame::ConnectionEstablished {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        }),
        "pong" => Ok(ServerFrame::Pong),
        "order_notification" | "notification" => {
            let body = value
                .get("notification")
                .cloned()
                .ok_or(FrameError::MissingNotification)?;
            Ok(ServerFrame::Notification(serde_json::from_value(body)?))
        }
        _ => Ok(ServerFrame::Unrecognized {
            frame_type,
            raw: value,
        }),
    }
}

fn value_as_order_id(value: &Value) -> Option<OrderId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_serialize_to_protocol_shape() {
        let auth = ClientFrame::Authenticate {
            token: "tok_123".to_string(),
        };
        let json = serde_json::to_string(&auth).unwrap();
        assert_eq!(json, r#"{"type":"authenticate","token":"tok_123"}"#);

        let ping = serde_json::to_string(&ClientFrame::Ping).unwrap();
        assert_eq!(ping, r#"{"type":"ping"}"#);
    }

    #[test]
    fn decodes_connection_established() {
        let frame =
            decode_frame(r#"{"type":"connection_established","message":"hello"}"#).unwrap();
        match frame {
            ServerFrame::ConnectionEstablished { message } => {
                assert_eq!(message.as_deref(), Some("hello"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_pong() {
        assert!(matches!(
            decode_frame(r#"{"type":"pong"}"#).unwrap(),
            ServerFrame::Pong
        ));
    }

    #[test]
    fn decodes_order_notification_with_numeric_id() {
        let text = r#"{
            "type": "order_notification",
            "notification": {
                "id": 501,
                "type": "order",
                "title": "New Order",
                "message": "Order ORD-501 received",
                "data": {"order_number": "ORD-501", "amount": "349.50"}
            }
        }"#;

        let ServerFrame::Notification(body) = decode_frame(text).unwrap() else {
            panic!("expected notification frame");
        };

        let arrival = body.to_arrival().unwrap();
        assert_eq!(arrival.order_id, 501);
        assert_eq!(arrival.order_number, "ORD-501");
        assert_eq!(arrival.amount, "349.50");
        assert_eq!(arrival.channel, Channel::Socket);
    }

    #[test]
    fn decodes_order_id_from_string_and_data_fallback() {
        let text = r#"{
            "type": "notification",
            "notification": {
                "id": "oops-not-a-number",
                "title": "New Order",
                "message": "check data",
                "data": {"orderId": "77", "orderNumber": "ORD-77"}
            }
        }"#;

        let ServerFrame::Notification(body) = decode_frame(text).unwrap() else {
            panic!("expected notification frame");
        };
        assert_eq!(body.order_id(), Some(77));
        assert_eq!(body.order_number().as_deref(), Some("ORD-77"));
    }

    #[test]
    fn notification_without_order_id_is_generic() {
        let text = r#"{
            "type": "notification",
            "notification": {"title": "Maintenance", "message": "tonight"}
        }"#;

        let ServerFrame::Notification(body) = decode_frame(text).unwrap() else {
            panic!("expected notification frame");
        };
        assert!(body.to_arrival().is_none());
        assert_eq!(body.title, "Maintenance");
    }

    #[test]
    fn unknown_type_is_forwarded_opaquely() {
        let frame = decode_frame(r#"{"type":"promo_blast","payload":{"x":1}}"#).unwrap();
        match frame {
            ServerFrame::Unrecognized { frame_type, raw } => {
                assert_eq!(frame_type, "promo_blast");
                assert_eq!(raw["payload"]["x"], 1);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_error_out() {
        assert!(matches!(
            decode_frame("not json"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"no_type":1}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"order_notification"}"#),
            Err(FrameError::MissingNotification)
        ));
    }
}
