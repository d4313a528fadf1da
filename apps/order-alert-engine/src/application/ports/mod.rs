//! Application Ports
//!
//! Trait boundaries between the engine core and the host shell. The
//! engine stays testable by talking to these instead of platform APIs.

use async_trait::async_trait;

use crate::domain::order::OrderId;

/// One escalation attempt for an unacknowledged order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAlert {
    /// Order being alerted.
    pub order_id: OrderId,
    /// Human-readable order number.
    pub order_number: String,
    /// Order total as delivered by the channel.
    pub amount: String,
    /// 1-based attempt number within the escalation schedule.
    pub attempt: u32,
    /// The OS already showed a notification for this order; skip the
    /// platform-notification modality for this attempt only.
    pub suppress_os_notification: bool,
}

/// Outbound alert surface (sound, vibration, platform notification).
///
/// Sink failures are reported but must never stop the escalation
/// schedule; a broken speaker still leaves the vibration motor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one escalation attempt.
    ///
    /// # Errors
    ///
    /// Returns an error string when the underlying surface rejected the
    /// alert; the caller logs it and keeps the schedule running.
    async fn alert(&self, alert: &OrderAlert) -> Result<(), String>;

    /// Tear down any visible artifacts for an acknowledged order.
    async fn clear(&self, order_id: OrderId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_sink_is_usable() {
        let mut sink = MockAlertSink::new();
        sink.expect_alert().returning(|_| Ok(()));
        sink.expect_clear().returning(|_| ());

        let alert = OrderAlert {
            order_id: 1,
            order_number: "ORD-1".to_string(),
            amount: "5.00".to_string(),
            attempt: 1,
            suppress_os_notification: false,
        };
        assert!(sink.alert(&alert).await.is_ok());
        sink.clear(1).await;
    }
}
