//! Console Alert Sink
//!
//! Default `AlertSink` for headless deployments: escalation attempts go
//! to the log at warn level with a terminal bell. Host shells with real
//! audio/notification surfaces supply their own sink instead.

use async_trait::async_trait;

use crate::application::ports::{AlertSink, OrderAlert};
use crate::domain::order::OrderId;

/// Sink that logs alerts and rings the terminal bell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleAlertSink;

#[async_trait]
impl AlertSink for ConsoleAlertSink {
    async fn alert(&self, alert: &OrderAlert) -> Result<(), String> {
        tracing::warn!(
            order_id = alert.order_id,
            order_number = %alert.order_number,
            amount = %alert.amount,
            attempt = alert.attempt,
            "PENDING ORDER ALERT"
        );
        if !alert.suppress_os_notification {
            // BEL is the closest a terminal gets to a notification sound.
            eprint!("\x07");
        }
        Ok(())
    }

    async fn clear(&self, order_id: OrderId) {
        tracing::info!(order_id, "Alert cleared");
    }
}
