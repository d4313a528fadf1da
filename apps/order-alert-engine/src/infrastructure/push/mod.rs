//! Push Channel
//!
//! Registers this device's push token with the backend and converts raw
//! push payloads into canonical order arrivals.
//!
//! Token registration is best-effort but persistent: the backend may not
//! be reachable at startup, so registration retries on a fixed cadence
//! until it succeeds. Failures never propagate; the other channels keep
//! the vendor covered in the meantime.
//!
//! Payloads carry a `data_only` discriminator: when absent or false, the
//! host OS already showed a notification for this push and the engine
//! must not show another one for the first escalation attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::order::{Channel, OrderArrival, OrderId};
use crate::infrastructure::api::OrdersApiClient;
use crate::infrastructure::polling::Platform;

/// Source of the device push token.
///
/// The real implementation talks to the platform push SDK; tests supply
/// a canned token.
#[async_trait]
pub trait PushTokenProvider: Send + Sync {
    /// Obtain the current device token, if the platform granted one.
    async fn obtain_token(&self) -> Option<String>;
}

/// Token provider backed by the `ORDER_ALERT_PUSH_TOKEN` environment
/// variable. Stands in for a platform push SDK in headless deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvTokenProvider;

#[async_trait]
impl PushTokenProvider for EnvTokenProvider {
    async fn obtain_token(&self) -> Option<String> {
        std::env::var("ORDER_ALERT_PUSH_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
    }
}

/// Events produced from inbound push payloads.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// Order-bearing push.
    Order(OrderArrival),
    /// Non-order push; surfaced as a plain notice.
    Generic {
        /// Display title.
        title: String,
        /// Display message.
        message: String,
    },
}

/// Configuration for the push registrar.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Host platform, sent alongside the token.
    pub platform: Platform,
    /// Delay between registration retries.
    pub retry_interval: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Web,
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Registers the push token and parses inbound payloads.
pub struct PushRegistrar {
    api: Arc<OrdersApiClient>,
    token_provider: Arc<dyn PushTokenProvider>,
    config: PushConfig,
    cancel: CancellationToken,
}

impl PushRegistrar {
    /// Create a new registrar.
    #[must_use]
    pub fn new(
        api: Arc<OrdersApiClient>,
        token_provider: Arc<dyn PushTokenProvider>,
        config: PushConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            token_provider,
            config,
            cancel,
        }
    }

    /// Run the registration loop until the token is registered or the
    /// engine shuts down. Never returns an error.
    pub async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.try_register().await {
                Ok(()) => {
                    tracing::info!(
                        platform = self.config.platform.as_str(),
                        "Push token registered"
                    );
                    return;
                }
                Err(reason) => {
                    tracing::warn!(
                        reason = %reason,
                        retry_secs = self.config.retry_interval.as_secs(),
                        "Push token registration failed, will retry"
                    );
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.retry_interval) => {}
            }
        }
    }

    async fn try_register(&self) -> Result<(), String> {
        let token = self
            .token_provider
            .obtain_token()
            .await
            .ok_or_else(|| "no push token available".to_string())?;

        self.api
            .register_push_token(&token, self.config.platform.as_str())
            .await
            .map_err(|e| e.to_string())
    }
}

/// Parse a raw push payload into a push event.
///
/// Returns `None` for payloads with neither an order id nor displayable
/// text. Field names arrive in both camelCase and snake_case depending
/// on the sender path; both are accepted.
#[must_use]
pub fn parse_push_payload(payload: &Value) -> Option<PushEvent> {
    let order_id = payload
        .get("orderId")
        .or_else(|| payload.get("order_id"))
        .and_then(value_as_order_id);

    if let Some(order_id) = order_id {
        let order_number = payload
            .get("orderNumber")
            .or_else(|| payload.get("order_number"))
            .and_then(Value::as_str)
            .map_or_else(|| order_id.to_string(), ToOwned::to_owned);
        let amount = payload
            .get("amount")
            .or_else(|| payload.get("total_amount"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "0".to_string());
        // Absent means a notification-bearing push: the OS already
        // alerted, so the engine must not alert twice.
        let data_only = payload
            .get("data_only")
            .and_then(value_as_bool)
            .unwrap_or(false);

        return Some(PushEvent::Order(OrderArrival {
            order_id,
            order_number,
            amount,
            channel: Channel::Push,
            os_notified: !data_only,
        }));
    }

    let title = payload.get("title").and_then(Value::as_str)?;
    let message = payload
        .get("message")
        .or_else(|| payload.get("body"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(PushEvent::Generic {
        title: title.to_string(),
        message: message.to_string(),
    })
}

fn value_as_order_id(value: &Value) -> Option<OrderId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Push relays stringify booleans; accept both encodings.
fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::infrastructure::api::{ApiConfig, RetryConfig};
    use crate::infrastructure::config::AuthToken;

    struct FixedToken(Option<String>);

    #[async_trait]
    impl PushTokenProvider for FixedToken {
        async fn obtain_token(&self) -> Option<String> {
            self.0.clone()
        }
    }

    struct FlakyToken(AtomicU32);

    #[async_trait]
    impl PushTokenProvider for FlakyToken {
        async fn obtain_token(&self) -> Option<String> {
            // First call fails, later ones succeed.
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                None
            } else {
                Some("fcm_late".to_string())
            }
        }
    }

    fn api_for(server: &MockServer) -> Arc<OrdersApiClient> {
        let mut config = ApiConfig::new(server.uri(), AuthToken::new("tok_test"));
        config.retry = RetryConfig {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            multiplier: 1.0,
        };
        Arc::new(OrdersApiClient::new(&config).unwrap())
    }

    fn fast_config() -> PushConfig {
        PushConfig {
            platform: Platform::Web,
            retry_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn registers_token_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register-fcm-token/"))
            .and(body_json(serde_json::json!({
                "fcm_token": "fcm_abc",
                "platform": "web"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let registrar = PushRegistrar::new(
            api_for(&server),
            Arc::new(FixedToken(Some("fcm_abc".to_string()))),
            fast_config(),
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(2), registrar.run())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_until_token_appears() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register-fcm-token/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let registrar = PushRegistrar::new(
            api_for(&server),
            Arc::new(FlakyToken(AtomicU32::new(0))),
            fast_config(),
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(2), registrar.run())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register-fcm-token/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let registrar = PushRegistrar::new(
            api_for(&server),
            Arc::new(FixedToken(Some("fcm_abc".to_string()))),
            fast_config(),
            cancel.clone(),
        );

        let handle = tokio::spawn(registrar.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn data_only_push_is_not_os_notified() {
        let payload = serde_json::json!({
            "orderId": 501,
            "orderNumber": "ORD-501",
            "amount": "349.50",
            "data_only": true
        });

        let Some(PushEvent::Order(arrival)) = parse_push_payload(&payload) else {
            panic!("expected order event");
        };
        assert_eq!(arrival.order_id, 501);
        assert_eq!(arrival.channel, Channel::Push);
        assert!(!arrival.os_notified);
    }

    #[test]
    fn missing_data_only_defaults_to_os_notified() {
        let payload = serde_json::json!({
            "order_id": "77",
            "order_number": "ORD-77",
            "total_amount": 12.5
        });

        let Some(PushEvent::Order(arrival)) = parse_push_payload(&payload) else {
            panic!("expected order event");
        };
        assert_eq!(arrival.order_id, 77);
        assert_eq!(arrival.amount, "12.5");
        assert!(arrival.os_notified, "visible push must suppress a double alert");
    }

    #[test]
    fn stringified_data_only_is_accepted() {
        let payload = serde_json::json!({
            "orderId": 9,
            "data_only": "true"
        });

        let Some(PushEvent::Order(arrival)) = parse_push_payload(&payload) else {
            panic!("expected order event");
        };
        assert!(!arrival.os_notified);
    }

    #[test]
    fn payload_without_order_id_is_generic() {
        let payload = serde_json::json!({
            "title": "Maintenance",
            "body": "Backend restart at 02:00"
        });

        let Some(PushEvent::Generic { title, message }) = parse_push_payload(&payload) else {
            panic!("expected generic event");
        };
        assert_eq!(title, "Maintenance");
        assert_eq!(message, "Backend restart at 02:00");
    }

    #[test]
    fn junk_payload_is_dropped() {
        assert!(parse_push_payload(&serde_json::json!({"foo": 1})).is_none());
    }
}
