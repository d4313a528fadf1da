//! Orders REST API Client
//!
//! HTTP client for the vendor orders backend with retry logic. Used by
//! the polling fallback (`GET /orders/vendor/pending/`), the accept and
//! reject actions, and push token registration.
//!
//! Retry behavior by status: 429 honors `Retry-After`, 408 and 5xx retry
//! on an exponential backoff, everything else fails fast.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderId, PendingOrder};
use crate::infrastructure::config::AuthToken;

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by the orders API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The token was rejected.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Network-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Response body did not parse.
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// Rate limited and out of retry budget.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the server asked us to wait.
        retry_after_secs: u64,
    },

    /// Retry budget exhausted.
    #[error("max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The order does not exist (or is no longer actionable).
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// Order that was targeted.
        order_id: OrderId,
    },

    /// Other API error.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Retry configuration for API requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Configuration for the orders API client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the orders backend.
    pub base_url: String,
    /// Authentication token.
    pub token: AuthToken,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry behavior.
    pub retry: RetryConfig,
}

impl ApiConfig {
    /// Create a configuration with default timeout and retry.
    #[must_use]
    pub fn new(base_url: String, token: AuthToken) -> Self {
        Self {
            base_url,
            token,
            timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Request/Response Bodies
// =============================================================================

#[derive(Debug, Serialize)]
struct RejectBody<'a> {
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterTokenBody<'a> {
    fcm_token: &'a str,
    platform: &'a str,
}

/// The pending-orders endpoint has shipped both a bare array and a paged
/// wrapper; accept either.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PendingOrdersResponse {
    Plain(Vec<PendingOrder>),
    Paged { results: Vec<PendingOrder> },
}

impl PendingOrdersResponse {
    fn into_orders(self) -> Vec<PendingOrder> {
        match self {
            Self::Plain(orders) | Self::Paged { results: orders } => orders,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default, alias = "detail", alias = "error")]
    message: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Orders API client with retry logic.
#[derive(Debug, Clone)]
pub struct OrdersApiClient {
    client: Client,
    base_url: String,
    token: AuthToken,
    retry_config: RetryConfig,
}

impl OrdersApiClient {
    /// Create a new client from config.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        if config.token.expose().is_empty() {
            return Err(ApiError::AuthenticationFailed);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            retry_config: config.retry.clone(),
        })
    }

    /// Fetch orders currently awaiting vendor action.
    pub async fn fetch_pending(&self) -> Result<Vec<PendingOrder>, ApiError> {
        let response: PendingOrdersResponse =
            self.request("GET", "/orders/vendor/pending/", None::<&()>, None).await?;
        Ok(response.into_orders())
    }

    /// Accept an order.
    pub async fn accept_order(&self, order_id: OrderId) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .request(
                "POST",
                &format!("/orders/{order_id}/accept/"),
                None::<&()>,
                Some(order_id),
            )
            .await?;
        Ok(())
    }

    /// Reject an order with a reason.
    pub async fn reject_order(&self, order_id: OrderId, reason: &str) -> Result<(), ApiError> {
        let body = RejectBody { reason };
        let _: serde_json::Value = self
            .request(
                "POST",
                &format!("/orders/{order_id}/reject/"),
                Some(&body),
                Some(order_id),
            )
            .await?;
        Ok(())
    }

    /// Register a push token for this device.
    pub async fn register_push_token(
        &self,
        fcm_token: &str,
        platform: &str,
    ) -> Result<(), ApiError> {
        let body = RegisterTokenBody {
            fcm_token,
            platform,
        };
        let _: serde_json::Value = self
            .request("POST", "/register-fcm-token/", Some(&body), None)
            .await?;
        Ok(())
    }

    /// Internal request implementation with retry logic.
    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: &str,
        path: &str,
        body: Option<&B>,
        order_id: Option<OrderId>,
    ) -> Result<T, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let mut backoff = ExponentialBackoff::new(&self.retry_config);

        loop {
            let mut request = match method {
                "POST" => self.client.post(&url),
                _ => self.client.get(&url),
            }
            .bearer_auth(self.token.expose());
            if let Some(b) = body {
                request = request.json(b);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            error = %e,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Network error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ApiError::MaxRetriesExceeded {
                        attempts: backoff.attempt,
                    });
                }
            };

            let status = response.status();

            if status.is_success() {
                let text = response
                    .text()
                    .await
                    .map_err(|e| ApiError::Network(e.to_string()))?;
                if text.is_empty() {
                    return serde_json::from_str("null")
                        .map_err(|e| ApiError::JsonParse(e.to_string()));
                }
                return serde_json::from_str(&text)
                    .map_err(|e| ApiError::JsonParse(e.to_string()));
            }

            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());

            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&error_body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(error_body);

            match categorize_status(status) {
                ErrorCategory::RateLimited => {
                    let delay = retry_after
                        .map(Duration::from_secs)
                        .or_else(|| backoff.next_backoff());
                    if let Some(delay) = delay {
                        tracing::warn!(
                            delay_ms = delay.as_millis(),
                            "Rate limited, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ApiError::RateLimited {
                        retry_after_secs: retry_after.unwrap_or(60),
                    });
                }
                ErrorCategory::Retryable => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            status = status.as_u16(),
                            message = %message,
                            delay_ms = delay.as_millis(),
                            "Retryable error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ApiError::MaxRetriesExceeded {
                        attempts: backoff.attempt,
                    });
                }
                ErrorCategory::NonRetryable => {
                    return match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            Err(ApiError::AuthenticationFailed)
                        }
                        StatusCode::NOT_FOUND => order_id.map_or_else(
                            || {
                                Err(ApiError::Api {
                                    status: status.as_u16(),
                                    message: message.clone(),
                                })
                            },
                            |order_id| Err(ApiError::OrderNotFound { order_id }),
                        ),
                        _ => Err(ApiError::Api {
                            status: status.as_u16(),
                            message,
                        }),
                    };
                }
            }
        }
    }
}

/// Error category for determining retry behavior.
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500 | 502 | 503 | 504 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Exponential backoff calculator.
struct ExponentialBackoff {
    attempt: u32,
    max_attempts: u32,
    current_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    const fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            current_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let backoff = self.current_backoff;
        self.current_backoff = Duration::from_secs_f64(
            (self.current_backoff.as_secs_f64() * self.multiplier)
                .min(self.max_backoff.as_secs_f64()),
        );

        Some(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OrdersApiClient {
        let mut config = ApiConfig::new(server.uri(), AuthToken::new("tok_test"));
        config.retry = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        };
        OrdersApiClient::new(&config).unwrap()
    }

    fn pending_json() -> serde_json::Value {
        serde_json::json!([{
            "id": 501,
            "order_number": "ORD-501",
            "total_amount": "349.50",
            "created_at": "2024-05-01T10:00:00Z"
        }])
    }

    #[test]
    fn categorize_statuses() {
        assert!(matches!(
            categorize_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorCategory::RateLimited
        ));
        assert!(matches!(
            categorize_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorCategory::Retryable
        ));
        assert!(matches!(
            categorize_status(StatusCode::BAD_REQUEST),
            ErrorCategory::NonRetryable
        ));
    }

    #[test]
    fn backoff_doubles_and_exhausts() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        };
        let mut backoff = ExponentialBackoff::new(&config);

        assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(100));
        assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(200));
        assert_eq!(backoff.next_backoff().unwrap(), Duration::from_millis(400));
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn empty_token_is_rejected() {
        let config = ApiConfig::new("http://localhost".to_string(), AuthToken::new(""));
        assert!(matches!(
            OrdersApiClient::new(&config),
            Err(ApiError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn fetch_pending_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .and(header("authorization", "Bearer tok_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pending_json()))
            .expect(1)
            .mount(&server)
            .await;

        let orders = client_for(&server).fetch_pending().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, 501);
    }

    #[tokio::test]
    async fn fetch_pending_accepts_paged_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"results": pending_json()})),
            )
            .mount(&server)
            .await;

        let orders = client_for(&server).fetch_pending().await.unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pending_json()))
            .expect(1)
            .mount(&server)
            .await;

        let orders = client_for(&server).fetch_pending().await.unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).fetch_pending().await;
        assert!(matches!(result, Err(ApiError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn accept_posts_to_order_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/501/accept/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).accept_order(501).await.unwrap();
    }

    #[tokio::test]
    async fn reject_sends_reason_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/501/reject/"))
            .and(body_json(serde_json::json!({"reason": "Rejected by vendor"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .reject_order(501, "Rejected by vendor")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn accept_missing_order_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/999/accept/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client_for(&server).accept_order(999).await;
        assert!(matches!(
            result,
            Err(ApiError::OrderNotFound { order_id: 999 })
        ));
    }

    #[tokio::test]
    async fn registers_push_token() {
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

        client_for(&server)
            .register_push_token("fcm_abc", "web")
            .await
            .unwrap();
    }
}
