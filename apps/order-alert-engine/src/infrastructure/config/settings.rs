//! Engine Configuration Settings
//!
//! Configuration types for the order alert engine, loaded from
//! environment variables.

use std::time::Duration;

use crate::infrastructure::polling::Platform;

/// Backend authentication token.
#[derive(Clone)]
pub struct AuthToken(String);

impl AuthToken {
    /// Create a new token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthToken").field(&"[REDACTED]").finish()
    }
}

/// Notification socket settings.
#[derive(Debug, Clone)]
pub struct SocketSettings {
    /// WebSocket URL of the notification service.
    pub url: String,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Heartbeat ping interval; silence past twice this forces a reconnect.
    pub heartbeat_interval: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Maximum reconnection attempts before parking in Failed (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            url: "wss://localhost:8000/ws/notifications/".to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

/// Polling fallback settings.
#[derive(Debug, Clone)]
pub struct PollingSettings {
    /// Poll interval while the app is in the foreground.
    pub interval_foreground: Duration,
    /// Poll interval while the app is in the background.
    pub interval_background: Duration,
    /// How long the poller may go without a successful fetch, while the
    /// socket is down, before connectivity is reported as degraded.
    pub degraded_after: Duration,
}

impl PollingSettings {
    /// Standard settings for a platform.
    #[must_use]
    pub const fn for_platform(platform: Platform) -> Self {
        Self {
            interval_foreground: Duration::from_secs(3),
            interval_background: match platform {
                Platform::Web => Duration::from_secs(10),
                Platform::Mobile => Duration::from_secs(5),
            },
            degraded_after: Duration::from_secs(60),
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self::for_platform(Platform::Web)
    }
}

/// Alert escalation settings.
#[derive(Debug, Clone)]
pub struct EscalationSettings {
    /// Delay between escalation attempts.
    pub cadence: Duration,
    /// Total attempts per order.
    pub max_attempts: u32,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 9091 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the orders backend.
    pub api_base_url: String,
    /// Backend authentication token.
    pub token: AuthToken,
    /// Host platform.
    pub platform: Platform,
    /// Notification socket settings.
    pub socket: SocketSettings,
    /// Polling fallback settings.
    pub polling: PollingSettings,
    /// Alert escalation settings.
    pub escalation: EscalationSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing
    /// or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var("ORDER_ALERT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("ORDER_ALERT_TOKEN".to_string()))?;
        if token.is_empty() {
            return Err(ConfigError::EmptyValue("ORDER_ALERT_TOKEN".to_string()));
        }

        let api_base_url = std::env::var("ORDER_ALERT_API_URL")
            .map_err(|_| ConfigError::MissingEnvVar("ORDER_ALERT_API_URL".to_string()))?;
        if api_base_url.is_empty() {
            return Err(ConfigError::EmptyValue("ORDER_ALERT_API_URL".to_string()));
        }

        let platform = std::env::var("ORDER_ALERT_PLATFORM")
            .map(|s| platform_from_str(&s))
            .unwrap_or_default();

        let socket_defaults = SocketSettings::default();
        let socket = SocketSettings {
            url: std::env::var("ORDER_ALERT_WS_URL").unwrap_or(socket_defaults.url),
            connect_timeout: parse_env_duration_secs(
                "ORDER_ALERT_CONNECT_TIMEOUT_SECS",
                socket_defaults.connect_timeout,
            ),
            heartbeat_interval: parse_env_duration_secs(
                "ORDER_ALERT_HEARTBEAT_INTERVAL_SECS",
                socket_defaults.heartbeat_interval,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "ORDER_ALERT_RECONNECT_DELAY_INITIAL_MS",
                socket_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "ORDER_ALERT_RECONNECT_DELAY_MAX_SECS",
                socket_defaults.reconnect_delay_max,
            ),
            max_reconnect_attempts: parse_env_u32(
                "ORDER_ALERT_MAX_RECONNECT_ATTEMPTS",
                socket_defaults.max_reconnect_attempts,
            ),
        };

        let polling_defaults = PollingSettings::for_platform(platform);
        let polling = PollingSettings {
            interval_foreground: parse_env_duration_secs(
                "ORDER_ALERT_POLL_FOREGROUND_SECS",
                polling_defaults.interval_foreground,
            ),
            interval_background: parse_env_duration_secs(
                "ORDER_ALERT_POLL_BACKGROUND_SECS",
                polling_defaults.interval_background,
            ),
            degraded_after: parse_env_duration_secs(
                "ORDER_ALERT_DEGRADED_AFTER_SECS",
                polling_defaults.degraded_after,
            ),
        };

        let escalation_defaults = EscalationSettings::default();
        let escalation = EscalationSettings {
            cadence: parse_env_duration_secs(
                "ORDER_ALERT_ESCALATION_CADENCE_SECS",
                escalation_defaults.cadence,
            ),
            max_attempts: parse_env_u32(
                "ORDER_ALERT_ESCALATION_MAX_ATTEMPTS",
                escalation_defaults.max_attempts,
            ),
        };

        let server = ServerSettings {
            metrics_port: parse_env_u16(
                "ORDER_ALERT_METRICS_PORT",
                ServerSettings::default().metrics_port,
            ),
        };

        Ok(Self {
            api_base_url,
            token: AuthToken::new(token),
            platform,
            socket,
            polling,
            escalation,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn platform_from_str(s: &str) -> Platform {
    match s.to_lowercase().as_str() {
        "mobile" | "ios" | "android" => Platform::Mobile,
        _ => Platform::Web,
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
