//! Infrastructure Layer
//!
//! Adapters and external integrations.

/// Console alert sink for headless deployments.
pub mod alerting;

/// Orders REST API client.
pub mod api;

/// Environment-based configuration.
pub mod config;

/// Alert escalation scheduler.
pub mod escalation;

/// Prometheus metrics.
pub mod metrics;

/// HTTP polling fallback.
pub mod polling;

/// Push token registration and payload parsing.
pub mod push;

/// Notification WebSocket client.
pub mod socket;

/// Cross-context signaling.
pub mod sync;

/// Tracing setup.
pub mod telemetry;
