#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Order Alert Engine - Vendor Notification Core
//!
//! Reconciles four unreliable delivery channels into one deduplicated,
//! escalating "pending orders" alert view for a food-delivery vendor:
//!
//! - a live notification WebSocket with heartbeat and bounded reconnect
//! - platform push notifications
//! - an HTTP polling fallback that activates when the socket fails
//! - cross-context signals keeping sibling app contexts consistent
//!
//! However many channels deliver the same order, the vendor is alerted
//! exactly once, and the alert repeats until it is acknowledged.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Channel-agnostic core logic
//!   - `order`: Order types and the canonical arrival signal
//!   - `dedup`: The bounded already-alerted set
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Alert sink interface toward the host shell
//!   - `services`: The engine core event loop
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `socket`: Notification WebSocket client
//!   - `api`: Orders REST API client
//!   - `polling`: Pending-orders poller and its controller
//!   - `push`: Token registration and payload parsing
//!   - `escalation`: Repeating alert scheduler
//!   - `sync`: Cross-context signaling
//!   - `alerting`, `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Socket ──┐
//! Push   ──┤    ┌───────────┐    ┌────────────┐
//!          ├───►│   Dedup   │───►│ Escalation │──► AlertSink
//! Poll   ──┤    └───────────┘    └────────────┘
//! Sync   ──┘          │
//!                     └──► UI events / sibling contexts
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core alert logic with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::dedup::Deduplicator;
pub use domain::order::{Channel, OrderArrival, OrderId, OrderItem, PendingOrder};

// Application core
pub use application::ports::{AlertSink, OrderAlert};
pub use application::services::{
    AckStatus, AlertEngine, AlertEngineHandle, HistoryEntry, PendingSummary, UiEvent,
};

// Infrastructure config
pub use infrastructure::config::{
    AuthToken, ConfigError, EngineConfig, EscalationSettings, PollingSettings, ServerSettings,
    SocketSettings,
};

// Channel adapters (for integration tests)
pub use infrastructure::api::{ApiConfig, ApiError, OrdersApiClient, RetryConfig};
pub use infrastructure::escalation::{AlertEscalator, EscalatorConfig, EscalatorHandle};
pub use infrastructure::polling::{
    Platform, PollEvent, PollSchedule, PollingController, PollingFallback, Visibility,
};
pub use infrastructure::push::{PushConfig, PushRegistrar, PushTokenProvider};
pub use infrastructure::socket::{
    ConnectionState, NotificationSocketClient, SocketClientConfig, SocketEvent, SocketHandle,
};
pub use infrastructure::sync::{CrossContextSync, InProcessTransport, SignalTransport, SyncKind};

// Metrics and telemetry
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::init as init_telemetry;
