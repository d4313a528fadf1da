//! Order Alert Engine Binary
//!
//! Starts the vendor order alert engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin order-alert-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ORDER_ALERT_TOKEN`: Backend authentication token
//! - `ORDER_ALERT_API_URL`: Base URL of the orders backend
//!
//! ## Optional
//! - `ORDER_ALERT_WS_URL`: Notification WebSocket URL
//! - `ORDER_ALERT_PLATFORM`: "web" | "mobile" (default: web)
//! - `ORDER_ALERT_PUSH_TOKEN`: Device push token to register
//! - `ORDER_ALERT_METRICS_PORT`: Prometheus metrics port (default: 9091)
//! - `ORDER_ALERT_HEARTBEAT_INTERVAL_SECS`: Socket ping interval (default: 30)
//! - `ORDER_ALERT_MAX_RECONNECT_ATTEMPTS`: Socket retry budget (default: 5)
//! - `ORDER_ALERT_POLL_FOREGROUND_SECS`: Foreground poll interval (default: 3)
//! - `ORDER_ALERT_ESCALATION_CADENCE_SECS`: Alert repeat interval (default: 3)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use order_alert_engine::application::services::AlertEngine;
use order_alert_engine::infrastructure::alerting::ConsoleAlertSink;
use order_alert_engine::infrastructure::api::{ApiConfig, OrdersApiClient};
use order_alert_engine::infrastructure::escalation::{AlertEscalator, EscalatorConfig};
use order_alert_engine::infrastructure::polling::{
    PollEvent, PollSchedule, PollingController, Visibility,
};
use order_alert_engine::infrastructure::push::{EnvTokenProvider, PushConfig, PushRegistrar};
use order_alert_engine::infrastructure::socket::heartbeat::HeartbeatConfig;
use order_alert_engine::infrastructure::socket::reconnect::ReconnectConfig;
use order_alert_engine::infrastructure::socket::{
    NotificationSocketClient, SocketClientConfig, SocketEvent,
};
use order_alert_engine::infrastructure::sync::{CrossContextSync, InProcessTransport};
use order_alert_engine::infrastructure::telemetry;
use order_alert_engine::{AlertEngineHandle, EngineConfig, init_metrics};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();
    telemetry::init();

    tracing::info!("Starting order alert engine");

    let config = EngineConfig::from_env().context("loading configuration from environment")?;
    log_config(&config);

    if let Err(e) = init_metrics(config.server.metrics_port) {
        tracing::warn!(error = %e, "Metrics exporter failed to start; continuing without it");
    }

    let shutdown_token = CancellationToken::new();

    // Orders API client, shared by polling, push and the engine actions
    let api_config = ApiConfig::new(config.api_base_url.clone(), config.token.clone());
    let api = Arc::new(OrdersApiClient::new(&api_config)?);

    // Alert escalator
    let (esc_event_tx, esc_event_rx) = mpsc::channel(64);
    let (escalator, escalator_handle) = AlertEscalator::new(
        EscalatorConfig {
            cadence: config.escalation.cadence,
            max_attempts: config.escalation.max_attempts,
        },
        Arc::new(ConsoleAlertSink),
        esc_event_tx,
        shutdown_token.clone(),
    );
    let escalator_task = tokio::spawn(escalator.run());

    // Notification socket
    let socket_config = SocketClientConfig {
        url: config.socket.url.clone(),
        token: config.token.clone(),
        connect_timeout: config.socket.connect_timeout,
        reconnect: ReconnectConfig {
            base_delay: config.socket.reconnect_delay_initial,
            max_delay: config.socket.reconnect_delay_max,
            jitter_factor: 0.1,
            max_attempts: config.socket.max_reconnect_attempts,
        },
        heartbeat: HeartbeatConfig::new(config.socket.heartbeat_interval),
    };
    let (socket_event_tx, socket_event_rx) = mpsc::channel::<SocketEvent>(256);
    let (socket_client, socket_handle) =
        NotificationSocketClient::new(socket_config, socket_event_tx, shutdown_token.clone());

    // Cross-context signaling
    let sync = CrossContextSync::new(Arc::new(InProcessTransport::new()));

    // Engine core
    let (engine, engine_handle) = AlertEngine::new(
        api.clone(),
        escalator_handle,
        esc_event_rx,
        sync,
        socket_handle.state_watch(),
        config.polling.degraded_after,
        shutdown_token.clone(),
    );
    let engine_task = tokio::spawn(engine.run());

    // Polling fallback, gated on the socket state. A headless engine is
    // always in the foreground.
    let (_visibility_tx, visibility_rx) = watch::channel(Visibility::Foreground);
    let (poll_event_tx, poll_event_rx) = mpsc::channel::<PollEvent>(256);
    let controller = PollingController::new(
        api.clone(),
        PollSchedule {
            interval_foreground: config.polling.interval_foreground,
            interval_background: config.polling.interval_background,
        },
        socket_handle.state_watch(),
        visibility_rx,
        poll_event_tx,
        shutdown_token.clone(),
    );
    let controller_task = tokio::spawn(controller.run());

    // Push token registration
    let registrar = PushRegistrar::new(
        api,
        Arc::new(EnvTokenProvider),
        PushConfig {
            platform: config.platform,
            retry_interval: Duration::from_secs(5),
        },
        shutdown_token.clone(),
    );
    let registrar_task = tokio::spawn(registrar.run());

    // Channel pumps into the engine core
    tokio::spawn(handle_socket_events(socket_event_rx, engine_handle.clone()));
    tokio::spawn(handle_poll_events(poll_event_rx, engine_handle));

    // Socket client last, so everything downstream is listening
    let socket_task = tokio::spawn(async move {
        if let Err(e) = Arc::new(socket_client).run().await {
            tracing::error!(error = %e, "Notification socket gave up; polling fallback active");
        }
    });

    tracing::info!("Order alert engine ready");

    await_shutdown(shutdown_token).await;

    // Bounded drain: every component observes the cancelled token, but a
    // wedged task must not keep the process alive past the deadline.
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = engine_task.await;
        let _ = escalator_task.await;
        let _ = controller_task.await;
        let _ = registrar_task.await;
        let _ = socket_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown deadline exceeded; abandoning remaining tasks"
        );
    }

    tracing::info!("Order alert engine stopped");
    Ok(())
}

/// Pump notification socket events into the engine.
async fn handle_socket_events(
    mut rx: mpsc::Receiver<SocketEvent>,
    engine: AlertEngineHandle,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SocketEvent::Connected => {
                tracing::info!("Notification socket connected");
            }
            SocketEvent::Disconnected => {
                tracing::warn!("Notification socket disconnected");
            }
            SocketEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Notification socket reconnecting");
            }
            SocketEvent::Order(arrival) => {
                engine.submit_arrival(arrival).await;
            }
            SocketEvent::Generic { title, message } => {
                engine.submit_generic(title, message).await;
            }
            SocketEvent::Passthrough(raw) => {
                engine.submit_passthrough(raw).await;
            }
            SocketEvent::Failed => {
                tracing::warn!("Notification socket failed; relying on fallback channels");
            }
        }
    }
}

/// Pump polling fallback events into the engine.
async fn handle_poll_events(mut rx: mpsc::Receiver<PollEvent>, engine: AlertEngineHandle) {
    while let Some(event) = rx.recv().await {
        match event {
            PollEvent::NewArrival(arrival) => {
                engine.submit_arrival(arrival).await;
            }
            PollEvent::Retired(order_id) => {
                engine.submit_retired(order_id).await;
            }
            PollEvent::FetchOk { .. } => {
                engine.submit_poll_success().await;
            }
            PollEvent::FetchFailed => {}
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        platform = config.platform.as_str(),
        ws_url = %config.socket.url,
        metrics_port = config.server.metrics_port,
        heartbeat_secs = config.socket.heartbeat_interval.as_secs(),
        max_reconnects = config.socket.max_reconnect_attempts,
        poll_foreground_secs = config.polling.interval_foreground.as_secs(),
        escalation_cadence_secs = config.escalation.cadence.as_secs(),
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
