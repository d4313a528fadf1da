//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Arrivals**: order signals received per channel, admissions,
//!   duplicates rejected
//! - **Escalation**: alert attempts fired, active sessions
//! - **Connectivity**: socket reconnects, poll fetches and failures

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use metrics::{counter, describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::domain::order::Channel;

/// Initialize the Prometheus recorder with an HTTP scrape endpoint.
///
/// A port of 0 disables the exporter; metric macros then fall through
/// to the no-op recorder.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind its listener.
pub fn init_metrics(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if port == 0 {
        tracing::info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_metrics();
    tracing::info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "order_alert_arrivals_total",
        "Order-arrival signals received, labeled by channel"
    );
    describe_counter!(
        "order_alert_admissions_total",
        "Arrivals admitted as genuinely new orders"
    );
    describe_counter!(
        "order_alert_duplicates_total",
        "Arrivals rejected as already-seen, labeled by channel"
    );
    describe_counter!(
        "order_alert_escalation_fires_total",
        "Alert escalation attempts fired"
    );
    describe_gauge!(
        "order_alert_active_sessions",
        "Alert sessions currently escalating"
    );
    describe_counter!(
        "order_alert_socket_reconnects_total",
        "Notification socket reconnection attempts"
    );
    describe_counter!(
        "order_alert_polls_total",
        "Successful pending-order poll fetches"
    );
    describe_counter!(
        "order_alert_poll_failures_total",
        "Failed pending-order poll fetches"
    );
}

/// Record an order-arrival signal from a channel.
pub fn record_arrival(channel: Channel) {
    counter!(
        "order_alert_arrivals_total",
        "channel" => channel.as_str()
    )
    .increment(1);
}

/// Record an admission of a genuinely new order.
pub fn record_admission(channel: Channel) {
    counter!(
        "order_alert_admissions_total",
        "channel" => channel.as_str()
    )
    .increment(1);
}

/// Record a duplicate arrival rejected by dedup.
pub fn record_duplicate(channel: Channel) {
    counter!(
        "order_alert_duplicates_total",
        "channel" => channel.as_str()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_port_is_a_noop() {
        assert!(init_metrics(0).is_ok());
    }

    #[test]
    fn recording_without_recorder_does_not_panic() {
        record_arrival(Channel::Socket);
        record_admission(Channel::Poll);
        record_duplicate(Channel::Push);
    }
}
