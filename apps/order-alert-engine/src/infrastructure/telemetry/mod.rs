//! Tracing Setup
//!
//! Structured logging via `tracing` with env-filter based verbosity.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard env-filter directives; defaults keep the
//!   engine at `info` and HTTP internals at `warn`.
//!
//! # Usage
//!
//! ```ignore
//! use order_alert_engine::infrastructure::telemetry;
//!
//! telemetry::init();
//! tracing::info!("engine starting");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the tracing subscriber.
///
/// Safe to call once at startup; a second call is a no-op failure that
/// is logged rather than panicking, so tests can init freely.
#[allow(clippy::expect_used)]
pub fn init() {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "order_alert_engine=info"
                .parse()
                .expect("static directive 'order_alert_engine=info' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        )
        .add_directive(
            "reqwest=warn"
                .parse()
                .expect("static directive 'reqwest=warn' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
