//! Polling Fallback
//!
//! Safety-net delivery channel that periodically fetches the pending
//! order list over HTTP and diffs it against the last snapshot. Runs at
//! a fast cadence in the foreground and a slower one in the background,
//! and fetches immediately when the app returns to the foreground.
//!
//! Fetches are awaited inline inside the tick loop, so a slow request
//! can never overlap the next one; ticks that would have fired during a
//! long fetch are skipped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::domain::order::{OrderArrival, OrderId};
use crate::infrastructure::api::OrdersApiClient;
use crate::infrastructure::socket::ConnectionState;

// =============================================================================
// Schedule
// =============================================================================

/// App visibility, as reported by the host shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// App is visible and focused.
    #[default]
    Foreground,
    /// App is hidden or minimized.
    Background,
}

/// Host platform; decides the background cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// Browser tab.
    #[default]
    Web,
    /// Native mobile shell.
    Mobile,
}

impl Platform {
    /// Get the platform name used in API payloads and log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Mobile => "mobile",
        }
    }
}

/// Polling cadence per visibility state.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    /// Interval while the app is in the foreground.
    pub interval_foreground: Duration,
    /// Interval while the app is in the background.
    pub interval_background: Duration,
}

impl PollSchedule {
    /// Build the standard schedule for a platform. Mobile backgrounds
    /// poll faster than web because mobile OSes suspend sockets more
    /// aggressively.
    #[must_use]
    pub const fn for_platform(platform: Platform) -> Self {
        Self {
            interval_foreground: Duration::from_secs(3),
            interval_background: match platform {
                Platform::Web => Duration::from_secs(10),
                Platform::Mobile => Duration::from_secs(5),
            },
        }
    }

    /// Interval for the given visibility.
    #[must_use]
    pub const fn interval_for(&self, visibility: Visibility) -> Duration {
        match visibility {
            Visibility::Foreground => self.interval_foreground,
            Visibility::Background => self.interval_background,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the polling fallback.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// An order id appeared that was absent from the previous snapshot.
    NewArrival(OrderArrival),
    /// An order id disappeared from the pending list; it was handled
    /// elsewhere (another device, another context, the backend).
    Retired(OrderId),
    /// A fetch completed successfully.
    FetchOk {
        /// Number of pending orders in the snapshot.
        pending: usize,
    },
    /// A fetch failed; the previous snapshot is kept.
    FetchFailed,
}

// =============================================================================
// Polling Fallback
// =============================================================================

/// Periodic pending-orders poller.
pub struct PollingFallback {
    api: Arc<OrdersApiClient>,
    schedule: PollSchedule,
    visibility_rx: watch::Receiver<Visibility>,
    event_tx: mpsc::Sender<PollEvent>,
    cancel: CancellationToken,
}

impl PollingFallback {
    /// Create a new poller.
    #[must_use]
    pub const fn new(
        api: Arc<OrdersApiClient>,
        schedule: PollSchedule,
        visibility_rx: watch::Receiver<Visibility>,
        event_tx: mpsc::Sender<PollEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            schedule,
            visibility_rx,
            event_tx,
            cancel,
        }
    }

    /// Run the polling loop until cancelled.
    ///
    /// The first fetch fires immediately; after that, ticks follow the
    /// visibility-appropriate cadence. A hidden-to-visible transition
    /// triggers an immediate fetch and re-arms the interval.
    pub async fn run(mut self) {
        let mut known_ids: HashSet<OrderId> = HashSet::new();
        let mut visibility = *self.visibility_rx.borrow();
        let mut interval = self.make_interval(visibility);

        tracing::info!(
            foreground_ms = self.schedule.interval_foreground.as_millis(),
            background_ms = self.schedule.interval_background.as_millis(),
            "Polling fallback started"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Polling fallback stopped");
                    return;
                }
                changed = self.visibility_rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Visibility channel closed");
                        return;
                    }
                    let new_visibility = *self.visibility_rx.borrow();
                    if new_visibility == visibility {
                        continue;
                    }
                    tracing::debug!(
                        foreground = new_visibility == Visibility::Foreground,
                        "Visibility changed, re-arming poll interval"
                    );
                    let was_background = visibility == Visibility::Background;
                    visibility = new_visibility;
                    interval = self.make_interval(visibility);
                    // Coming back to the foreground must not wait out a
                    // background-length tick.
                    if was_background && visibility == Visibility::Foreground {
                        self.fetch_and_diff(&mut known_ids).await;
                        interval.reset();
                    }
                }
                _ = interval.tick() => {
                    self.fetch_and_diff(&mut known_ids).await;
                }
            }
        }
    }

    fn make_interval(&self, visibility: Visibility) -> tokio::time::Interval {
        let mut interval = tokio::time::interval(self.schedule.interval_for(visibility));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    }

    /// Fetch the pending list and emit diff events against the previous
    /// snapshot. On failure the snapshot is kept so a transient error
    /// cannot make every pending order look retired.
    async fn fetch_and_diff(&self, known_ids: &mut HashSet<OrderId>) {
        let orders = match self.api.fetch_pending().await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::warn!(error = %e, "Pending orders fetch failed");
                metrics::counter!("order_alert_poll_failures_total").increment(1);
                let _ = self.event_tx.send(PollEvent::FetchFailed).await;
                return;
            }
        };

        metrics::counter!("order_alert_polls_total").increment(1);
        let current_ids: HashSet<OrderId> = orders.iter().map(|o| o.id).collect();

        for order in &orders {
            if !known_ids.contains(&order.id) {
                tracing::debug!(
                    order_id = order.id,
                    order_number = %order.order_number,
                    "Poll discovered pending order"
                );
                let _ = self
                    .event_tx
                    .send(PollEvent::NewArrival(OrderArrival::from_pending(order)))
                    .await;
            }
        }

        for retired in known_ids.difference(&current_ids) {
            tracing::debug!(order_id = retired, "Order left the pending list");
            let _ = self.event_tx.send(PollEvent::Retired(*retired)).await;
        }

        *known_ids = current_ids;
        let _ = self
            .event_tx
            .send(PollEvent::FetchOk {
                pending: orders.len(),
            })
            .await;
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Starts and stops the poller off the notification socket's state.
///
/// The poller runs only while the socket is parked in `Failed`; while
/// the socket is live it is the sole discovery channel and the poller
/// stays down.
pub struct PollingController {
    api: Arc<OrdersApiClient>,
    schedule: PollSchedule,
    socket_state_rx: watch::Receiver<ConnectionState>,
    visibility_rx: watch::Receiver<Visibility>,
    event_tx: mpsc::Sender<PollEvent>,
    cancel: CancellationToken,
}

impl PollingController {
    /// Create a new controller.
    #[must_use]
    pub const fn new(
        api: Arc<OrdersApiClient>,
        schedule: PollSchedule,
        socket_state_rx: watch::Receiver<ConnectionState>,
        visibility_rx: watch::Receiver<Visibility>,
        event_tx: mpsc::Sender<PollEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            schedule,
            socket_state_rx,
            visibility_rx,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, toggling the poller on socket state changes.
    pub async fn run(mut self) {
        let mut poller_cancel: Option<CancellationToken> = None;

        // The socket may already be Failed when the controller starts.
        self.apply_state(*self.socket_state_rx.borrow(), &mut poller_cancel);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    if let Some(token) = poller_cancel.take() {
                        token.cancel();
                    }
                    return;
                }
                changed = self.socket_state_rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Socket state channel closed");
                        if let Some(token) = poller_cancel.take() {
                            token.cancel();
                        }
                        return;
                    }
                    let state = *self.socket_state_rx.borrow();
                    self.apply_state(state, &mut poller_cancel);
                }
            }
        }
    }

    fn apply_state(
        &self,
        state: ConnectionState,
        poller_cancel: &mut Option<CancellationToken>,
    ) {
        match state {
            ConnectionState::Failed => {
                if poller_cancel.is_some() {
                    return;
                }
                tracing::info!("Socket failed; starting polling fallback");
                let token = self.cancel.child_token();
                let poller = PollingFallback::new(
                    self.api.clone(),
                    self.schedule.clone(),
                    self.visibility_rx.clone(),
                    self.event_tx.clone(),
                    token.clone(),
                );
                tokio::spawn(poller.run());
                *poller_cancel = Some(token);
            }
            ConnectionState::Connected => {
                if let Some(token) = poller_cancel.take() {
                    tracing::info!("Socket recovered; stopping polling fallback");
                    token.cancel();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::infrastructure::api::{ApiConfig, RetryConfig};
    use crate::infrastructure::config::AuthToken;

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

    fn order_json(id: u64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "order_number": format!("ORD-{id}"),
            "total_amount": "10.00",
            "created_at": "2024-05-01T10:00:00Z"
        })
    }

    fn fast_schedule() -> PollSchedule {
        PollSchedule {
            interval_foreground: Duration::from_millis(20),
            interval_background: Duration::from_millis(100),
        }
    }

    #[test_case(Platform::Web, Visibility::Foreground, 3; "web foreground")]
    #[test_case(Platform::Web, Visibility::Background, 10; "web background")]
    #[test_case(Platform::Mobile, Visibility::Foreground, 3; "mobile foreground")]
    #[test_case(Platform::Mobile, Visibility::Background, 5; "mobile background")]
    fn schedule_matches_platform_cadence(platform: Platform, visibility: Visibility, secs: u64) {
        let schedule = PollSchedule::for_platform(platform);
        assert_eq!(schedule.interval_for(visibility), Duration::from_secs(secs));
    }

    #[tokio::test]
    async fn emits_arrivals_for_new_orders_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([order_json(1), order_json(2)])),
            )
            .mount(&server)
            .await;

        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Foreground);
        let cancel = CancellationToken::new();
        let poller = PollingFallback::new(
            api_for(&server),
            fast_schedule(),
            vis_rx,
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(poller.run());

        // First snapshot: both orders are new.
        let mut arrivals = Vec::new();
        let mut fetches = 0;
        while fetches < 2 {
            match tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await {
                Ok(Some(PollEvent::NewArrival(arrival))) => arrivals.push(arrival.order_id),
                Ok(Some(PollEvent::FetchOk { .. })) => fetches += 1,
                Ok(Some(_)) => {}
                _ => panic!("poller stalled"),
            }
        }

        // Second fetch saw the same snapshot: no further arrivals.
        assert_eq!(arrivals, vec![1, 2]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn emits_retired_when_order_leaves_pending_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([order_json(7)])),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Foreground);
        let cancel = CancellationToken::new();
        let poller = PollingFallback::new(
            api_for(&server),
            fast_schedule(),
            vis_rx,
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(poller.run());

        let mut saw_arrival = false;
        let mut saw_retired = false;
        while !(saw_arrival && saw_retired) {
            match tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await {
                Ok(Some(PollEvent::NewArrival(arrival))) => {
                    assert_eq!(arrival.order_id, 7);
                    saw_arrival = true;
                }
                Ok(Some(PollEvent::Retired(id))) => {
                    assert_eq!(id, 7);
                    saw_retired = true;
                }
                Ok(Some(_)) => {}
                _ => panic!("poller stalled"),
            }
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failed_fetch_keeps_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([order_json(3)])),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Foreground);
        let cancel = CancellationToken::new();
        let poller = PollingFallback::new(
            api_for(&server),
            fast_schedule(),
            vis_rx,
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(poller.run());

        let mut saw_failure = false;
        while !saw_failure {
            match tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await {
                Ok(Some(PollEvent::Retired(_))) => {
                    panic!("failed fetch must not retire orders");
                }
                Ok(Some(PollEvent::FetchFailed)) => saw_failure = true,
                Ok(Some(_)) => {}
                _ => panic!("poller stalled"),
            }
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn controller_polls_only_while_socket_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Foreground);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let cancel = CancellationToken::new();

        let controller = PollingController::new(
            api_for(&server),
            fast_schedule(),
            state_rx,
            vis_rx,
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(controller.run());

        // Connected: nothing polls.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), event_rx.recv())
                .await
                .is_err(),
            "no polling while socket is live"
        );

        // Failed: the poller comes up.
        state_tx.send(ConnectionState::Failed).unwrap();
        match tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await {
            Ok(Some(PollEvent::FetchOk { .. })) => {}
            other => panic!("expected fallback fetch, got {other:?}"),
        }

        // Recovered: the poller goes back down.
        state_tx.send(ConnectionState::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        while event_rx.try_recv().is_ok() {}
        assert!(
            tokio::time::timeout(Duration::from_millis(100), event_rx.recv())
                .await
                .is_err(),
            "polling must stop once the socket recovers"
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn foreground_transition_fetches_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/vendor/pending/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (vis_tx, vis_rx) = watch::channel(Visibility::Background);
        let cancel = CancellationToken::new();
        let schedule = PollSchedule {
            interval_foreground: Duration::from_secs(60),
            interval_background: Duration::from_secs(60),
        };
        let poller = PollingFallback::new(api_for(&server), schedule, vis_rx, event_tx, cancel.clone());
        let handle = tokio::spawn(poller.run());

        // First tick fires immediately regardless of visibility.
        match tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await {
            Ok(Some(PollEvent::FetchOk { .. })) => {}
            other => panic!("expected initial fetch, got {other:?}"),
        }

        // With 60s intervals, only a visibility flip can produce the
        // next fetch this quickly.
        vis_tx.send(Visibility::Foreground).unwrap();
        match tokio::time::timeout(Duration::from_secs(2), event_rx.recv()).await {
            Ok(Some(PollEvent::FetchOk { .. })) => {}
            other => panic!("expected immediate foreground fetch, got {other:?}"),
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}
