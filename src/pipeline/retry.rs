//! Background retry driver: re-routes events whose retryable dispatch
//! failures are due.
//!
//! Timer-based loop:
//! 1. `OutcomeLedger::due_retries()` → events with an elapsed backoff
//! 2. Load each event from the store
//! 3. `RoutingEngine::route()` → only pending/retryable targets dispatch

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::routing::RoutingEngine;
use crate::store::DeliveryStore;

/// Spawn a background task that retries failed deliveries.
///
/// Returns a `JoinHandle` and shutdown flag.
pub fn spawn_retry_driver(
    store: Arc<DeliveryStore>,
    router: Arc<RoutingEngine>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            max_attempts = router.retry_policy().max_attempts,
            "Retry driver started"
        );

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Retry driver shutting down");
                return;
            }

            run_due_retries(&store, &router).await;
        }
    });

    (handle, shutdown_flag)
}

/// Re-route every event with a due retry. Returns the number of events routed.
pub async fn run_due_retries(store: &DeliveryStore, router: &RoutingEngine) -> usize {
    let due = router
        .ledger()
        .due_retries(Utc::now(), router.retry_policy())
        .await;

    if due.is_empty() {
        return 0;
    }

    info!("Retrying {} delivery(ies)", due.len());

    let mut routed = 0;
    for event_id in due {
        let Some(event) = store.get(&event_id).await else {
            warn!(event_id = %event_id, "Retry due for unknown event");
            continue;
        };

        let report = router.route(&event).await;
        debug!(
            event_id = %event_id,
            dispatched = report.dispatched.len(),
            "Retry routed"
        );
        routed += 1;
    }
    routed
}
