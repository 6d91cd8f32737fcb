// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::session::EventSession;

/// Spawn a background task that refreshes the session every `interval_secs`.
/// Returns `None` when the interval is 0 (disabled).
///
/// Ticks go through `refresh_events`, so a tick that lands during a manual
/// refresh is skipped by the single-flight guard.
pub fn spawn_refresh_scheduler(
    session: Arc<EventSession>,
    interval_secs: u64,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    tracing::info!(target: "ingest", interval_secs, "periodic refresh enabled");

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; the initial load already covers it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let outcome = session.refresh_events().await;
            tracing::debug!(target: "ingest", ?outcome, "scheduled refresh tick");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_interval_is_disabled() {
        let session = Arc::new(EventSession::new(
            crate::ingest::EventAggregator::new(
                vec![],
                Arc::new(crate::ingest::http::HttpPageClient::new(&Default::default()).unwrap()),
            ),
            crate::settings::DebugSwitch::in_memory(),
        ));
        assert!(spawn_refresh_scheduler(session, 0).is_none());
    }
}
