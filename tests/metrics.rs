// tests/metrics.rs
// Installs the global Prometheus recorder, so it only runs with
// `cargo test --features strict-metrics`.
#![cfg(feature = "strict-metrics")]

mod common;

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::{records, source, Script, ScriptedClient};
use occitanie_events::metrics::Metrics;
use occitanie_events::EventAggregator;

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let metrics = Metrics::init(2).expect("install recorder");

    let client = ScriptedClient::new()
        .with("/good", Script::Records(records(5)))
        .with("/down", Script::ServerError);
    let agg = EventAggregator::new(
        vec![source("GOOD", "/good", 500), source("DOWN", "/down", 500)],
        Arc::new(client),
    );
    assert_eq!(agg.fetch_all_events().await.len(), 5);

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "events_runs_total",
        "events_records_total",
        "events_kept_total",
        "events_source_errors_total",
        "events_source_fetch_ms",
        "events_last_run_ts",
        "events_sources_configured",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
}
