//! Occitanie Events - Binary Entrypoint
//! Boots the Axum HTTP server: loads source config, builds the session,
//! kicks off the initial aggregation and mounts the routes.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use occitanie_events::{
    api,
    ingest::{config::load_config_default, scheduler::spawn_refresh_scheduler},
    metrics::Metrics,
    session::EventSession,
    settings::SettingsStore,
};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - EVENTS_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("EVENTS_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("occitanie_events=info,warn"));

    // The hosting runtime may already own the global subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let cfg = load_config_default().context("loading events config")?;
    let metrics = Metrics::init(cfg.sources.len())?;

    let session = Arc::new(
        EventSession::from_config(&cfg, SettingsStore::open_default())
            .context("building event session")?,
    );
    tracing::info!(
        sources = cfg.sources.len(),
        debug = session.debug_enabled(),
        "event session ready"
    );

    // Initial load runs in the background so the server binds immediately.
    {
        let session = session.clone();
        tokio::spawn(async move {
            session.load_initial().await;
        });
    }
    spawn_refresh_scheduler(session.clone(), cfg.scheduler.refresh_interval_secs);

    let router = api::router(session).merge(metrics.router());

    Ok(router.into())
}
