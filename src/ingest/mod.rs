// src/ingest/mod.rs
//! Aggregator: one concurrent fetch per configured source, merged in
//! declaration order. A failing source contributes nothing and never
//! cancels its siblings.

pub mod config;
pub mod dedup;
pub mod fetcher;
pub mod http;
pub mod scheduler;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::event::{Event, SourceReport};
use crate::extract::FieldExtractor;
use crate::ingest::config::{AggregationSettings, AppConfig};
use crate::ingest::fetcher::{fetch_sample, SourceFetch, SourceFetcher, DEFAULT_PAGE_SIZE};
use crate::ingest::http::HttpPageClient;
use crate::ingest::types::{PageClient, SourceConfig};
use crate::normalize::{RecordNormalizer, RunContext};
use crate::settings::DebugFlag;
use crate::stats::AggregationStats;

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("events_runs_total", "Aggregation runs started.");
        describe_counter!("events_records_total", "Raw records received from sources.");
        describe_counter!("events_kept_total", "Events kept after normalization and dedup.");
        describe_counter!("events_dropped_total", "Records dropped by the normalizer, by reason.");
        describe_counter!(
            "events_source_errors_total",
            "Source fetches aborted by a network or parse error."
        );
        describe_counter!(
            "events_duplicates_total",
            "Events collapsed as cross-source duplicates."
        );
        describe_histogram!("events_source_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_gauge!("events_last_run_ts", "Unix ts when aggregation last completed.");
    });
}

/// `test_api` failure.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("unknown source `{0}`")]
    UnknownSource(String),
    #[error(transparent)]
    Request(#[from] anyhow::Error),
}

/// Result of one aggregation run.
#[derive(Debug, Clone, Default)]
pub struct AggregationRun {
    pub events: Vec<Event>,
    pub sources: Vec<SourceReport>,
    /// Events removed as cross-source duplicates.
    pub duplicates: usize,
    /// RFC 3339 time the run started.
    pub started_at: String,
}

impl AggregationRun {
    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| !s.is_success()).count()
    }
}

pub struct EventAggregator {
    sources: Vec<SourceConfig>,
    client: Arc<dyn PageClient>,
    normalizer: RecordNormalizer,
    settings: AggregationSettings,
    page_size: usize,
    debug: DebugFlag,
}

impl EventAggregator {
    pub fn new(sources: Vec<SourceConfig>, client: Arc<dyn PageClient>) -> Self {
        Self {
            sources,
            client,
            normalizer: RecordNormalizer::default(),
            settings: AggregationSettings::default(),
            page_size: DEFAULT_PAGE_SIZE,
            debug: DebugFlag::default(),
        }
    }

    /// Wire the reqwest client, extractor candidates and sources from config.
    pub fn from_config(cfg: &AppConfig, debug: DebugFlag) -> Result<Self> {
        let client = HttpPageClient::new(&cfg.http)?;
        Ok(Self::new(cfg.sources.clone(), Arc::new(client))
            .with_normalizer(RecordNormalizer::new(FieldExtractor::new(cfg.fields.clone())))
            .with_settings(cfg.aggregation.clone())
            .with_page_size(cfg.http.page_size)
            .with_debug(debug))
    }

    pub fn with_normalizer(mut self, normalizer: RecordNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_settings(mut self, settings: AggregationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_debug(mut self, debug: DebugFlag) -> Self {
        self.debug = debug;
        self
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    pub fn source(&self, key: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.key == key)
    }

    pub fn debug_flag(&self) -> &DebugFlag {
        &self.debug
    }

    /// Events of every source; empty (not an error) when all sources fail.
    pub async fn fetch_all_events(&self) -> Vec<Event> {
        self.run().await.events
    }

    /// Pure tally, no I/O.
    pub fn get_event_stats(&self, events: &[Event]) -> AggregationStats {
        crate::stats::get_event_stats(events)
    }

    /// Fan out to every source, wait for all of them to settle, merge.
    pub async fn run(&self) -> AggregationRun {
        describe_metrics();
        counter!("events_runs_total").increment(1);

        let ctx = RunContext::new(self.debug.is_enabled(), self.settings.missing_start_date);
        let fetcher =
            SourceFetcher::new(self.client.as_ref(), &self.normalizer).with_page_size(self.page_size);

        tracing::info!(target: "ingest", sources = self.sources.len(), "aggregation started");

        let fetches: Vec<SourceFetch> =
            join_all(self.sources.iter().map(|s| fetcher.fetch_source(s, &ctx))).await;

        let mut events = Vec::new();
        let mut reports = Vec::with_capacity(self.sources.len());
        for (source, fetch) in self.sources.iter().zip(fetches) {
            let error = fetch.error.as_ref().map(|e| format!("{e:#}"));
            match &error {
                None => tracing::info!(
                    target: "ingest",
                    source = %source.key,
                    events = fetch.events.len(),
                    records = fetch.records,
                    pages = fetch.pages,
                    "source loaded"
                ),
                Some(err) => tracing::warn!(
                    target: "ingest",
                    source = %source.key,
                    events = fetch.events.len(),
                    error = %err,
                    "source failed"
                ),
            }
            reports.push(SourceReport {
                key: source.key.clone(),
                name: source.name.clone(),
                events: fetch.events.len(),
                pages: fetch.pages,
                error,
            });
            events.extend(fetch.events);
        }

        let (events, duplicates) = if self.settings.dedup {
            dedup::collapse_duplicates(events, self.settings.dedup_title_similarity)
        } else {
            (events, 0)
        };

        counter!("events_kept_total").increment(events.len() as u64);
        counter!("events_duplicates_total").increment(duplicates as u64);
        gauge!("events_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        let run = AggregationRun {
            events,
            sources: reports,
            duplicates,
            started_at: ctx.timestamp(),
        };
        tracing::info!(
            target: "ingest",
            total = run.events.len(),
            succeeded = run.sources.len() - run.failed_sources(),
            failed = run.failed_sources(),
            duplicates,
            "aggregation finished"
        );
        run
    }

    /// Raw 5-record sample of one source, for schema inspection.
    pub async fn test_api(&self, key: &str) -> Result<Value, ProbeError> {
        let source = self
            .source(key)
            .ok_or_else(|| ProbeError::UnknownSource(key.to_string()))?;
        Ok(fetch_sample(self.client.as_ref(), source).await?)
    }
}
