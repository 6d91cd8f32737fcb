//! Source fetcher: sequential offset pagination of one API, normalizing each
//! page as it arrives. Never fails; errors stop pagination and whatever was
//! gathered so far is kept.

use anyhow::Result;
use metrics::{counter, histogram};
use serde_json::Value;

use crate::event::Event;
use crate::ingest::types::{ApiPage, PageClient, SourceConfig};
use crate::normalize::{RecordNormalizer, RunContext};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Records returned by the raw sample probe.
pub const SAMPLE_SIZE: usize = 5;

/// Raw records dumped per source when debug is on.
const DEBUG_DUMP_RECORDS: usize = 3;

/// Result of paginating one source.
#[derive(Debug, Default)]
pub struct SourceFetch {
    pub events: Vec<Event>,
    pub pages: usize,
    /// Raw records received (before normalization).
    pub records: usize,
    /// Error that stopped pagination early.
    pub error: Option<anyhow::Error>,
}

pub struct SourceFetcher<'a> {
    client: &'a dyn PageClient,
    normalizer: &'a RecordNormalizer,
    page_size: usize,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(client: &'a dyn PageClient, normalizer: &'a RecordNormalizer) -> Self {
        Self {
            client,
            normalizer,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Events of one source; errors are logged and swallowed.
    pub async fn fetch_from_api(&self, source: &SourceConfig, ctx: &RunContext) -> Vec<Event> {
        self.fetch_source(source, ctx).await.events
    }

    /// Paginate until a short page, the cap, or the server-reported total.
    pub async fn fetch_source(&self, source: &SourceConfig, ctx: &RunContext) -> SourceFetch {
        let t0 = std::time::Instant::now();
        let today = ctx.started_at().date_naive();
        let mut out = SourceFetch::default();
        let mut offset = 0usize;

        if ctx.debug() {
            tracing::debug!(
                target: "ingest",
                source = %source.key,
                max_items = source.max_items,
                "loading source"
            );
        }

        while out.records < source.max_items {
            let page = match self.fetch_page(source, offset, today, ctx).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(
                        target: "ingest",
                        source = %source.key,
                        offset,
                        error = %format!("{e:#}"),
                        "source page failed, keeping partial results"
                    );
                    counter!("events_source_errors_total", "source" => source.key.clone())
                        .increment(1);
                    out.error = Some(e);
                    break;
                }
            };
            out.pages += 1;

            let total = page.total_count.filter(|t| *t > 0).map(|t| t as usize);
            let mut results = page.into_results();
            if results.is_empty() {
                break;
            }
            let page_len = results.len();
            results.truncate(source.max_items - out.records);

            if ctx.debug() && out.records == 0 {
                for item in results.iter().take(DEBUG_DUMP_RECORDS) {
                    tracing::debug!(
                        target: "ingest",
                        source = %source.key,
                        record = %item,
                        "raw record"
                    );
                }
            }

            out.records += results.len();
            out.events.extend(self.normalizer.transform_page(
                &results,
                source.category,
                &source.name,
                ctx,
            ));

            let has_more = page_len == self.page_size
                && out.records < total.unwrap_or(source.max_items)
                && out.records < source.max_items;
            offset += self.page_size;

            if ctx.debug() {
                tracing::debug!(
                    target: "ingest",
                    source = %source.key,
                    fetched = out.records,
                    total = ?total,
                    "page fetched"
                );
            }

            if !has_more {
                break;
            }
            if offset > source.max_items {
                tracing::warn!(
                    target: "ingest",
                    source = %source.key,
                    fetched = out.records,
                    "forced stop: offset past source cap"
                );
                break;
            }
        }

        histogram!("events_source_fetch_ms", "source" => source.key.clone())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }

    async fn fetch_page(
        &self,
        source: &SourceConfig,
        offset: usize,
        today: chrono::NaiveDate,
        ctx: &RunContext,
    ) -> Result<ApiPage> {
        let url = source.page_url(self.page_size, offset, today)?;
        if ctx.debug() {
            tracing::debug!(target: "ingest", source = %source.key, %url, "request");
        }
        let body = self.client.get_json(&url).await?;
        ApiPage::from_value(body)
    }
}

/// Fetch `SAMPLE_SIZE` raw records from one source and log their shape.
/// Diagnostic entry point for onboarding a new schema.
pub async fn fetch_sample(client: &dyn PageClient, source: &SourceConfig) -> Result<Value> {
    let url = source.sample_url(SAMPLE_SIZE)?;
    tracing::info!(target: "ingest", source = %source.key, name = %source.name, %url, "sampling source");

    let body = client.get_json(&url).await?;
    let results = body.get("results").and_then(Value::as_array);
    tracing::info!(
        target: "ingest",
        source = %source.key,
        total_count = ?body.get("total_count").and_then(serde_json::Value::as_u64),
        results = results.map(Vec::len).unwrap_or(0),
        "sample received"
    );
    if let Some(first) = results.and_then(|r| r.first()) {
        let keys: Vec<&str> = first
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        tracing::info!(target: "ingest", source = %source.key, keys = ?keys, "first record fields");
    }
    Ok(body)
}
