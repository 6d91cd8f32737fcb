// tests/common/mod.rs
// Scripted in-memory PageClient shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Value};

use occitanie_events::ingest::types::{PageClient, SourceConfig};
use occitanie_events::Category;

/// How one URL path behaves.
#[derive(Clone)]
pub enum Script {
    /// Serve `records` with limit/offset slicing and `total_count`.
    Records(Vec<Value>),
    /// Serve `records` but report a different `total_count`.
    RecordsWithTotal(Vec<Value>, u64),
    /// Always fail like an HTTP 500.
    ServerError,
    /// Serve pages normally, then fail from page `n` (0-based) on.
    FailFromPage(Vec<Value>, usize),
}

#[derive(Default)]
pub struct ScriptedClient {
    scripts: HashMap<String, Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    urls: Mutex<Vec<Url>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, script: Script) -> Self {
        self.scripts.insert(path.to_string(), script);
        self
    }

    /// Sleep before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().clone()
    }
}

fn query_usize(url: &Url, key: &str) -> Option<usize> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
}

fn page(records: &[Value], url: &Url, total: u64) -> Value {
    let limit = query_usize(url, "limit").unwrap_or(100);
    let offset = query_usize(url, "offset").unwrap_or(0);
    let slice: Vec<Value> = records.iter().skip(offset).take(limit).cloned().collect();
    json!({ "total_count": total, "results": slice })
}

#[async_trait]
impl PageClient for ScriptedClient {
    async fn get_json(&self, url: &Url) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.clone());
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }

        match self.scripts.get(url.path()) {
            Some(Script::Records(r)) => Ok(page(r, url, r.len() as u64)),
            Some(Script::RecordsWithTotal(r, total)) => Ok(page(r, url, *total)),
            Some(Script::ServerError) | None => {
                bail!("HTTP 500 Internal Server Error from {url}")
            }
            Some(Script::FailFromPage(r, n)) => {
                let limit = query_usize(url, "limit").unwrap_or(100).max(1);
                let offset = query_usize(url, "offset").unwrap_or(0);
                if offset / limit >= *n {
                    bail!("connection reset while fetching {url}")
                }
                Ok(page(r, url, r.len() as u64))
            }
        }
    }
}

/// Valid Toulouse-area record in the explore v2.1 shape.
pub fn record(i: usize) -> Value {
    named_record("Concert", i)
}

pub fn named_record(prefix: &str, i: usize) -> Value {
    let lat = 43.60 + i as f64 * 0.001;
    let free = if i % 2 == 0 { "true" } else { "false" };
    json!({
        "titre_fr": format!("{prefix} n°{i}"),
        "geo_point_2d": { "lat": lat, "lon": 1.44 },
        "commune": "Toulouse",
        "date_debut": "2025-06-21",
        "gratuit": free,
        "tarif_normal": "12 €"
    })
}

pub fn records(n: usize) -> Vec<Value> {
    (0..n).map(record).collect()
}

pub fn named_records(prefix: &str, n: usize) -> Vec<Value> {
    (0..n).map(|i| named_record(prefix, i)).collect()
}

pub fn source(key: &str, path: &str, max_items: usize) -> SourceConfig {
    SourceConfig {
        key: key.into(),
        name: format!("Source {key}"),
        url: format!("https://data.example.fr{path}"),
        category: Category::Concert,
        max_items,
        filters: vec![],
    }
}
