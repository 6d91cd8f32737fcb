use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

use crate::ingest::config::HttpConfig;
use crate::ingest::types::PageClient;

/// reqwest-backed page client with connect + total request timeouts.
#[derive(Clone)]
pub struct HttpPageClient {
    client: reqwest::Client,
}

impl HttpPageClient {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageClient for HttpPageClient {
    async fn get_json(&self, url: &Url) -> Result<Value> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {status} from {url}");
        }

        resp.json::<Value>()
            .await
            .with_context(|| format!("decoding JSON from {url}"))
    }
}
