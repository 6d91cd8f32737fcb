// src/ingest/types.rs
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Category;

/// Static descriptor of one upstream open-data API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier, e.g. "OCCITANIE_SORTIES".
    pub key: String,
    /// Human-readable name, becomes `Event::organizer`.
    pub name: String,
    /// Records endpoint accepting `limit` / `offset`.
    pub url: String,
    /// Category used when no keyword or source-name rule matches.
    pub category: Category,
    /// Per-source cap on fetched records.
    pub max_items: usize,
    /// Extra query refinements applied to every page request.
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
}

/// Source-specific query refinement (OpenDataSoft explore v2.1 syntax).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryFilter {
    /// `refine=field:"value"`
    Refine { field: String, value: String },
    /// `where=field>="YYYY-MM-DD"` with today's date.
    FromToday { field: String },
}

impl QueryFilter {
    pub fn query_pair(&self, today: NaiveDate) -> (&'static str, String) {
        match self {
            QueryFilter::Refine { field, value } => ("refine", format!("{field}:\"{value}\"")),
            QueryFilter::FromToday { field } => {
                ("where", format!("{field}>=\"{}\"", today.format("%Y-%m-%d")))
            }
        }
    }
}

impl SourceConfig {
    /// Page URL with `limit`, `offset` and this source's filters.
    pub fn page_url(&self, limit: usize, offset: usize, today: NaiveDate) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .with_context(|| format!("invalid url for source {}: {}", self.key, self.url))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("limit", &limit.to_string());
            q.append_pair("offset", &offset.to_string());
            for f in &self.filters {
                let (k, v) = f.query_pair(today);
                q.append_pair(k, &v);
            }
        }
        Ok(url)
    }

    /// Unfiltered URL used by the raw sample probe.
    pub fn sample_url(&self, limit: usize) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .with_context(|| format!("invalid url for source {}: {}", self.key, self.url))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }
}

/// One page of an explore-style response: `{ results: [...], total_count: n }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPage {
    #[serde(default)]
    pub results: Option<Vec<Value>>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

impl ApiPage {
    pub fn from_value(v: Value) -> Result<Self> {
        serde_json::from_value(v).context("unexpected page shape")
    }

    pub fn into_results(self) -> Vec<Value> {
        self.results.unwrap_or_default()
    }
}

/// HTTP seam: fetch one URL and decode it as JSON.
#[async_trait::async_trait]
pub trait PageClient: Send + Sync {
    async fn get_json(&self, url: &Url) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorties() -> SourceConfig {
        SourceConfig {
            key: "OCCITANIE_SORTIES".into(),
            name: "Sorties Participatives".into(),
            url: "https://data.example.fr/api/records".into(),
            category: Category::Autre,
            max_items: 500,
            filters: vec![
                QueryFilter::FromToday {
                    field: "debut_manifestation".into(),
                },
                QueryFilter::Refine {
                    field: "region".into(),
                    value: "Occitanie".into(),
                },
            ],
        }
    }

    #[test]
    fn page_url_carries_paging_and_filters() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let url = sorties().page_url(100, 200, today).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("limit".into(), "100".into()),
                ("offset".into(), "200".into()),
                ("where".into(), "debut_manifestation>=\"2025-06-01\"".into()),
                ("refine".into(), "region:\"Occitanie\"".into()),
            ]
        );
    }

    #[test]
    fn sample_url_has_no_filters() {
        let url = sorties().sample_url(5).unwrap();
        assert_eq!(url.query(), Some("limit=5"));
    }

    #[test]
    fn filters_deserialize_from_toml() {
        let src = r#"
            key = "MUSEES_FRANCE"
            name = "Musées de France"
            url = "https://public.example.com/records"
            category = "exposition"
            max_items = 1000

            [[filters]]
            kind = "refine"
            field = "region"
            value = "Occitanie"
        "#;
        let s: SourceConfig = toml::from_str(src).unwrap();
        assert_eq!(s.category, Category::Exposition);
        assert_eq!(s.filters.len(), 1);
    }

    #[test]
    fn null_results_is_empty_page() {
        let p = ApiPage::from_value(serde_json::json!({ "results": null, "total_count": 0 })).unwrap();
        assert!(p.into_results().is_empty());
    }
}
