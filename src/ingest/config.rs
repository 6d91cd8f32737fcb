// src/ingest/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::event::Category;
use crate::extract::FieldCandidates;
use crate::ingest::fetcher::DEFAULT_PAGE_SIZE;
use crate::ingest::types::{QueryFilter, SourceConfig};
use crate::normalize::MissingStartDate;

pub const DEFAULT_CONFIG_PATH: &str = "config/events.toml";
const FALLBACK_JSON_PATH: &str = "config/events.json";

pub const ENV_CONFIG_PATH: &str = "EVENTS_CONFIG_PATH";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "EVENTS_HTTP_TIMEOUT_SECS";
pub const ENV_REFRESH_INTERVAL_SECS: &str = "EVENTS_REFRESH_INTERVAL_SECS";

/// Explore API v2.1 refuses `limit` above 100.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    pub page_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            connect_timeout_secs: 5,
            user_agent: concat!("occitanie-events/", env!("CARGO_PKG_VERSION")).to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    /// Collapse the same event listed by several sources.
    pub dedup: bool,
    /// Jaro-Winkler threshold on folded titles.
    pub dedup_title_similarity: f64,
    pub missing_start_date: MissingStartDate,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            dedup: true,
            dedup_title_similarity: 0.92,
            missing_start_date: MissingStartDate::Now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 0 disables periodic refresh.
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub aggregation: AggregationSettings,
    pub scheduler: SchedulerConfig,
    pub sources: Vec<SourceConfig>,
    pub fields: FieldCandidates,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            aggregation: AggregationSettings::default(),
            scheduler: SchedulerConfig::default(),
            sources: default_sources(),
            fields: FieldCandidates::default_seed(),
        }
    }
}

impl AppConfig {
    /// Reject configs that would misbehave at runtime; clamp soft values.
    pub fn validate(mut self) -> Result<Self> {
        self.http.page_size = self.http.page_size.clamp(1, MAX_PAGE_SIZE);
        self.http.timeout_secs = self.http.timeout_secs.max(1);
        self.http.connect_timeout_secs = self.http.connect_timeout_secs.max(1);
        if !(0.0..=1.0).contains(&self.aggregation.dedup_title_similarity) {
            self.aggregation.dedup_title_similarity =
                AggregationSettings::default().dedup_title_similarity;
        }

        let mut seen = HashSet::new();
        for s in &self.sources {
            if s.key.trim().is_empty() {
                bail!("source with empty key ({})", s.url);
            }
            if !seen.insert(s.key.as_str()) {
                bail!("duplicate source key `{}`", s.key);
            }
            if s.max_items == 0 {
                bail!("source `{}` has max_items = 0", s.key);
            }
            reqwest::Url::parse(&s.url)
                .with_context(|| format!("source `{}` has invalid url", s.key))?;
        }
        Ok(self)
    }

    pub fn source(&self, key: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.key == key)
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading events config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing events config {}", path.display()))
}

/// Load config using env var + fallbacks, then apply env overrides:
/// 1) $EVENTS_CONFIG_PATH (must exist)
/// 2) config/events.toml
/// 3) config/events.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<AppConfig> {
    let cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        load_config_from(&pb)?
    } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
        load_config_from(Path::new(DEFAULT_CONFIG_PATH))?
    } else if Path::new(FALLBACK_JSON_PATH).exists() {
        load_config_from(Path::new(FALLBACK_JSON_PATH))?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(cfg).validate()
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("invalid JSON");
    }
    toml::from_str(s).context("invalid TOML")
}

fn apply_env_overrides(mut cfg: AppConfig) -> AppConfig {
    if let Some(t) = parse_u64_env(ENV_HTTP_TIMEOUT_SECS) {
        cfg.http.timeout_secs = t;
    }
    if let Some(i) = parse_u64_env(ENV_REFRESH_INTERVAL_SECS) {
        cfg.scheduler.refresh_interval_secs = i;
    }
    cfg
}

fn parse_u64_env(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// The Occitanie open-data sources known to serve usable records.
pub fn default_sources() -> Vec<SourceConfig> {
    const LAREGION: &str = "https://data.laregion.fr/api/explore/v2.1/catalog/datasets";
    const ODS_PUBLIC: &str = "https://public.opendatasoft.com/api/explore/v2.1/catalog/datasets";
    const TOULOUSE: &str = "https://data.toulouse-metropole.fr/api/explore/v2.1/catalog/datasets";

    let region_refine = || {
        vec![QueryFilter::Refine {
            field: "region".into(),
            value: "Occitanie".into(),
        }]
    };
    let src = |key: &str, base: &str, dataset: &str, category, name: &str, max_items| {
        SourceConfig {
            key: key.into(),
            name: name.into(),
            url: format!("{base}/{dataset}/records"),
            category,
            max_items,
            filters: Vec::new(),
        }
    };

    vec![
        src("OCCITANIE_MUSEES", LAREGION, "agenda-d-occitanie-musees", Category::Exposition, "Agenda Musées", 500),
        SourceConfig {
            filters: vec![QueryFilter::FromToday {
                field: "debut_manifestation".into(),
            }],
            ..src("OCCITANIE_SORTIES", LAREGION, "agendas-participatif-des-sorties-en-occitanie", Category::Autre, "Sorties Participatives", 500)
        },
        src("FETE_SCIENCE", LAREGION, "programme-de-la-fete-de-la-science-2024-en-occitanie", Category::Conference, "Fête de la Science", 500),
        src("UNESCO_SITES", LAREGION, "site-unesco-en-occitanie", Category::Exposition, "Sites UNESCO", 100),
        src("MRAC_MUSEES", LAREGION, "mrac-et-alentours", Category::Exposition, "Musées MRAC", 200),
        SourceConfig {
            filters: vec![QueryFilter::Refine {
                field: "location_region".into(),
                value: "Occitanie".into(),
            }],
            ..src("OPENAGENDA_PUBLIC", ODS_PUBLIC, "evenements-publics-openagenda", Category::Autre, "OpenAgenda Événements", 2000)
        },
        src("TOULOUSE_EVENTS", TOULOUSE, "agenda-des-manifestations-culturelles-so-toulouse", Category::Autre, "Événements Toulouse", 800),
        SourceConfig {
            filters: region_refine(),
            ..src("MUSEES_FRANCE", ODS_PUBLIC, "musees-de-france", Category::Exposition, "Musées de France", 1000)
        },
        SourceConfig {
            filters: region_refine(),
            ..src("MONUMENTS_HISTORIQUES", ODS_PUBLIC, "monuments-historiques", Category::Exposition, "Monuments Historiques", 1500)
        },
        SourceConfig {
            filters: region_refine(),
            ..src("BASES_DE_LOISIRS", ODS_PUBLIC, "bases-de-loisirs", Category::Autre, "Bases de Loisirs", 500)
        },
    ]
}
