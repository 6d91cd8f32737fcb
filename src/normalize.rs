//! # Record normalizer
//!
//! Turns one raw source record into a canonical [`Event`], or explains why it
//! was dropped. Pipeline: title → coordinates → bounding box → location →
//! description/dates/price → category → assemble → truncate.
//!
//! Internally every step yields `Result<Event, DropReason>`; callers that only
//! care about survivors use [`RecordNormalizer::transform_page`], which logs
//! drops (debug flag only) and keeps the rest.

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::{Category, Event};
use crate::extract::{FieldExtractor, RawFields};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Lat/lon rectangle used to geofilter events to the target region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Occitanie, with a margin.
pub const OCCITANIE_BBOX: BoundingBox = BoundingBox {
    min_lat: 41.5,
    max_lat: 45.5,
    min_lon: -1.5,
    max_lon: 5.5,
};

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        OCCITANIE_BBOX
    }
}

/// What to do with a record that has no usable start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStartDate {
    /// Use the aggregation time.
    #[default]
    Now,
    /// Drop the record.
    Reject,
}

/// Why a record did not become an event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DropReason {
    #[error("record has no fields object")]
    MissingFields,
    #[error("no usable title")]
    MissingTitle,
    #[error("placeholder title `{0}`")]
    PlaceholderTitle(String),
    #[error("no usable coordinates")]
    MissingCoordinates,
    #[error("outside bounding box ({lat}, {lon})")]
    OutsideBoundingBox { lat: f64, lon: f64 },
    #[error("no usable location")]
    MissingLocation,
    #[error("no usable start date")]
    MissingStartDate,
}

impl DropReason {
    /// Stable label for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DropReason::MissingFields => "missing_fields",
            DropReason::MissingTitle => "missing_title",
            DropReason::PlaceholderTitle(_) => "placeholder_title",
            DropReason::MissingCoordinates => "missing_coordinates",
            DropReason::OutsideBoundingBox { .. } => "outside_bbox",
            DropReason::MissingLocation => "missing_location",
            DropReason::MissingStartDate => "missing_start_date",
        }
    }
}

/// Per-run state shared by every source of one aggregation.
#[derive(Debug)]
pub struct RunContext {
    started_at: DateTime<Utc>,
    sequence: AtomicU64,
    debug: bool,
    missing_start_date: MissingStartDate,
}

impl RunContext {
    pub fn new(debug: bool, missing_start_date: MissingStartDate) -> Self {
        Self::at(Utc::now(), debug, missing_start_date)
    }

    pub fn at(started_at: DateTime<Utc>, debug: bool, missing_start_date: MissingStartDate) -> Self {
        Self {
            started_at,
            sequence: AtomicU64::new(0),
            debug,
            missing_start_date,
        }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Aggregation time as RFC 3339.
    pub fn timestamp(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// `{src}-{title-slug}-{seq}-{ts}`, unique within the run.
    fn next_id(&self, source_name: &str, title: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        let source_prefix: String = source_name
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(3)
            .collect::<String>()
            .to_ascii_lowercase();

        let ts = self.started_at.timestamp_millis().rem_euclid(1_000_000);
        format!("{source_prefix}-{}-{seq}-{ts:06}", slug(title, 15))
    }
}

/// Lowercase, non-alphanumerics folded to single dashes, capped at `max` chars.
fn slug(s: &str, max: usize) -> String {
    let mut out = String::with_capacity(max);
    let mut last_dash = false;
    for ch in s.to_lowercase().chars() {
        if out.chars().count() >= max {
            break;
        }
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Decode HTML entities, strip tags, collapse whitespace, trim.
pub fn clean_text(s: &str) -> String {
    static RE_TAGS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?is)</?[a-z!][^>]*>").expect("tag regex"));
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

    let decoded = html_escape::decode_html_entities(s);
    let stripped = RE_TAGS.replace_all(&decoded, " ");
    RE_WS.replace_all(&stripped, " ").trim().to_string()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect::<String>().trim().to_string()
}

/* ----------------------------
Categorization
---------------------------- */

/// Keyword sets in priority order, matched as lowercase substrings.
const KEYWORD_RULES: &[(Category, &[&str])] = &[
    (Category::Festival, &["festival"]),
    (Category::Concert, &["concert", "musique", "spectacle"]),
    (Category::Exposition, &["exposition", "musée", "art"]),
    (Category::Conference, &["conférence", "colloque", "débat"]),
    (Category::Atelier, &["atelier", "formation", "stage"]),
];

/// Source-name fallbacks, checked when no keyword matched.
const SOURCE_RULES: &[(&[&str], Category)] = &[
    (&["Science"], Category::Conference),
    (&["Sport", "Équipement"], Category::Autre),
    (&["Musée", "UNESCO"], Category::Exposition),
];

/// Keywords first, then source name, then the source's default category.
pub fn categorize(classification: &str, source_name: &str, default_category: Category) -> Category {
    let text = classification.to_lowercase();
    for (cat, words) in KEYWORD_RULES {
        if words.iter().any(|w| text.contains(w)) {
            return *cat;
        }
    }
    for (needles, cat) in SOURCE_RULES {
        if needles.iter().any(|n| source_name.contains(n)) {
            return *cat;
        }
    }
    default_category
}

/* ----------------------------
Normalizer
---------------------------- */

#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    extractor: FieldExtractor,
    bbox: BoundingBox,
}

impl RecordNormalizer {
    pub fn new(extractor: FieldExtractor) -> Self {
        Self {
            extractor,
            bbox: OCCITANIE_BBOX,
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = bbox;
        self
    }

    pub fn extractor(&self) -> &FieldExtractor {
        &self.extractor
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Normalize already-unwrapped fields plus optional GeoJSON geometry.
    pub fn normalize(
        &self,
        fields: &RawFields,
        geometry: Option<&Value>,
        default_category: Category,
        source_name: &str,
        ctx: &RunContext,
    ) -> Result<Event, DropReason> {
        let ex = &self.extractor;

        let title = ex.extract_title(fields);
        if title.is_empty() {
            return Err(DropReason::MissingTitle);
        }
        if ex.is_placeholder_title(&title) {
            return Err(DropReason::PlaceholderTitle(title));
        }

        let coords = ex
            .extract_coordinates(fields, geometry)
            .ok_or(DropReason::MissingCoordinates)?;
        if !self.bbox.contains(coords.latitude, coords.longitude) {
            return Err(DropReason::OutsideBoundingBox {
                lat: coords.latitude,
                lon: coords.longitude,
            });
        }

        let location = ex.build_location(fields).trim().to_string();
        if location.is_empty() {
            return Err(DropReason::MissingLocation);
        }

        let description = ex.extract_description(fields, source_name, &title);
        let start_date = match ex.extract_start_date(fields) {
            Some(d) => d,
            None => match ctx.missing_start_date {
                MissingStartDate::Now => ctx.timestamp(),
                MissingStartDate::Reject => return Err(DropReason::MissingStartDate),
            },
        };
        let end_date = ex.extract_end_date(fields);
        let category = categorize(&ex.classification_text(fields), source_name, default_category);
        let price = ex.extract_price(fields);

        let now = ctx.timestamp();
        Ok(Event {
            id: ctx.next_id(source_name, &title),
            title: truncate_chars(&title, MAX_TITLE_CHARS),
            description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
            start_date,
            end_date,
            location,
            latitude: coords.latitude,
            longitude: coords.longitude,
            category,
            organizer: source_name.to_string(),
            price,
            website_url: ex.extract_website(fields),
            contact_email: ex.extract_contact(fields),
            image_url: ex.extract_image(fields),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Normalize one raw API item, unwrapping `{record: {fields, geometry}}`,
    /// `{fields, geometry}` or a flat object.
    pub fn normalize_item(
        &self,
        item: &Value,
        default_category: Category,
        source_name: &str,
        ctx: &RunContext,
    ) -> Result<Event, DropReason> {
        let record = item.get("record").filter(|r| !r.is_null()).unwrap_or(item);
        let fields = record
            .get("fields")
            .and_then(Value::as_object)
            .or_else(|| record.as_object())
            .ok_or(DropReason::MissingFields)?;
        let geometry = record
            .get("geometry")
            .filter(|g| !g.is_null())
            .or_else(|| item.get("geometry").filter(|g| !g.is_null()));

        self.normalize(fields, geometry, default_category, source_name, ctx)
    }

    /// Normalize a page of raw items; dropped records are logged (debug only) and skipped.
    pub fn transform_page(
        &self,
        items: &[Value],
        default_category: Category,
        source_name: &str,
        ctx: &RunContext,
    ) -> Vec<Event> {
        counter!("events_records_total").increment(items.len() as u64);

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match self.normalize_item(item, default_category, source_name, ctx) {
                Ok(ev) => out.push(ev),
                Err(reason) => {
                    counter!("events_dropped_total", "reason" => reason.as_label()).increment(1);
                    if ctx.debug() {
                        let keys: Vec<&str> = item
                            .as_object()
                            .map(|o| o.keys().map(String::as_str).collect())
                            .unwrap_or_default();
                        tracing::debug!(
                            target: "normalize",
                            source = source_name,
                            %reason,
                            keys = ?keys,
                            "record dropped"
                        );
                    }
                }
            }
        }

        if ctx.debug() {
            tracing::debug!(
                target: "normalize",
                source = source_name,
                kept = out.len(),
                total = items.len(),
                "page transformed"
            );
        }
        out
    }
}
