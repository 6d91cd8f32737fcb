//! # Field extractor
//!
//! Compatibility layer over heterogeneous open-data schemas. Every logical
//! field (title, coordinates, dates, price, ...) has an ordered list of
//! candidate keys; the first candidate holding a value of the right type wins.
//!
//! Candidate lists are data (`FieldCandidates`), loaded from the `[fields]`
//! section of `config/events.toml` and falling back to `default_seed()`.
//! Onboarding a new source usually means appending keys there.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::normalize::clean_text;

/// Loosely-typed record fields as returned by a source.
pub type RawFields = Map<String, Value>;

/// Descriptions shorter than this are treated as unusable.
pub const MIN_DESCRIPTION_CHARS: usize = 10;

/// Validated WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Accepts finite, non-zero values within the WGS84 range.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let ok = latitude.is_finite()
            && longitude.is_finite()
            && latitude != 0.0
            && longitude != 0.0
            && latitude.abs() <= 90.0
            && longitude.abs() <= 180.0;
        ok.then_some(Self {
            latitude,
            longitude,
        })
    }
}

/// One way a source may encode a point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum CoordinateCandidate {
    /// GeoJSON geometry: `{ "type": "Point", "coordinates": [lon, lat] }`.
    Geojson { key: String },
    /// `[lat, lon]` array.
    LatLonArray { key: String },
    /// `[lon, lat]` array.
    LonLatArray { key: String },
    /// `{ "lat": .., "lon": .. }` object.
    Object { key: String },
    /// Two scalar fields.
    Pair { lat: String, lon: String },
}

impl CoordinateCandidate {
    fn extract(&self, fields: &RawFields) -> Option<Coordinates> {
        match self {
            CoordinateCandidate::Geojson { key } => fields.get(key).and_then(geojson_point),
            CoordinateCandidate::LatLonArray { key } => {
                let (a, b) = number_pair(fields.get(key)?)?;
                Coordinates::new(a, b)
            }
            CoordinateCandidate::LonLatArray { key } => {
                let (a, b) = number_pair(fields.get(key)?)?;
                Coordinates::new(b, a)
            }
            CoordinateCandidate::Object { key } => fields.get(key).and_then(lat_lon_object),
            CoordinateCandidate::Pair { lat, lon } => {
                let lat = fields.get(lat)?.as_f64()?;
                let lon = fields.get(lon)?.as_f64()?;
                Coordinates::new(lat, lon)
            }
        }
    }
}

/// Candidate keys used by price inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceCandidates {
    /// Boolean or yes/no flags meaning "free entry".
    pub free_flags: Vec<String>,
    /// Free-text fields checked for `free_markers` before any amount.
    pub free_text: Vec<String>,
    /// Numeric amount fields.
    pub amount: Vec<String>,
    /// Tariff strings parsed with a number regex ("Plein tarif 12,50 €").
    pub tariff: Vec<String>,
    /// Conditions text, checked last for `free_markers`.
    pub conditions: Vec<String>,
    /// Lowercase substrings signalling free entry.
    pub free_markers: Vec<String>,
}

impl Default for PriceCandidates {
    fn default() -> Self {
        Self {
            free_flags: strings(&["gratuit", "manifestation_gratuite"]),
            free_text: strings(&["detail_des_conditions_fr"]),
            amount: strings(&["prix"]),
            tariff: strings(&["tarif_normal", "tarif"]),
            conditions: strings(&["conditions_fr", "conditions"]),
            free_markers: strings(&["gratuit", "entrée libre", "entree libre", "libre", "free"]),
        }
    }
}

/// Ordered candidate keys per logical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldCandidates {
    pub title: Vec<String>,
    /// Placeholder titles some sources emit for unnamed items (case-insensitive).
    pub placeholder_titles: Vec<String>,
    pub description: Vec<String>,
    pub start_date: Vec<String>,
    pub end_date: Vec<String>,
    pub venue: Vec<String>,
    pub address: Vec<String>,
    pub city: Vec<String>,
    pub website: Vec<String>,
    pub contact: Vec<String>,
    pub image: Vec<String>,
    /// Free-text classification fields fed to the categorizer.
    pub classification: Vec<String>,
    /// Tried in order after the record-level GeoJSON geometry.
    pub coordinates: Vec<CoordinateCandidate>,
    pub price: PriceCandidates,
}

impl Default for FieldCandidates {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl FieldCandidates {
    /// Built-in candidates covering the Occitanie / OpenDataSoft / OpenAgenda schemas.
    pub fn default_seed() -> Self {
        use CoordinateCandidate::*;
        Self {
            title: strings(&[
                "titre_fr",
                "nom_manifestation",
                "nom_de_la_manifestation",
                "title",
                "titre",
                "nom",
                "nom_site",
                "nom_musee",
                "nom_etablissement",
                "nom_equipement",
                "denomination",
                "intitule",
            ]),
            placeholder_titles: strings(&["Élément sans nom"]),
            description: strings(&[
                "description_longue_fr",
                "longdescription_fr",
                "descriptif_long",
                "description_fr",
                "descriptif_court",
                "description",
                "keywords_fr",
            ]),
            start_date: strings(&[
                "firstdate_begin",
                "debut_manifestation",
                "date_de_debut",
                "date_debut",
                "dates",
                "daterange",
            ]),
            end_date: strings(&["lastdate_end", "fin_manifestation", "date_de_fin", "date_fin"]),
            venue: strings(&["lieu_nom", "lieu_manifestation", "lieu", "location_name"]),
            address: strings(&["adresse", "location_address"]),
            city: strings(&["ville", "commune", "lib_commune", "location_city"]),
            website: strings(&["site_web", "site_internet", "lien", "reservation_site_internet"]),
            contact: strings(&["contact", "email"]),
            image: strings(&["image", "photo", "image_url", "thumbnail"]),
            classification: strings(&[
                "tags",
                "keywords_fr",
                "type_manifestation",
                "type_de_manifestation",
                "type",
                "type_d_animation",
                "categorie_de_la_manifestation",
            ]),
            coordinates: vec![
                Geojson {
                    key: "geometry".into(),
                },
                LatLonArray {
                    key: "geo_point_2d".into(),
                },
                Object {
                    key: "geo_point_2d".into(),
                },
                Object {
                    key: "geo_point".into(),
                },
                Object {
                    key: "geolocalisation".into(),
                },
                Object {
                    key: "location_coordinates".into(),
                },
                Pair {
                    lat: "googlemap_latitude".into(),
                    lon: "googlemap_longitude".into(),
                },
                Pair {
                    lat: "latitude".into(),
                    lon: "longitude".into(),
                },
            ],
            price: PriceCandidates::default(),
        }
    }
}

/// Ordered-fallback accessors over one record.
#[derive(Debug, Clone, Default)]
pub struct FieldExtractor {
    candidates: FieldCandidates,
}

impl FieldExtractor {
    pub fn new(candidates: FieldCandidates) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &FieldCandidates {
        &self.candidates
    }

    /// First non-empty title candidate, cleaned; empty string when none matches.
    pub fn extract_title(&self, fields: &RawFields) -> String {
        self.candidates
            .title
            .iter()
            .filter_map(|k| text_at(fields, k))
            .map(clean_text)
            .find(|t| !t.is_empty())
            .unwrap_or_default()
    }

    pub fn is_placeholder_title(&self, title: &str) -> bool {
        let t = title.trim();
        self.candidates
            .placeholder_titles
            .iter()
            .any(|p| p.trim().to_lowercase() == t.to_lowercase())
    }

    /// GeoJSON geometry first (`[lon, lat]`), then the configured shapes in order.
    /// First valid hit wins; out-of-range or zero values fall through.
    pub fn extract_coordinates(
        &self,
        fields: &RawFields,
        geometry: Option<&Value>,
    ) -> Option<Coordinates> {
        if let Some(c) = geometry.and_then(geojson_point) {
            return Some(c);
        }
        self.candidates
            .coordinates
            .iter()
            .find_map(|cand| cand.extract(fields))
    }

    /// Longest-form description available, else `"{source} - {title}"`.
    pub fn extract_description(&self, fields: &RawFields, source_name: &str, title: &str) -> String {
        self.candidates
            .description
            .iter()
            .filter_map(|k| text_at(fields, k))
            .map(clean_text)
            .find(|d| d.chars().count() > MIN_DESCRIPTION_CHARS)
            .unwrap_or_else(|| format!("{source_name} - {title}"))
    }

    /// Raw start date string, if any source field carries one.
    pub fn extract_start_date(&self, fields: &RawFields) -> Option<String> {
        first_text(fields, &self.candidates.start_date)
    }

    pub fn extract_end_date(&self, fields: &RawFields) -> Option<String> {
        first_text(fields, &self.candidates.end_date)
    }

    /// `Some(0.0)` for confirmed free entry, a parsed amount, or `None` when unknown.
    pub fn extract_price(&self, fields: &RawFields) -> Option<f64> {
        let pc = &self.candidates.price;

        if pc.free_flags.iter().any(|k| is_truthy(fields.get(k))) {
            return Some(0.0);
        }
        if pc
            .free_text
            .iter()
            .filter_map(|k| text_at(fields, k))
            .any(|t| contains_marker(t, &pc.free_markers))
        {
            return Some(0.0);
        }

        if let Some(amount) = pc
            .amount
            .iter()
            .filter_map(|k| fields.get(k).and_then(Value::as_f64))
            .find(|v| v.is_finite() && *v >= 0.0)
        {
            return Some(amount);
        }

        if let Some(amount) = pc
            .tariff
            .iter()
            .filter_map(|k| text_at(fields, k))
            .find_map(parse_tariff)
        {
            return Some(amount);
        }

        if pc
            .conditions
            .iter()
            .filter_map(|k| text_at(fields, k))
            .any(|t| contains_marker(t, &pc.free_markers))
        {
            return Some(0.0);
        }

        None
    }

    /// Venue, address and city joined with `", "`, skipping missing parts.
    pub fn build_location(&self, fields: &RawFields) -> String {
        [
            &self.candidates.venue,
            &self.candidates.address,
            &self.candidates.city,
        ]
        .into_iter()
        .filter_map(|keys| first_text(fields, keys))
        .collect::<Vec<_>>()
        .join(", ")
    }

    pub fn extract_website(&self, fields: &RawFields) -> Option<String> {
        first_text(fields, &self.candidates.website)
    }

    pub fn extract_contact(&self, fields: &RawFields) -> Option<String> {
        first_text(fields, &self.candidates.contact)
    }

    pub fn extract_image(&self, fields: &RawFields) -> Option<String> {
        first_text(fields, &self.candidates.image)
    }

    /// All classification fields (strings or string arrays), lowercased and space-joined.
    pub fn classification_text(&self, fields: &RawFields) -> String {
        let mut parts: Vec<String> = Vec::new();
        for key in &self.candidates.classification {
            match fields.get(key) {
                Some(Value::String(s)) => parts.push(s.clone()),
                Some(Value::Array(items)) => {
                    parts.extend(items.iter().filter_map(Value::as_str).map(str::to_string))
                }
                _ => {}
            }
        }
        parts.join(" ").to_lowercase()
    }
}

/* ----------------------------
Value helpers
---------------------------- */

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// String value at `key`, trimmed, non-empty.
fn text_at<'a>(fields: &'a RawFields, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn first_text(fields: &RawFields, keys: &[String]) -> Option<String> {
    keys.iter()
        .find_map(|k| text_at(fields, k))
        .map(str::to_string)
}

fn number_pair(v: &Value) -> Option<(f64, f64)> {
    match v.as_array()?.as_slice() {
        [a, b] => Some((a.as_f64()?, b.as_f64()?)),
        _ => None,
    }
}

fn geojson_point(v: &Value) -> Option<Coordinates> {
    let (lon, lat) = number_pair(v.get("coordinates")?)?;
    Coordinates::new(lat, lon)
}

fn lat_lon_object(v: &Value) -> Option<Coordinates> {
    let obj = v.as_object()?;
    let lat = obj.get("lat")?.as_f64()?;
    let lon = obj.get("lon")?.as_f64()?;
    Coordinates::new(lat, lon)
}

fn is_truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "oui" | "yes")
        }
        _ => false,
    }
}

fn contains_marker(text: &str, markers: &[String]) -> bool {
    let lower = text.to_lowercase();
    markers.iter().any(|m| lower.contains(m.as_str()))
}

fn parse_tariff(text: &str) -> Option<f64> {
    static RE_AMOUNT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)").expect("tariff regex"));
    let caps = RE_AMOUNT.captures(text)?;
    caps.get(1)?.as_str().replace(',', ".").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> RawFields {
        v.as_object().cloned().unwrap()
    }

    fn ex() -> FieldExtractor {
        FieldExtractor::default()
    }

    #[test]
    fn title_follows_candidate_priority() {
        let f = fields(json!({ "nom": "Musée Fabre", "titre_fr": "  Nuit des musées  " }));
        assert_eq!(ex().extract_title(&f), "Nuit des musées");
    }

    #[test]
    fn title_skips_blank_and_wrong_type() {
        let f = fields(json!({ "titre_fr": "   ", "nom_manifestation": 42, "title": "Jazz" }));
        assert_eq!(ex().extract_title(&f), "Jazz");
        assert_eq!(ex().extract_title(&fields(json!({ "foo": "bar" }))), "");
    }

    #[test]
    fn placeholder_title_is_case_insensitive() {
        assert!(ex().is_placeholder_title("élément sans nom"));
        assert!(!ex().is_placeholder_title("Élément de décor"));
    }

    #[test]
    fn geometry_is_lon_lat_and_wins() {
        let f = fields(json!({ "geo_point_2d": [43.0, 2.0] }));
        let geom = json!({ "type": "Point", "coordinates": [1.44, 43.6] });
        let c = ex().extract_coordinates(&f, Some(&geom)).unwrap();
        assert_eq!(c.latitude, 43.6);
        assert_eq!(c.longitude, 1.44);
    }

    #[test]
    fn geo_point_2d_array_is_lat_lon() {
        let f = fields(json!({ "geo_point_2d": [43.6, 1.44] }));
        let c = ex().extract_coordinates(&f, None).unwrap();
        assert_eq!((c.latitude, c.longitude), (43.6, 1.44));
    }

    #[test]
    fn geo_point_2d_object_is_supported() {
        let f = fields(json!({ "geo_point_2d": { "lon": 3.87, "lat": 43.61 } }));
        let c = ex().extract_coordinates(&f, None).unwrap();
        assert_eq!((c.latitude, c.longitude), (43.61, 3.87));
    }

    #[test]
    fn invalid_shape_falls_through_to_next_candidate() {
        let f = fields(json!({
            "geo_point_2d": [0.0, 0.0],
            "googlemap_latitude": 43.3,
            "googlemap_longitude": 5.4
        }));
        let c = ex().extract_coordinates(&f, None).unwrap();
        assert_eq!((c.latitude, c.longitude), (43.3, 5.4));
    }

    #[test]
    fn string_coordinates_are_rejected() {
        let f = fields(json!({ "latitude": "43.6", "longitude": "1.44" }));
        assert!(ex().extract_coordinates(&f, None).is_none());
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let f = fields(json!({ "latitude": 120.0, "longitude": 1.0 }));
        assert!(ex().extract_coordinates(&f, None).is_none());
    }

    #[test]
    fn coordinate_extraction_is_pure() {
        let f = fields(json!({ "geo_point": { "lat": 43.6, "lon": 1.44 } }));
        let a = ex().extract_coordinates(&f, None);
        let b = ex().extract_coordinates(&f, None);
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn description_needs_more_than_ten_chars() {
        let f = fields(json!({ "description_fr": "Trop court", "description": "<p>Une soirée de jazz &amp; blues</p>" }));
        assert_eq!(
            ex().extract_description(&f, "Agenda", "Jazz"),
            "Une soirée de jazz & blues"
        );
        let f = fields(json!({ "description": "court" }));
        assert_eq!(ex().extract_description(&f, "Agenda", "Jazz"), "Agenda - Jazz");
    }

    #[test]
    fn dates_use_first_candidate() {
        let f = fields(json!({ "date_debut": "2025-07-01", "firstdate_begin": "2025-06-30T20:00:00+02:00", "date_fin": "2025-07-03" }));
        assert_eq!(
            ex().extract_start_date(&f).as_deref(),
            Some("2025-06-30T20:00:00+02:00")
        );
        assert_eq!(ex().extract_end_date(&f).as_deref(), Some("2025-07-03"));
        assert_eq!(ex().extract_start_date(&fields(json!({}))), None);
    }

    #[test]
    fn free_flag_string_true_means_free() {
        let f = fields(json!({ "gratuit": "true" }));
        assert_eq!(ex().extract_price(&f), Some(0.0));
        let f = fields(json!({ "gratuit": true, "prix": 12.0 }));
        assert_eq!(ex().extract_price(&f), Some(0.0));
        let f = fields(json!({ "manifestation_gratuite": "Oui" }));
        assert_eq!(ex().extract_price(&f), Some(0.0));
    }

    #[test]
    fn entree_libre_text_means_free() {
        let f = fields(json!({ "detail_des_conditions_fr": "Entrée libre dans la limite des places" }));
        assert_eq!(ex().extract_price(&f), Some(0.0));
    }

    #[test]
    fn tariff_string_is_parsed() {
        let f = fields(json!({ "tarif_normal": "Plein tarif : 12,50 €" }));
        assert_eq!(ex().extract_price(&f), Some(12.5));
        let f = fields(json!({ "prix": 8 }));
        assert_eq!(ex().extract_price(&f), Some(8.0));
    }

    #[test]
    fn unknown_price_is_none_not_free() {
        let f = fields(json!({ "gratuit": "false", "tarif_normal": "sur réservation" }));
        assert_eq!(ex().extract_price(&f), None);
    }

    #[test]
    fn conditions_checked_last() {
        let f = fields(json!({ "conditions_fr": "Gratuit pour tous" }));
        assert_eq!(ex().extract_price(&f), Some(0.0));
    }

    #[test]
    fn location_joins_present_parts() {
        let f = fields(json!({
            "lieu_nom": "Halle aux Grains",
            "adresse": "  ",
            "commune": "Toulouse"
        }));
        assert_eq!(ex().build_location(&f), "Halle aux Grains, Toulouse");
        assert_eq!(ex().build_location(&fields(json!({}))), "");
    }

    #[test]
    fn classification_joins_arrays_and_strings() {
        let f = fields(json!({ "tags": ["Jazz", "Plein Air"], "type": "Concert" }));
        assert_eq!(ex().classification_text(&f), "jazz plein air concert");
    }

    #[test]
    fn candidates_deserialize_with_seed_defaults() {
        let toml_src = r#"
            title = ["label"]

            [[coordinates]]
            shape = "pair"
            lat = "y"
            lon = "x"
        "#;
        let cands: FieldCandidates = toml::from_str(toml_src).unwrap();
        assert_eq!(cands.title, vec!["label".to_string()]);
        assert_eq!(cands.city, FieldCandidates::default_seed().city);

        let ex = FieldExtractor::new(cands);
        let f = fields(json!({ "label": "Bal", "y": 43.6, "x": 1.44 }));
        assert_eq!(ex.extract_title(&f), "Bal");
        assert!(ex.extract_coordinates(&f, None).is_some());
    }
}
