//! # Event model
//!
//! Canonical event shape produced by the normalizer. Every source record that
//! survives normalization becomes one `Event`; events are immutable once built
//! and only live for the duration of a session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed category enumeration used by the map UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Festival,
    Concert,
    Exposition,
    Conference,
    Atelier,
    Autre,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Festival,
        Category::Concert,
        Category::Exposition,
        Category::Conference,
        Category::Atelier,
        Category::Autre,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Festival => "festival",
            Category::Concert => "concert",
            Category::Exposition => "exposition",
            Category::Conference => "conference",
            Category::Atelier => "atelier",
            Category::Autre => "autre",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A normalized event. Coordinates are always inside the region bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub start_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: Category,
    /// Human-readable source name.
    pub organizer: String,
    /// `Some(0.0)` is confirmed free entry, `None` is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Event {
    /// True when the event can be placed on the map.
    pub fn is_mappable(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude != 0.0
            && self.longitude != 0.0
    }

    /// City segment of the location (last comma-delimited part).
    pub fn city(&self) -> Option<&str> {
        self.location
            .rsplit(',')
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Filter the events that can be shown on the map.
pub fn mappable_events(events: &[Event]) -> Vec<Event> {
    events.iter().filter(|e| e.is_mappable()).cloned().collect()
}

/// Outcome of one source within an aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub key: String,
    pub name: String,
    pub events: usize,
    pub pages: usize,
    /// Error that stopped pagination early, if any. Partial events are still counted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_event(title: &str, location: &str, price: Option<f64>) -> Event {
        Event {
            id: format!("tst-{}", title.to_lowercase()),
            title: title.to_string(),
            description: format!("Test - {title}"),
            start_date: "2025-06-21".to_string(),
            end_date: None,
            location: location.to_string(),
            latitude: 43.6,
            longitude: 1.44,
            category: Category::Concert,
            organizer: "Test".to_string(),
            price,
            website_url: None,
            contact_email: None,
            image_url: None,
            created_at: "2025-06-01T00:00:00+00:00".to_string(),
            updated_at: "2025-06-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn category_serializes_lowercase() {
        let s = serde_json::to_string(&Category::Conference).unwrap();
        assert_eq!(s, "\"conference\"");
        let c: Category = serde_json::from_str("\"atelier\"").unwrap();
        assert_eq!(c, Category::Atelier);
    }

    #[test]
    fn city_is_last_location_segment() {
        let ev = sample_event("Jazz", "Halle aux Grains, Place Dupuy, Toulouse", None);
        assert_eq!(ev.city(), Some("Toulouse"));

        let ev = sample_event("Jazz", "Toulouse , ", None);
        assert_eq!(ev.city(), None);
    }

    #[test]
    fn zero_coordinates_are_not_mappable() {
        let mut ev = sample_event("Jazz", "Toulouse", None);
        assert!(ev.is_mappable());
        ev.longitude = 0.0;
        assert!(!ev.is_mappable());
        ev.longitude = f64::NAN;
        assert!(!ev.is_mappable());
    }

    #[test]
    fn unknown_price_is_omitted_from_json() {
        let ev = sample_event("Jazz", "Toulouse", None);
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v.get("price").is_none());
        assert_eq!(v["category"], "concert");
    }
}
