//! Aggregate counts over a finished event list. Pure, no I/O.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::{Category, Event};

/// Bucket used when an event's location has no city segment.
pub const UNKNOWN_CITY: &str = "Autre";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationStats {
    pub total: usize,
    pub by_category: BTreeMap<Category, usize>,
    #[serde(rename = "byCities")]
    pub by_city: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    /// Events with a confirmed price of 0.
    pub free: usize,
    /// Events with a known positive price. Unknown prices count in neither bucket.
    pub paid: usize,
}

/// One pass over `events`, tallying category, city, source and free/paid.
pub fn get_event_stats(events: &[Event]) -> AggregationStats {
    let mut stats = AggregationStats {
        total: events.len(),
        ..Default::default()
    };

    for ev in events {
        *stats.by_category.entry(ev.category).or_default() += 1;

        let city = ev.city().unwrap_or(UNKNOWN_CITY).to_string();
        *stats.by_city.entry(city).or_default() += 1;

        *stats.by_source.entry(ev.organizer.clone()).or_default() += 1;

        match ev.price {
            Some(p) if p == 0.0 => stats.free += 1,
            Some(p) if p > 0.0 => stats.paid += 1,
            _ => {}
        }
    }

    stats
}
