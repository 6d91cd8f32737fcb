//! Cross-source duplicate collapsing.
//!
//! Two open-data providers often list the same physical event (or museum).
//! Events from *different* sources collapse when they share a start day, sit
//! within `DEDUP_RADIUS_M` of each other and have near-identical titles.
//! The first one seen (source declaration order) is kept.

use std::collections::HashMap;

use crate::event::Event;

/// Max distance between two listings of the same place.
pub const DEDUP_RADIUS_M: f64 = 100.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Returns the kept events and the number removed.
pub fn collapse_duplicates(events: Vec<Event>, min_title_similarity: f64) -> (Vec<Event>, usize) {
    let mut kept: Vec<Event> = Vec::with_capacity(events.len());
    let mut kept_titles: Vec<String> = Vec::with_capacity(events.len());
    let mut by_day: HashMap<String, Vec<usize>> = HashMap::new();
    let mut removed = 0usize;

    for ev in events {
        let day = start_day(&ev.start_date);
        let title = fold_title(&ev.title);

        let bucket = by_day.entry(day).or_default();
        let is_dup = bucket.iter().any(|&i| {
            let other = &kept[i];
            other.organizer != ev.organizer
                && distance_m(other, &ev) <= DEDUP_RADIUS_M
                && strsim::jaro_winkler(&kept_titles[i], &title) >= min_title_similarity
        });

        if is_dup {
            removed += 1;
            continue;
        }
        bucket.push(kept.len());
        kept_titles.push(title);
        kept.push(ev);
    }

    (kept, removed)
}

/// `YYYY-MM-DD` prefix of an ISO-8601 date or datetime.
fn start_day(date: &str) -> String {
    date.trim().chars().take(10).collect()
}

/// Lowercase alphanumerics separated by single spaces.
fn fold_title(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Equirectangular approximation; accurate enough at a 100 m scale.
fn distance_m(a: &Event, b: &Event) -> f64 {
    let mean_lat = ((a.latitude + b.latitude) / 2.0).to_radians();
    let dlat = (a.latitude - b.latitude).to_radians();
    let dlon = (a.longitude - b.longitude).to_radians() * mean_lat.cos();
    EARTH_RADIUS_M * (dlat * dlat + dlon * dlon).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::sample_event;

    fn ev(title: &str, organizer: &str, lat: f64, lon: f64) -> Event {
        let mut e = sample_event(title, "Montpellier", None);
        e.organizer = organizer.into();
        e.latitude = lat;
        e.longitude = lon;
        e
    }

    #[test]
    fn same_place_same_title_other_source_collapses() {
        let events = vec![
            ev("Musée Fabre", "Musées de France", 43.6117, 3.8807),
            ev("Musée  fabre", "Agenda Musées", 43.6118, 3.8808),
        ];
        let (kept, removed) = collapse_duplicates(events, 0.92);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].organizer, "Musées de France");
    }

    #[test]
    fn same_source_is_never_collapsed() {
        let events = vec![
            ev("Visite guidée", "Agenda Musées", 43.6117, 3.8807),
            ev("Visite guidée", "Agenda Musées", 43.6117, 3.8807),
        ];
        let (kept, removed) = collapse_duplicates(events, 0.92);
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn distant_or_different_events_are_kept() {
        let events = vec![
            ev("Fête de la musique", "A", 43.6117, 3.8807),
            ev("Fête de la musique", "B", 43.6047, 1.4442),
            ev("Marché de Noël", "C", 43.6117, 3.8807),
        ];
        let (kept, removed) = collapse_duplicates(events, 0.92);
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn different_days_are_kept() {
        let a = ev("Concert", "A", 43.6, 1.44);
        let mut b = ev("Concert", "B", 43.6, 1.44);
        b.start_date = "2025-06-22T20:00:00+02:00".into();
        let (kept, _) = collapse_duplicates(vec![a, b], 0.92);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn fold_title_normalizes_punctuation() {
        assert_eq!(fold_title("  Nuit  des Musées !"), "nuit des musées");
    }
}
