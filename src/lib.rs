// src/lib.rs
// Public library surface for the service binary, the probe CLI and integration tests.

pub mod api;
pub mod event;
pub mod extract;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod session;
pub mod settings;
pub mod stats;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::event::{Category, Event, SourceReport};
pub use crate::ingest::{AggregationRun, EventAggregator, ProbeError};
pub use crate::session::{EventSession, LoadOutcome, LoadStatus, SessionView};
pub use crate::stats::{get_event_stats, AggregationStats};
