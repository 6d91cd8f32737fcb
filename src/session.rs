//! # Session controller
//!
//! Long-lived owner of the aggregation lifecycle. Constructed once at startup
//! and shared behind an `Arc`:
//! - single-flight: a load requested while one is running is skipped, not queued;
//! - one-shot initial load (`load_initial`), manual reloads via `refresh_events`;
//! - persisted debug toggle plus the `test_api` sample probe.
//!
//! State machine: `idle → loading → {ready, error}`. An empty run lands in
//! `error` with an advisory message, and the (empty) run result still
//! replaces the event list.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::event::{mappable_events, Event, SourceReport};
use crate::ingest::config::AppConfig;
use crate::ingest::{EventAggregator, ProbeError};
use crate::settings::{DebugSwitch, SettingsStore};
use crate::stats::{get_event_stats, AggregationStats};

/// Advisory shown when a run yields no events at all.
pub const EMPTY_RESULT_ADVISORY: &str = "Aucun événement trouvé. Vérifiez les logs de debug.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

/// What a load request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { events: usize },
    /// Run finished with zero events; status is `error`.
    Empty,
    /// Another load was in flight; nothing was fetched.
    AlreadyLoading,
    /// `load_initial` was already used.
    AlreadyInitialized,
}

/// Consumer-facing snapshot, minus the event list itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub loading: bool,
    pub status: LoadStatus,
    pub error: Option<String>,
    pub last_update: Option<String>,
    pub stats: Option<AggregationStats>,
    pub total_events: usize,
    pub mappable_events: usize,
    pub debug: bool,
    pub sources: Vec<SourceReport>,
}

#[derive(Debug, Default)]
struct SessionState {
    status: LoadStatus,
    events: Arc<Vec<Event>>,
    error: Option<String>,
    last_update: Option<String>,
    stats: Option<AggregationStats>,
    sources: Vec<SourceReport>,
}

/// Clears the in-flight bit on drop, so a panicking run cannot wedge the session.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct EventSession {
    aggregator: EventAggregator,
    debug: DebugSwitch,
    state: RwLock<SessionState>,
    in_flight: AtomicBool,
    initial_started: AtomicBool,
}

impl EventSession {
    /// The aggregator is rewired to read the switch's debug flag.
    pub fn new(aggregator: EventAggregator, debug: DebugSwitch) -> Self {
        Self {
            aggregator: aggregator.with_debug(debug.flag()),
            debug,
            state: RwLock::new(SessionState::default()),
            in_flight: AtomicBool::new(false),
            initial_started: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &AppConfig, store: SettingsStore) -> Result<Self> {
        let debug = DebugSwitch::load(store);
        let aggregator = EventAggregator::from_config(cfg, debug.flag())?;
        Ok(Self::new(aggregator, debug))
    }

    pub fn aggregator(&self) -> &EventAggregator {
        &self.aggregator
    }

    /// Automatic first load; only the first call in this session's lifetime runs.
    /// A call that finds another load running does not count as the initial one.
    pub async fn load_initial(&self) -> LoadOutcome {
        if self.initial_started.load(Ordering::Acquire) {
            return LoadOutcome::AlreadyInitialized;
        }
        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::info!(target: "session", "load already in progress, initial load deferred");
            return LoadOutcome::AlreadyLoading;
        };
        if self.initial_started.swap(true, Ordering::AcqRel) {
            return LoadOutcome::AlreadyInitialized;
        }
        self.run_guarded(guard).await
    }

    /// Manual reload. Skipped if a load is already running.
    pub async fn refresh_events(&self) -> LoadOutcome {
        self.load_events().await
    }

    pub async fn load_events(&self) -> LoadOutcome {
        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::info!(target: "session", "load already in progress, ignored");
            return LoadOutcome::AlreadyLoading;
        };
        self.run_guarded(guard).await
    }

    async fn run_guarded(&self, _guard: InFlightGuard<'_>) -> LoadOutcome {

        {
            let mut st = self.write();
            st.status = LoadStatus::Loading;
            st.error = None;
        }

        let run = self.aggregator.run().await;
        let stats = get_event_stats(&run.events);
        let count = run.events.len();

        let mut st = self.write();
        st.events = Arc::new(run.events);
        st.stats = Some(stats);
        st.sources = run.sources;
        st.last_update = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

        if count == 0 {
            tracing::warn!(target: "session", "aggregation returned no events");
            st.status = LoadStatus::Error;
            st.error = Some(EMPTY_RESULT_ADVISORY.to_string());
            LoadOutcome::Empty
        } else {
            tracing::info!(target: "session", events = count, "events loaded");
            st.status = LoadStatus::Ready;
            LoadOutcome::Loaded { events: count }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn status(&self) -> LoadStatus {
        self.read().status
    }

    /// Full event list of the last completed run.
    pub fn events(&self) -> Arc<Vec<Event>> {
        Arc::clone(&self.read().events)
    }

    /// Recomputed from the full list on every call.
    pub fn mappable_events(&self) -> Vec<Event> {
        mappable_events(&self.events())
    }

    pub fn stats(&self) -> Option<AggregationStats> {
        self.read().stats.clone()
    }

    pub fn snapshot(&self) -> SessionView {
        let st = self.read();
        SessionView {
            loading: self.is_loading(),
            status: st.status,
            error: st.error.clone(),
            last_update: st.last_update.clone(),
            stats: st.stats.clone(),
            total_events: st.events.len(),
            mappable_events: st.events.iter().filter(|e| e.is_mappable()).count(),
            debug: self.debug.is_enabled(),
            sources: st.sources.clone(),
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.is_enabled()
    }

    pub fn enable_debug(&self) -> Result<()> {
        tracing::info!(target: "session", "debug mode enabled");
        self.debug.enable()
    }

    pub fn disable_debug(&self) -> Result<()> {
        tracing::info!(target: "session", "debug mode disabled");
        self.debug.disable()
    }

    /// Dump 5 raw records of one source.
    pub async fn test_api(&self, source_key: &str) -> Result<Value, ProbeError> {
        self.aggregator.test_api(source_key).await
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
