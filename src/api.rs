use std::sync::Arc;

use serde_json::{json, Value};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::event::{Event, SourceReport};
use crate::ingest::ProbeError;
use crate::session::{EventSession, LoadOutcome, SessionView};
use crate::stats::AggregationStats;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<EventSession>,
}

impl AppState {
    pub fn new(session: Arc<EventSession>) -> Self {
        Self { session }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/session", get(session_view))
        .route("/events", get(all_events))
        .route("/events/map", get(map_events))
        .route("/events/stats", get(event_stats))
        .route("/events/refresh", post(refresh))
        .route("/sources", get(sources))
        .route("/debug/enable", post(debug_enable))
        .route("/debug/disable", post(debug_disable))
        .route("/debug/sources/{key}/sample", get(debug_sample))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Router over an already-built session.
pub fn router(session: Arc<EventSession>) -> Router {
    create_router(AppState::new(session))
}

async fn session_view(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session.snapshot())
}

async fn all_events(State(state): State<AppState>) -> Json<Vec<Event>> {
    Json(state.session.events().as_ref().clone())
}

async fn map_events(State(state): State<AppState>) -> Json<Vec<Event>> {
    Json(state.session.mappable_events())
}

async fn event_stats(State(state): State<AppState>) -> Json<Option<AggregationStats>> {
    Json(state.session.stats())
}

async fn sources(State(state): State<AppState>) -> Json<Vec<SourceReport>> {
    Json(state.session.snapshot().sources)
}

#[derive(serde::Deserialize)]
struct RefreshQuery {
    #[serde(default)]
    wait: bool,
}

/// `?wait=true` blocks until the run settles; otherwise the run is spawned
/// and 202 is returned right away.
async fn refresh(State(state): State<AppState>, Query(q): Query<RefreshQuery>) -> Response {
    if !q.wait {
        if state.session.is_loading() {
            return (StatusCode::CONFLICT, Json(json!({ "outcome": "already_loading" })))
                .into_response();
        }
        let session = state.session.clone();
        tokio::spawn(async move {
            session.refresh_events().await;
        });
        return (StatusCode::ACCEPTED, Json(json!({ "outcome": "started" }))).into_response();
    }

    let outcome = state.session.refresh_events().await;
    let (code, body) = match outcome {
        LoadOutcome::Loaded { events } => (StatusCode::OK, json!({ "outcome": "loaded", "events": events })),
        LoadOutcome::Empty => (StatusCode::OK, json!({ "outcome": "empty" })),
        LoadOutcome::AlreadyLoading | LoadOutcome::AlreadyInitialized => {
            (StatusCode::CONFLICT, json!({ "outcome": "already_loading" }))
        }
    };
    (code, Json(body)).into_response()
}

async fn debug_enable(State(state): State<AppState>) -> Response {
    toggle_response(state.session.enable_debug(), true)
}

async fn debug_disable(State(state): State<AppState>) -> Response {
    toggle_response(state.session.disable_debug(), false)
}

fn toggle_response(res: anyhow::Result<()>, debug: bool) -> Response {
    match res {
        Ok(()) => Json(json!({ "debug": debug })).into_response(),
        Err(e) => {
            tracing::warn!(target: "api", error = %format!("{e:#}"), "debug flag not persisted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "debug": debug, "persisted": false })),
            )
                .into_response()
        }
    }
}

async fn debug_sample(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.session.test_api(&key).await {
        Ok(body) => Json::<Value>(body).into_response(),
        Err(e @ ProbeError::UnknownSource(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(ProbeError::Request(e)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": format!("{e:#}") })),
        )
            .into_response(),
    }
}
