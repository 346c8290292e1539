use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::{Orchestrator, WakeError};
use crate::native::transmission::{Torrent, TransmissionClient, STATUS_FIELDS};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    transmission: Arc<TransmissionClient>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, transmission: Arc<TransmissionClient>) -> Self {
        Self {
            orchestrator,
            transmission,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/wake/{name}", get(wake))
        .route("/transmission/log", get(transmission_log))
        .route("/watchers", get(watchers))
        .route("/watchers/{name}", delete(retire_watcher))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for WakeError {
    fn into_response(self) -> Response {
        match self {
            WakeError::NotFound { name } => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": "container not found",
                    "container": name,
                })),
            )
                .into_response(),
            WakeError::Runtime { name, message } => {
                tracing::error!(container = %name, error = %message, "Wake failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": message,
                        "container": name,
                    })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WakeParams {
    redirect: Option<String>,
}

async fn wake(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<WakeParams>,
) -> Result<Response, WakeError> {
    // Reject a bad redirect before touching the container.
    let location = match params.redirect.filter(|r| !r.is_empty()) {
        Some(target) => match HeaderValue::try_from(target) {
            Ok(value) => Some(value),
            Err(_) => {
                return Ok((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": "invalid redirect target"})),
                )
                    .into_response())
            }
        },
        None => None,
    };

    let outcome = state.orchestrator.wake(&name).await?;

    if let Some(location) = location {
        return Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response());
    }
    Ok(Json(serde_json::json!({
        "status": "started",
        "container": name,
        "started": outcome.started,
    }))
    .into_response())
}

#[derive(Debug, Serialize)]
struct TorrentSummary {
    id: Option<i64>,
    name: Option<String>,
    status: i64,
    percent_done: Option<f64>,
    rate_download: Option<i64>,
    rate_upload: Option<i64>,
}

impl From<Torrent> for TorrentSummary {
    fn from(t: Torrent) -> Self {
        Self {
            id: t.id,
            name: t.name,
            status: t.status,
            percent_done: t.percent_done,
            rate_download: t.rate_download,
            rate_upload: t.rate_upload,
        }
    }
}

async fn transmission_log(State(state): State<AppState>) -> Response {
    match state.transmission.torrent_get(STATUS_FIELDS).await {
        Ok(torrents) => {
            tracing::info!(count = torrents.len(), "Transmission status");
            for t in &torrents {
                tracing::info!(
                    id = ?t.id,
                    name = t.name.as_deref().unwrap_or(""),
                    status = t.status,
                    progress = %format!("{:.1}%", t.percent_done.unwrap_or(0.0) * 100.0),
                    dl_kbs = %format!("{:.1}", t.rate_download.unwrap_or(0) as f64 / 1024.0),
                    ul_kbs = %format!("{:.1}", t.rate_upload.unwrap_or(0) as f64 / 1024.0),
                    "Torrent"
                );
            }
            let summaries: Vec<TorrentSummary> = torrents.into_iter().map(Into::into).collect();
            Json(serde_json::json!({
                "status": "printed to log",
                "count": summaries.len(),
                "torrents": summaries,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Transmission status query failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn watchers(State(state): State<AppState>) -> Response {
    let watched = state.orchestrator.watched();
    Json(serde_json::json!({
        "count": watched.len(),
        "watchers": watched,
    }))
    .into_response()
}

async fn retire_watcher(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if state.orchestrator.retire(&name) {
        tracing::info!(container = %name, "Watcher retirement requested");
        Json(serde_json::json!({"status": "retiring", "container": name})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no watcher", "container": name})),
        )
            .into_response()
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
