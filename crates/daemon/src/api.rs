//! HTTP API for the rtmp-cast daemon.
//!
//! Thin routing layer over the lifecycle manager, job store, stats, and
//! sweeper; also serves the segmented output directories and an embeddable
//! player page. CORS is permissive so the embed page and dashboard can be
//! hosted anywhere.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::lifecycle::{CreateJobRequest, LifecycleError, LifecycleManager};
use crate::stats::{compute_stats, ServerStats};
use crate::store::{Job, JobStore};
use crate::sweeper::{RetentionSweeper, SweepSummary};

const DEFAULT_RECENT_LIMIT: usize = 10;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<JobStore>,
    pub lifecycle: Arc<LifecycleManager>,
    pub sweeper: Arc<RetentionSweeper>,
}

/// Lifecycle error wrapper carrying the HTTP mapping.
///
/// Every write operation either returns the updated resource or a
/// structured `{error, message}` body with a machine-readable kind.
pub struct ApiError(LifecycleError);

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            LifecycleError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            LifecycleError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            LifecycleError::InvalidState { .. } => (StatusCode::BAD_REQUEST, "invalid_state"),
            LifecycleError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = Json(json!({
            "error": kind,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

async fn list_jobs(State(state): State<ApiState>) -> Json<Vec<Job>> {
    Json(state.store.all())
}

async fn list_active_jobs(State(state): State<ApiState>) -> Json<Vec<Job>> {
    Json(state.store.active())
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn list_recent_jobs(
    State(state): State<ApiState>,
    Query(query): Query<RecentQuery>,
) -> Json<Vec<Job>> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Json(state.store.recent(limit))
}

async fn get_stats(State(state): State<ApiState>) -> Json<ServerStats> {
    Json(compute_stats(&state.store))
}

async fn create_job(
    State(state): State<ApiState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<Json<Job>, ApiError> {
    let job = state.lifecycle.create(req).await?;
    Ok(Json(job))
}

async fn get_job(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .store
        .get(&id)
        .ok_or(LifecycleError::NotFound(id))?;
    Ok(Json(job))
}

async fn stop_job(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state.lifecycle.stop(&id).await?;
    Ok(Json(job))
}

async fn delete_job(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.lifecycle.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn force_cleanup(State(state): State<ApiState>) -> Json<SweepSummary> {
    Json(state.sweeper.sweep().await)
}

/// Minimal self-contained player page for cross-site embedding. Prefers
/// HLS via hls.js, falling back to native HLS support (Safari).
async fn embed_page(
    State(state): State<ApiState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Html<String>, ApiError> {
    let job = state
        .store
        .get(&id)
        .ok_or(LifecycleError::NotFound(id))?;

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{name}</title>
  <script src="https://cdn.jsdelivr.net/npm/hls.js@latest"></script>
  <script src="https://cdn.dashjs.org/latest/dash.all.min.js"></script>
  <style>
    body {{ margin: 0; padding: 0; background: #000; }}
    video {{ width: 100%; height: 100vh; object-fit: contain; }}
  </style>
</head>
<body>
  <video id="video" controls autoplay muted></video>
  <script>
    const video = document.getElementById('video');
    const hlsUrl = '/hls/{id}.m3u8';

    if (Hls.isSupported()) {{
      const hls = new Hls();
      hls.loadSource(hlsUrl);
      hls.attachMedia(video);
    }} else if (video.canPlayType('application/vnd.apple.mpegurl')) {{
      video.src = hlsUrl;
    }}
  </script>
</body>
</html>
"#,
        name = job.name,
        id = job.id,
    );

    Ok(Html(html))
}

/// Creates the axum Router for the full API surface.
pub fn create_router(state: ApiState, output_dir: &Path) -> Router {
    Router::new()
        .route("/api/streams", get(list_jobs).post(create_job))
        .route("/api/streams/active", get(list_active_jobs))
        .route("/api/streams/recent", get(list_recent_jobs))
        .route("/api/streams/:id", get(get_job).delete(delete_job))
        .route("/api/streams/:id/stop", post(stop_job))
        .route("/api/stats", get(get_stats))
        .route("/api/cleanup", post(force_cleanup))
        .route("/embed/:id", get(embed_page))
        .nest_service("/hls", ServeDir::new(output_dir.join("hls")))
        .nest_service("/dash", ServeDir::new(output_dir.join("dash")))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
