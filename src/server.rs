//! HTTP front end. Each request runs the same collection as `fetch` and
//! returns the JSON report.

use crate::collect::collect_report;
use crate::config::{RunRequest, ServiceConfig, DEFAULT_MAX_RETRIES};
use crate::error::{ApiError, ConfigError, RunError};
use crate::model::Report;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use indicatif::ProgressBar;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const TOKEN_HEADER: &str = "x-gitlab-token";

struct AppState {
    gitlab_timeout: Duration,
}

// ── Error Handling ──

pub struct AppError(RunError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RunError::Config(_) => StatusCode::BAD_REQUEST,
            RunError::Authentication(ApiError::Unauthorized { status: 403 }) => StatusCode::FORBIDDEN,
            RunError::Authentication(_) => StatusCode::UNAUTHORIZED,
            RunError::Enumeration(_) => StatusCode::BAD_GATEWAY,
            RunError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            RunError::Serde(_) | RunError::Io(_) | RunError::Fmt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.0.is_user_error() {
            debug!(%status, error = %self.0, "rejected request");
        } else {
            warn!(%status, kind = self.0.kind(), error = %self.0, "collection failed");
        }
        let body = serde_json::json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl<E: Into<RunError>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

// ── Requests ──

fn default_days() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct CommitsBody {
    pub gitlab_url: String,
    pub admin_token: String,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    pub gitlab_url: String,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub threads: usize,
}

// ── Entrypoint ──

pub async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let app = router(&config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gitlab-commits service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Builds the router. Exposed for in-process tests.
pub fn router(config: &ServiceConfig) -> Router {
    let state = Arc::new(AppState {
        gitlab_timeout: config.gitlab_timeout,
    });
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/commits", get(get_commits).post(post_commits))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

// ── Handlers ──

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "gitlab-commits",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /health": "liveness check",
            "POST /api/commits": "collect commits; JSON body {gitlab_url, admin_token, days, debug, threads}",
            "GET /api/commits": "collect commits; query gitlab_url, days, debug, threads; token in X-GitLab-Token",
        }
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn post_commits(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CommitsBody>, JsonRejection>,
) -> Result<Json<Report>, AppError> {
    let Json(body) = body.map_err(|e| ConfigError::MalformedRequest(e.body_text()))?;
    let request = state.run_request(body.gitlab_url, body.admin_token, body.days, body.threads);
    run(request, body.debug).await
}

async fn get_commits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<CommitsQuery>, QueryRejection>,
) -> Result<Json<Report>, AppError> {
    let Query(query) = query.map_err(|e| ConfigError::MalformedRequest(e.body_text()))?;
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ConfigError::MissingToken)?;
    let request = state.run_request(query.gitlab_url, token.to_string(), query.days, query.threads);
    run(request, query.debug).await
}

impl AppState {
    fn run_request(&self, gitlab_url: String, admin_token: String, days: u32, threads: usize) -> RunRequest {
        RunRequest {
            gitlab_url,
            admin_token,
            days,
            threads,
            timeout: self.gitlab_timeout,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

async fn run(request: RunRequest, debug_requested: bool) -> Result<Json<Report>, AppError> {
    request.validate()?;
    if debug_requested {
        info!(
            gitlab_url = %request.gitlab_url,
            days = request.days,
            threads = request.threads,
            "debug run requested"
        );
    }
    let report = collect_report(&request, ProgressBar::hidden()).await?;
    debug!(
        commits = report.metadata.commits_count,
        status = ?report.metadata.status,
        "request served"
    );
    Ok(Json(report))
}
