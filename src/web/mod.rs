//! # Web Surface
//!
//! The webhook trigger endpoint plus thin job/batch wrappers over the
//! engine's operations. Webhook requests authenticate with a per-pipeline
//! bearer token compared in constant time and pass a fixed-window rate
//! limiter; every authentication failure produces one identical generic
//! response so the surface does not leak which pipelines exist.

pub mod handlers;
pub mod rate_limit;
pub mod state;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

pub use rate_limit::FixedWindowLimiter;
pub use state::AppState;

/// API error responses.
#[derive(Debug)]
pub enum ApiError {
    /// Generic authentication failure; deliberately carries no detail.
    Unauthorized,
    RateLimited { retry_after_secs: u64 },
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            // Identical body for every auth failure, by construction.
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response(),
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", retry_after_secs.to_string())],
                Json(json!({"error": "rate limited", "retry_after_secs": retry_after_secs})),
            )
                .into_response(),
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": msg}))).into_response()
            }
            ApiError::Conflict(msg) => {
                (StatusCode::CONFLICT, Json(json!({"error": msg}))).into_response()
            }
            ApiError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": msg})),
            )
                .into_response(),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": msg})),
            )
                .into_response(),
        }
    }
}

/// Build the HTTP router over an assembled engine.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/webhooks/:pipeline", post(handlers::webhooks::trigger))
        .route("/v1/jobs", get(handlers::jobs::list))
        .route("/v1/jobs/:job_id", get(handlers::jobs::get_job))
        .route("/v1/jobs/:job_id/retry", post(handlers::jobs::retry))
        .route("/v1/jobs/:job_id/fail", post(handlers::jobs::fail))
        .route("/v1/jobs/:job_id/resume", post(handlers::jobs::resume))
        .route("/v1/jobs/:job_id/undo", post(handlers::jobs::undo))
        .route("/v1/batches/:job_id", get(handlers::jobs::batch_progress))
        .route(
            "/v1/batches/:job_id/cancel",
            post(handlers::jobs::cancel_batch),
        )
        .with_state(state)
}
