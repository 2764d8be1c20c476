//! # Webhook Trigger Endpoint
//!
//! `POST /v1/webhooks/{pipeline}` creates a job for the named pipeline and
//! enqueues its first step. Requests authenticate with the pipeline's
//! bearer token, compared in constant time. Unknown pipeline, missing
//! header, and wrong token all produce the same generic response.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::web::{ApiError, AppState};

/// Byte-wise comparison that does not short-circuit on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}

pub async fn trigger(
    State(state): State<AppState>,
    Path(pipeline): Path<String>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Err(retry_after_secs) = state.limiter.check(&pipeline) {
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    // One generic failure for every auth problem: unknown pipeline, missing
    // header, malformed header, wrong token.
    let expected = state
        .engine
        .config()
        .webhook
        .tokens
        .get(&pipeline)
        .ok_or(ApiError::Unauthorized)?;
    let presented = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        warn!(pipeline = %pipeline, "Webhook token mismatch");
        return Err(ApiError::Unauthorized);
    }

    let delivery_id = Uuid::new_v4();
    let seed = body.map(|Json(value)| value).unwrap_or_else(|| json!({}));

    let job = state
        .engine
        .trigger_pipeline(&pipeline, seed)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to schedule job: {e}")))?;

    info!(
        pipeline = %pipeline,
        job_id = job.job_id,
        delivery_id = %delivery_id,
        "🪝 Webhook accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job.job_id,
            "status": job.status,
            "delivery_id": delivery_id,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
