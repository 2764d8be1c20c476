//! Webhook trigger surface: bearer auth with indistinguishable failure
//! responses, fixed-window rate limiting, and job creation on success.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::TestHarness;
use flowline_core::config::EngineConfig;
use flowline_core::constants::hooks;
use flowline_core::web::{build_router, AppState};

const PIPELINE: &str = "\
news_ingest:
  - step_id: fetch
    step_type: fetch
";

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config
        .webhook
        .tokens
        .insert("news_ingest".to_string(), "tok-123".to_string());
    config.webhook.rate_max = 2;
    config.webhook.rate_window_secs = 60;
    config
}

fn request(path: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(path);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder
        .header("content-type", "application/json")
        .body(Body::from("{\"feed\":\"politics\"}"))
        .unwrap()
}

#[tokio::test]
async fn test_valid_token_creates_job_and_enqueues_first_step() {
    let h = TestHarness::new(PIPELINE, config());
    let app = build_router(AppState::new(h.engine.clone()));

    let response = app
        .oneshot(request("/v1/webhooks/news_ingest", Some("Bearer tok-123")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let job_id = payload["job_id"].as_i64().unwrap();

    let job = h.engine.ledger().get(job_id).await.unwrap();
    assert_eq!(job.engine_context["feed"], serde_json::json!("politics"));
    assert_eq!(h.queue.entries_for(hooks::RUN_STEP).len(), 1);
}

#[tokio::test]
async fn test_auth_failures_are_indistinguishable() {
    let h = TestHarness::new(PIPELINE, config());
    let app = build_router(AppState::new(h.engine.clone()));

    // Wrong token on an existing pipeline.
    let wrong_token = app
        .clone()
        .oneshot(request("/v1/webhooks/news_ingest", Some("Bearer nope")))
        .await
        .unwrap();
    // Valid-looking token on a pipeline that does not exist.
    let unknown_pipeline = app
        .clone()
        .oneshot(request("/v1/webhooks/ghost_pipeline", Some("Bearer tok-123")))
        .await
        .unwrap();
    // Missing header entirely.
    let missing_header = app
        .oneshot(request("/v1/webhooks/news_ingest", None))
        .await
        .unwrap();

    assert_eq!(wrong_token.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_pipeline.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(missing_header.status(), StatusCode::UNAUTHORIZED);

    // Byte-identical bodies: the surface leaks nothing about which
    // pipelines exist.
    let a = to_bytes(wrong_token.into_body(), usize::MAX).await.unwrap();
    let b = to_bytes(unknown_pipeline.into_body(), usize::MAX).await.unwrap();
    let c = to_bytes(missing_header.into_body(), usize::MAX).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(b, c);

    // No job was created by any of them.
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_rate_limiter_rejects_excess_with_retry_after() {
    let h = TestHarness::new(PIPELINE, config());
    let app = build_router(AppState::new(h.engine.clone()));

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("/v1/webhooks/news_ingest", Some("Bearer tok-123")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let limited = app
        .oneshot(request("/v1/webhooks/news_ingest", Some("Bearer tok-123")))
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = limited
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
}
