mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use tower::ServiceExt;

use waziper_gateway::app::{AppState, HttpOptions, build_router};
use waziper_gateway::config::CorsOrigins;

use common::{gateway, wa_mock::FakeConnector};

fn state() -> anyhow::Result<AppState> {
    Ok(AppState::new(gateway(&FakeConnector::new(), "T1=I1")?, None))
}

#[tokio::test]
async fn responses_include_request_id_and_metrics_track_requests() -> anyhow::Result<()> {
    let app = build_router(state()?);

    let health = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/healthz")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(health.status(), StatusCode::OK);
    assert!(health.headers().get("x-request-id").is_some());

    let echoed = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/")
                .header("x-request-id", "req-42")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(
        echoed
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("req-42")
    );

    let metrics = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(metrics.status(), StatusCode::OK);
    let body = to_bytes(metrics.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;

    assert!(json["requests_total"].as_u64().unwrap_or(0) >= 2);
    assert_eq!(json["instances_total"].as_u64().unwrap_or(1), 0);
    Ok(())
}

#[tokio::test]
async fn readiness_follows_state_flag() -> anyhow::Result<()> {
    let state = state()?;
    let app = build_router(state.clone());

    let before = app
        .clone()
        .oneshot(Request::builder().uri("/readyz").body(Body::empty())?)
        .await?;
    assert_eq!(before.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.set_ready(true);
    let after = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty())?)
        .await?;
    assert_eq!(after.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn request_body_limit_rejects_oversized_payload() -> anyhow::Result<()> {
    let app = build_router(state()?.with_options(HttpOptions {
        body_limit_kb: 16,
        cors_origins: CorsOrigins::Any,
    }));

    let oversized_text = "x".repeat(64 * 1024);
    let body = format!(r#"{{"to":"5511988887777","text":"{oversized_text}"}}"#);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/send_message?access_token=T1&instance_id=I1")
                .header("content-type", "application/json")
                .body(Body::from(body))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(json["error"], "invalid_body");
    Ok(())
}
