mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

use waziper_gateway::app::{AppState, build_router};

use common::{dev_config, gateway, wa_mock::FakeConnector};

fn router(connector: &FakeConnector, dev_routes: bool) -> anyhow::Result<Router> {
    let gateway = gateway(connector, "T1=I1")?;
    let grant = if dev_routes {
        dev_config()?.dev_bypass
    } else {
        None
    };
    Ok(build_router(AppState::new(gateway, grant)))
}

async fn call(app: &Router, method: &str, uri: &str, body: Body) -> anyhow::Result<(StatusCode, Value)> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)?,
        )
        .await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, json))
}

#[tokio::test]
async fn root_returns_welcome_envelope() -> anyhow::Result<()> {
    let app = router(&FakeConnector::new(), false)?;

    let (status, json) = call(&app, "GET", "/", Body::empty()).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["message"], "Welcome to WAZIPER");
    Ok(())
}

#[tokio::test]
async fn get_qrcode_returns_payload() -> anyhow::Result<()> {
    let app = router(&FakeConnector::new(), false)?;

    let (status, json) = call(
        &app,
        "GET",
        "/get_qrcode?access_token=T1&instance_id=I1",
        Body::empty(),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["state"], "ready");
    assert_eq!(json["qrcode"], "I1-qr-1");
    assert!(json.get("license_bypassed").is_none());

    let (status, json) = call(
        &app,
        "GET",
        "/debug_qr_status?access_token=T1&instance_id=I1",
        Body::empty(),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["debug_info"]["has_client"], true);
    assert_eq!(json["debug_info"]["qrcode_value"], "Present");
    assert_eq!(json["debug_info"]["user_info"], "Not logged in");
    assert_eq!(json["debug_info"]["connection_state"], "open");
    Ok(())
}

#[tokio::test]
async fn license_failures_use_matching_status_codes() -> anyhow::Result<()> {
    let connector = FakeConnector::new();
    let app = router(&connector, false)?;

    let (status, json) = call(&app, "GET", "/get_qrcode?instance_id=I1", Body::empty()).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"], "license_missing");

    let (status, json) = call(
        &app,
        "GET",
        "/get_qrcode?access_token=bad&instance_id=I1",
        Body::empty(),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "license_invalid");

    let (status, json) = call(&app, "GET", "/get_qrcode?access_token=T1", Body::empty()).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_instance_id");

    assert_eq!(connector.connects(), 0);
    Ok(())
}

#[tokio::test]
async fn debug_status_without_session_reports_missing_client() -> anyhow::Result<()> {
    let app = router(&FakeConnector::new(), false)?;

    let (status, json) = call(
        &app,
        "GET",
        "/debug_qr_status?access_token=T1&instance_id=I1",
        Body::empty(),
    )
    .await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "No client found");
    assert_eq!(json["debug_info"]["has_client"], false);
    Ok(())
}

#[tokio::test]
async fn logout_is_idempotent() -> anyhow::Result<()> {
    let app = router(&FakeConnector::new(), false)?;

    for _ in 0..2 {
        let (status, json) = call(
            &app,
            "GET",
            "/logout?access_token=T1&instance_id=I1",
            Body::empty(),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
    }
    Ok(())
}

#[tokio::test]
async fn send_message_rejects_malformed_body() -> anyhow::Result<()> {
    let app = router(&FakeConnector::new(), false)?;

    let (status, json) = call(
        &app,
        "POST",
        "/send_message?access_token=T1&instance_id=I1",
        Body::from(r#"{"text":"missing recipient"}"#),
    )
    .await?;

    assert!(status.is_client_error());
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"], "invalid_body");
    Ok(())
}

#[tokio::test]
async fn dev_routes_are_absent_unless_enabled() -> anyhow::Result<()> {
    let connector = FakeConnector::new();
    let app = router(&connector, false)?;

    for (method, uri) in [
        ("GET", "/get_qrcode_dev?instance_id=I1"),
        ("GET", "/debug_qr_status_dev?instance_id=I1"),
        ("POST", "/reset_session_dev?instance_id=I1"),
    ] {
        let (status, json) = call(&app, method, uri, Body::empty()).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(json["error"], "not_found");
    }

    assert_eq!(connector.connects(), 0);
    Ok(())
}

#[tokio::test]
async fn dev_routes_bypass_license_and_echo_it() -> anyhow::Result<()> {
    let app = router(&FakeConnector::new(), true)?;

    let (status, json) = call(&app, "GET", "/get_qrcode_dev?instance_id=I9", Body::empty()).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["qrcode"], "I9-qr-1");
    assert_eq!(json["license_bypassed"], true);

    let (status, json) = call(
        &app,
        "GET",
        "/debug_qr_status_dev?instance_id=missing",
        Body::empty(),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["license_bypassed"], true);
    assert_eq!(json["debug_info"]["has_client"], false);

    let (status, json) = call(&app, "GET", "/get_qrcode?instance_id=I9", Body::empty()).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json.get("license_bypassed").is_none());
    Ok(())
}

#[tokio::test]
async fn reset_session_route_returns_fresh_snapshot() -> anyhow::Result<()> {
    let app = router(&FakeConnector::new(), false)?;

    call(
        &app,
        "GET",
        "/get_qrcode?access_token=T1&instance_id=I1",
        Body::empty(),
    )
    .await?;
    let (status, json) = call(
        &app,
        "POST",
        "/reset_session?access_token=T1&instance_id=I1",
        Body::empty(),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["debug_info"]["has_client"], true);
    assert!(json["debug_info"]["generation"].is_string());
    Ok(())
}

#[tokio::test]
async fn tools_lists_only_mounted_routes() -> anyhow::Result<()> {
    let production = router(&FakeConnector::new(), false)?;
    let (status, json) = call(&production, "GET", "/tools", Body::empty()).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    let urls: Vec<&str> = json["tools"]
        .as_array()
        .map(|tools| tools.iter().filter_map(|tool| tool["url"].as_str()).collect())
        .unwrap_or_default();
    assert!(urls.iter().any(|url| url.starts_with("/debug_qr_status?")));
    assert!(urls.iter().all(|url| !url.contains("_dev")));

    let dev = router(&FakeConnector::new(), true)?;
    let (_, json) = call(&dev, "GET", "/tools", Body::empty()).await?;
    let dev_urls = json["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| tool["url"].as_str())
                .filter(|url| url.contains("_dev"))
                .count()
        })
        .unwrap_or_default();
    assert_eq!(dev_urls, 3);
    Ok(())
}
