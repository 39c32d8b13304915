use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, OriginalUri, Query, State, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::CorsOrigins,
    error::{Failure, GatewayError},
    gateway::{Gateway, GatewayResult},
    license::{Access, BypassGrant},
    observability::{RequestMetrics, track_requests},
    wa::OutgoingMessage,
};

/// HTTP-level settings applied when building the router.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub body_limit_kb: usize,
    pub cors_origins: CorsOrigins,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            body_limit_kb: 256,
            cors_origins: CorsOrigins::Any,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    ready: Arc<AtomicBool>,
    gateway: Gateway,
    metrics: RequestMetrics,
    dev_bypass: Option<BypassGrant>,
    options: HttpOptions,
}

impl AppState {
    /// Creates app state with readiness disabled. Dev routes exist only with a grant.
    pub fn new(gateway: Gateway, dev_bypass: Option<BypassGrant>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            gateway,
            metrics: RequestMetrics::new(),
            dev_bypass,
            options: HttpOptions::default(),
        }
    }

    pub fn with_options(mut self, options: HttpOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets readiness status.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Returns readiness status.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    fn dev_access(&self, query: &InstanceQuery) -> Option<Access> {
        self.dev_bypass
            .map(|grant| Access::bypassed(query.token(), grant))
    }
}

#[derive(Debug, Default, Deserialize)]
struct InstanceQuery {
    access_token: Option<String>,
    instance_id: Option<String>,
}

impl InstanceQuery {
    fn token(&self) -> &str {
        self.access_token.as_deref().unwrap_or_default()
    }

    fn instance_id(&self) -> &str {
        self.instance_id.as_deref().unwrap_or_default()
    }

    fn access(&self) -> Access {
        Access::token(self.token())
    }
}

#[derive(Debug, Serialize)]
struct WelcomeResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Tool {
    name: &'static str,
    url: &'static str,
    method: &'static str,
    description: &'static str,
}

#[derive(Debug, Serialize)]
struct ToolsResponse {
    status: &'static str,
    message: &'static str,
    tools: Vec<Tool>,
}

const TOOLS: &[Tool] = &[
    Tool {
        name: "QR Code",
        url: "/get_qrcode?access_token=YOUR_TOKEN&instance_id=YOUR_INSTANCE",
        method: "GET",
        description: "Starts a session if needed and returns its QR payload",
    },
    Tool {
        name: "Debug Status",
        url: "/debug_qr_status?access_token=YOUR_TOKEN&instance_id=YOUR_INSTANCE",
        method: "GET",
        description: "Session state without creating a session",
    },
    Tool {
        name: "Reset Session",
        url: "/reset_session?access_token=YOUR_TOKEN&instance_id=YOUR_INSTANCE",
        method: "POST",
        description: "Tears the session down and starts a fresh QR flow",
    },
    Tool {
        name: "Metrics",
        url: "/metrics",
        method: "GET",
        description: "Request counters and live session count",
    },
];

const DEV_TOOLS: &[Tool] = &[
    Tool {
        name: "QR Code (dev)",
        url: "/get_qrcode_dev?instance_id=YOUR_INSTANCE",
        method: "GET",
        description: "QR payload without license validation",
    },
    Tool {
        name: "Debug Status (dev)",
        url: "/debug_qr_status_dev?instance_id=YOUR_INSTANCE",
        method: "GET",
        description: "Session state without license validation",
    },
    Tool {
        name: "Reset Session (dev)",
        url: "/reset_session_dev?instance_id=YOUR_INSTANCE",
        method: "POST",
        description: "Session reset without license validation",
    },
];

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct NotFoundResponse {
    status: &'static str,
    error: &'static str,
    route: String,
}

/// Builds the root HTTP router.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/tools", get(tools_handler))
        .route("/instance", get(instance_info_handler))
        .route("/get_qrcode", get(get_qrcode_handler))
        .route("/get_groups", get(get_groups_handler))
        .route("/logout", get(logout_handler))
        .route("/send_message", post(send_message_handler))
        .route("/debug_qr_status", get(debug_status_handler))
        .route("/reset_session", post(reset_session_handler));

    if state.dev_bypass.is_some() {
        router = router
            .route("/get_qrcode_dev", get(get_qrcode_dev_handler))
            .route("/debug_qr_status_dev", get(debug_status_dev_handler))
            .route("/reset_session_dev", post(reset_session_dev_handler));
    }

    let cors = cors_layer(&state.options.cors_origins);
    let body_limit = state.options.body_limit_kb.saturating_mul(1024);
    let metrics = state.metrics.clone();

    router
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(metrics, track_requests))
        .with_state(state)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        CorsOrigins::Any => layer.allow_origin(Any),
        CorsOrigins::List(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect();
            layer.allow_origin(AllowOrigin::list(origins))
        }
    }
}

fn respond<T: Serialize>(result: GatewayResult<T>) -> Response {
    match result {
        Ok(success) => (StatusCode::OK, Json(success)).into_response(),
        Err(failure) => failure.into_response(),
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(WelcomeResponse {
        status: "success",
        message: "Welcome to WAZIPER",
    })
}

/// Lists the diagnostic endpoints mounted on this router.
async fn tools_handler(State(state): State<AppState>) -> impl IntoResponse {
    let dev_tools: &[Tool] = if state.dev_bypass.is_some() {
        DEV_TOOLS
    } else {
        &[]
    };
    let tools = TOOLS
        .iter()
        .chain(dev_tools)
        .copied()
        .collect();

    Json(ToolsResponse {
        status: "success",
        message: "Available debug tools",
        tools,
    })
}

async fn healthz_handler() -> impl IntoResponse {
    Json(HealthResponse { ok: true })
}

async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(HealthResponse { ok: true })).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { ok: false })).into_response()
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let instances_total = state.gateway.sessions().count();
    Json(state.metrics.snapshot(instances_total))
}

async fn instance_info_handler(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Response {
    respond(
        state
            .gateway
            .get_instance_info(&query.access(), query.instance_id())
            .await,
    )
}

async fn get_qrcode_handler(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Response {
    respond(
        state
            .gateway
            .get_qrcode(&query.access(), query.instance_id())
            .await,
    )
}

async fn get_groups_handler(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Response {
    respond(
        state
            .gateway
            .get_groups(&query.access(), query.instance_id())
            .await,
    )
}

async fn logout_handler(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Response {
    respond(
        state
            .gateway
            .logout(&query.access(), query.instance_id())
            .await,
    )
}

async fn send_message_handler(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
    body: Result<Json<OutgoingMessage>, JsonRejection>,
) -> Response {
    let message = match body {
        Ok(Json(message)) => message,
        Err(rejection) => {
            let error = GatewayError::InvalidBody {
                status: rejection.status(),
                reason: rejection.body_text(),
            };
            return Failure::new(error, false).into_response();
        }
    };

    respond(
        state
            .gateway
            .send_message(&query.access(), query.instance_id(), message)
            .await,
    )
}

async fn debug_status_handler(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Response {
    respond(
        state
            .gateway
            .debug_status(&query.access(), query.instance_id())
            .await,
    )
}

async fn reset_session_handler(
    State(state): State<AppState>,
    Query(query): Query<InstanceQuery>,
) -> Response {
    respond(
        state
            .gateway
            .reset_session(&query.access(), query.instance_id())
            .await,
    )
}

async fn get_qrcode_dev_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<InstanceQuery>,
) -> Response {
    let Some(access) = state.dev_access(&query) else {
        return not_found(uri.path());
    };
    respond(state.gateway.get_qrcode(&access, query.instance_id()).await)
}

async fn debug_status_dev_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<InstanceQuery>,
) -> Response {
    let Some(access) = state.dev_access(&query) else {
        return not_found(uri.path());
    };
    respond(state.gateway.debug_status(&access, query.instance_id()).await)
}

async fn reset_session_dev_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<InstanceQuery>,
) -> Response {
    let Some(access) = state.dev_access(&query) else {
        return not_found(uri.path());
    };
    respond(state.gateway.reset_session(&access, query.instance_id()).await)
}

async fn not_found_handler(OriginalUri(uri): OriginalUri) -> Response {
    not_found(uri.path())
}

fn not_found(route: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            status: "error",
            error: "not_found",
            route: route.to_owned(),
        }),
    )
        .into_response()
}
