use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Default)]
struct MetricsInner {
    request_sequence: AtomicU64,
    requests_total: AtomicU64,
    inflight_requests: AtomicU64,
    responses_2xx: AtomicU64,
    responses_4xx: AtomicU64,
    responses_5xx: AtomicU64,
    responses_other: AtomicU64,
}

/// Snapshot exposed by `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub instances_total: usize,
    pub requests_total: u64,
    pub inflight_requests: u64,
    pub responses_2xx: u64,
    pub responses_4xx: u64,
    pub responses_5xx: u64,
    pub responses_other: u64,
}

/// Process-wide HTTP request counters.
#[derive(Clone)]
pub struct RequestMetrics {
    inner: Arc<MetricsInner>,
    started_at: Instant,
}

impl RequestMetrics {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
            started_at: Instant::now(),
        }
    }

    /// Registers a request start and returns its sequence number.
    pub fn begin_request(&self) -> u64 {
        let sequence = self.inner.request_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inner.inflight_requests.fetch_add(1, Ordering::Relaxed);
        sequence
    }

    /// Registers a request end using final HTTP status code.
    pub fn end_request(&self, status: StatusCode) {
        let _ = self
            .inner
            .inflight_requests
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            });

        let bucket = if status.is_success() {
            &self.inner.responses_2xx
        } else if status.is_client_error() {
            &self.inner.responses_4xx
        } else if status.is_server_error() {
            &self.inner.responses_5xx
        } else {
            &self.inner.responses_other
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current serialized metrics snapshot.
    pub fn snapshot(&self, instances_total: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            instances_total,
            requests_total: self.inner.requests_total.load(Ordering::Relaxed),
            inflight_requests: self.inner.inflight_requests.load(Ordering::Relaxed),
            responses_2xx: self.inner.responses_2xx.load(Ordering::Relaxed),
            responses_4xx: self.inner.responses_4xx.load(Ordering::Relaxed),
            responses_5xx: self.inner.responses_5xx.load(Ordering::Relaxed),
            responses_other: self.inner.responses_other.load(Ordering::Relaxed),
        }
    }
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts every request and stamps the response with a request id.
///
/// An incoming `x-request-id` is echoed; otherwise a fresh UUID is used.
pub async fn track_requests(
    State(metrics): State<RequestMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let sequence = metrics.begin_request();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let path = request.uri().path().to_owned();

    let mut response = next.run(request).await;
    let status = response.status();
    metrics.end_request(status);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    tracing::debug!(
        request_seq = sequence,
        request_id = %request_id,
        path = %path,
        status = status.as_u16(),
        "request completed"
    );

    response
}
