//! Request metrics
//!
//! Every routed request is counted and timed under its route template
//! (`/api/players/{id}`), never the concrete path, so ids do not multiply
//! series. With the `metrics` feature the series are exported in the
//! Prometheus text format on `GET /metrics`.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use telemetry_metrics::{counter, histogram};

/// Requests served, by method, route and status
pub const REQUESTS_TOTAL: &str = "playermgr_requests_total";
/// Request latency in seconds, by method, route and status
pub const REQUEST_DURATION: &str = "playermgr_request_duration_seconds";

/// Middleware recording [`REQUESTS_TOTAL`] and [`REQUEST_DURATION`]
pub async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    counter!(REQUESTS_TOTAL, &labels).increment(1);
    histogram!(REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());
    response
}

#[cfg(feature = "metrics")]
pub use prometheus::{prometheus_handle, render};

#[cfg(feature = "metrics")]
mod prometheus {
    use std::sync::OnceLock;

    use axum::extract::State;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
    use tracing::warn;

    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

    /// Handle to the process-wide Prometheus recorder, installed on first call.
    pub fn prometheus_handle() -> PrometheusHandle {
        HANDLE
            .get_or_init(|| {
                let recorder = PrometheusBuilder::new().build_recorder();
                let handle = recorder.handle();
                if telemetry_metrics::set_global_recorder(recorder).is_err() {
                    warn!("Another metrics recorder is installed, /metrics stays empty");
                }
                handle
            })
            .clone()
    }

    /// Prometheus scrape endpoint (GET /metrics)
    pub async fn render(State(handle): State<PrometheusHandle>) -> String {
        handle.run_upkeep();
        handle.render()
    }
}
