//! Metrics middleware for HTTP request tracking
//!
//! Records request counts and durations by method, matched route and
//! status into the service's Prometheus registry.

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::debug;
use update_butler_service::ServiceMetrics;

/// Route label for requests that matched no route
const UNMATCHED_ROUTE: &str = "unmatched";

/// Middleware for collecting HTTP request metrics
///
/// The route label is the matched path template (e.g.
/// `/v1/artifacts/{reference}`), never the raw URI.
pub async fn http_metrics(
    State(metrics): State<ServiceMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    metrics.record_http_request(&method, &route, status, elapsed.as_secs_f64());

    debug!(
        method = %method,
        route = %route,
        status,
        duration_ms = elapsed.as_millis() as u64,
        "http_request_completed"
    );

    response
}
