//! Tower layers shared by every route: request ids, tracing spans, CORS

use axum::http::{header, HeaderName, HeaderValue, Method, Request};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestId, RequestId},
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
    LatencyUnit,
};
use tracing::{info_span, warn, Level, Span};
use uuid::Uuid;

use crate::handlers::{CHECKSUM_HEADER, DOWNLOAD_COUNT_HEADER};

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Assigns a random v4 UUID to requests that arrive without an id
#[derive(Clone, Copy, Default)]
pub struct UuidRequestIdGenerator;

impl MakeRequestId for UuidRequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().hyphenated().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// One `http` span per request, tagged with its request id
#[derive(Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");

        info_span!(
            "http",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

/// Request tracing; must sit inside the layer that assigns request ids
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http().make_span_with(RequestSpan).on_response(
        DefaultOnResponse::new()
            .level(Level::INFO)
            .latency_unit(LatencyUnit::Millis),
    )
}

/// Browser access rules, read from the `cors` config section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to call the API; empty allows any
    pub allowed_origins: Vec<String>,

    /// Preflight cache lifetime
    pub max_age_seconds: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_seconds: Some(3600),
        }
    }
}

impl CorsConfig {
    fn allow_origin(&self) -> AllowOrigin {
        if self.allowed_origins.is_empty() {
            return AllowOrigin::any();
        }

        let origins = self.allowed_origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| warn!(origin = %origin, "Ignoring invalid CORS origin"))
                .ok()
        });
        AllowOrigin::list(origins)
    }

    /// Clients verifying downloads in the browser need the checksum and
    /// download headers exposed.
    pub fn into_layer(self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_origin(self.allow_origin())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .expose_headers([
                header::CONTENT_TYPE,
                header::CONTENT_DISPOSITION,
                header::RETRY_AFTER,
                HeaderName::from_static(REQUEST_ID_HEADER),
                HeaderName::from_static(CHECKSUM_HEADER),
                HeaderName::from_static(DOWNLOAD_COUNT_HEADER),
            ]);

        match self.max_age_seconds {
            Some(seconds) => layer.max_age(Duration::from_secs(seconds)),
            None => layer,
        }
    }
}

/// Which cross-cutting layers `build_api_server` installs
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    pub cors: CorsConfig,
    /// Emit a tracing span per request
    pub enable_tracing: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            cors: CorsConfig::default(),
            enable_tracing: true,
        }
    }
}

impl MiddlewareConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    pub fn with_tracing(mut self, enable: bool) -> Self {
        self.enable_tracing = enable;
        self
    }
}
