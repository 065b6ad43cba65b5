//! UpdateButler API Layer
//!
//! This crate provides the REST API layer for UpdateButler using Axum.
//! It includes request handlers, middleware, error handling, and response types.
//!
//! # Architecture
//!
//! The API layer is organized into:
//!
//! - **Handlers**: Request handlers for all API endpoints
//! - **Routes**: Route definitions and router configuration
//! - **Auth**: Bearer-token authentication for publishing
//! - **Rate limiting**: Per-client download throttling
//! - **Middleware**: Tower middleware for tracing, CORS and request IDs
//! - **Error Handling**: Conversion of service errors to HTTP responses
//! - **Responses**: Standard response wrappers and types
//!
//! # Example
//!
//! ```rust,no_run
//! use update_butler_api::{build_api_server, AppState, MiddlewareConfig, RouteConfig};
//! use update_butler_service::ServiceRegistry;
//!
//! # async fn example(services: ServiceRegistry) {
//! let state = AppState::new(services);
//! let app = build_api_server(state, RouteConfig::default(), MiddlewareConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:19050").await.unwrap();
//! axum::serve(listener, app).await.unwrap();
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics_middleware;
pub mod middleware;
pub mod rate_limit;
pub mod responses;
pub mod routes;

// Re-export main types for convenience
pub use auth::{bearer_token, require_publish_token, AuthError, PublishAuth, Publisher};
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{AppState, VersionInfo, WebhookAck};
pub use metrics_middleware::http_metrics;
pub use middleware::{CorsConfig, MiddlewareConfig, UuidRequestIdGenerator};
pub use rate_limit::{download_rate_limit, RateLimitConfig, RateLimiterState};
pub use responses::{
    created, ok, ApiResponse, ComponentHealth, HealthResponse, HealthStatus, PaginatedResponse,
    PaginationMeta,
};
pub use routes::{build_router, publish_body_limit, RouteConfig};

use axum::Router;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

/// Build a complete API server with middleware
///
/// Every route records HTTP metrics. Tracing, CORS and request IDs are
/// applied as configured.
pub fn build_api_server(
    state: AppState,
    route_config: RouteConfig,
    middleware_config: MiddlewareConfig,
) -> Router {
    let metrics = state.services.metrics.clone();
    let mut router = build_router(state, route_config).layer(axum::middleware::from_fn_with_state(
        metrics,
        metrics_middleware::http_metrics,
    ));

    router = router.layer(middleware_config.cors.into_layer());

    if middleware_config.enable_tracing {
        router = router.layer(middleware::trace_layer());
    }

    router
        .layer(SetRequestIdLayer::x_request_id(
            UuidRequestIdGenerator::default(),
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
}
