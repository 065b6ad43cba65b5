//! Router assembly
//!
//! Unversioned operational routes sit at the root; everything clients and
//! publishers call lives under `/v1`.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use update_butler_service::DEFAULT_MAX_PAYLOAD_BYTES;

use crate::{
    auth::{require_publish_token, PublishAuth},
    handlers::{
        check_update, deprecate_release, download_artifact, download_release, get_release,
        github_webhook, health_check, list_releases, metrics, publish_release, version_info,
        AppState,
    },
    rate_limit::{download_rate_limit, RateLimitConfig, RateLimiterState},
};

/// Extra room for the JSON envelope around a base64 payload
const PUBLISH_ENVELOPE_BYTES: usize = 1024 * 1024;

/// Request body limit that fits a base64-encoded payload of `max_payload_bytes`
pub fn publish_body_limit(max_payload_bytes: u64) -> usize {
    let encoded = max_payload_bytes.saturating_mul(4).saturating_div(3);
    usize::try_from(encoded)
        .unwrap_or(usize::MAX)
        .saturating_add(PUBLISH_ENVELOPE_BYTES)
}

/// Route configuration
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Publish bearer tokens
    pub auth: PublishAuth,

    /// Download rate limit
    pub rate_limit: RateLimitConfig,

    /// Maximum publish request body size
    pub max_publish_body_bytes: usize,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            auth: PublishAuth::new(Vec::<String>::new()),
            rate_limit: RateLimitConfig::default(),
            max_publish_body_bytes: publish_body_limit(DEFAULT_MAX_PAYLOAD_BYTES),
        }
    }
}

impl RouteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accepted publish tokens
    pub fn with_auth(mut self, auth: PublishAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Set the download rate limit
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Size the publish body limit for a payload limit
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: u64) -> Self {
        self.max_publish_body_bytes = publish_body_limit(max_payload_bytes);
        self
    }
}

/// Routes without the cross-cutting layers; see `build_api_server`
pub fn build_router(state: AppState, config: RouteConfig) -> Router {
    Router::new()
        // Operational
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/version", get(version_info))
        // API v1 routes
        .nest("/v1", build_v1_routes(config))
        .with_state(state)
}

/// Build v1 API routes
fn build_v1_routes(config: RouteConfig) -> Router<AppState> {
    let auth = middleware::from_fn_with_state(config.auth, require_publish_token);
    let limiter = middleware::from_fn_with_state(
        RateLimiterState::new(config.rate_limit),
        download_rate_limit,
    );

    Router::new()
        // Update checks
        .route("/check", get(check_update))
        // Releases
        .route(
            "/projects/{project}/channels/{channel}/releases",
            get(list_releases).merge(
                post(publish_release)
                    .route_layer(auth.clone())
                    .layer(DefaultBodyLimit::max(config.max_publish_body_bytes)),
            ),
        )
        .route(
            "/projects/{project}/channels/{channel}/releases/{version}",
            get(get_release),
        )
        .route(
            "/projects/{project}/channels/{channel}/releases/{version}/deprecate",
            post(deprecate_release).route_layer(auth),
        )
        // Downloads
        .route(
            "/projects/{project}/channels/{channel}/releases/{version}/download",
            get(download_release).route_layer(limiter),
        )
        .route("/artifacts/{reference}", get(download_artifact))
        // Webhooks
        .route("/webhooks/{secret}/github", post(github_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use update_butler_core::Checksum;
    use update_butler_db::{InMemoryArtifactStore, InMemoryReleaseCatalog};
    use update_butler_service::{encode_payload, DownloadLinks, ServiceRegistryBuilder};

    const TOKEN: &str = "publish-secret";

    fn app() -> Router {
        let services = ServiceRegistryBuilder::new()
            .catalog(Arc::new(InMemoryReleaseCatalog::new()))
            .artifacts(Arc::new(InMemoryArtifactStore::new()))
            .links(DownloadLinks::new("http://updates.test"))
            .build()
            .unwrap();

        build_router(
            AppState::new(services),
            RouteConfig::new().with_auth(PublishAuth::new([TOKEN])),
        )
    }

    fn publish_request(version: &str, payload: &[u8], token: Option<&str>) -> Request<Body> {
        let body = json!({
            "version": version,
            "checksum": Checksum::compute(payload).as_str(),
            "changelog": format!("notes for {}", version),
            "payload": encode_payload(payload),
        });

        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/projects/demo/channels/stable/releases")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_publish_body_limit_covers_base64() {
        assert!(publish_body_limit(3 * 1024) >= 4 * 1024);
        assert!(publish_body_limit(u64::MAX) > publish_body_limit(1 << 40));
    }

    #[tokio::test]
    async fn test_publish_requires_token() {
        let app = app();

        let response = app
            .clone()
            .oneshot(publish_request("1.0.0", b"P1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(publish_request("1.0.0", b"P1", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_publish_then_check_update() {
        let app = app();

        let response = app
            .clone()
            .oneshot(publish_request("1.0.0", b"P1", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(get("/v1/check?project=demo&channel=stable&version=0.9.0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["available"], true);
        assert_eq!(body["data"]["version"], "1.0.0");
        assert_eq!(body["data"]["changelog"], "notes for 1.0.0");

        let response = app
            .oneshot(get("/v1/check?project=demo&channel=stable&version=1.0.0"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["available"], false);
    }

    #[tokio::test]
    async fn test_duplicate_publish_conflicts() {
        let app = app();

        app.clone()
            .oneshot(publish_request("1.0.0", b"P1", Some(TOKEN)))
            .await
            .unwrap();
        let response = app
            .oneshot(publish_request("1.0.0", b"P2", Some(TOKEN)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_check_update_errors() {
        let app = app();

        let response = app
            .clone()
            .oneshot(get("/v1/check?project=ghost&channel=stable&version=1.0.0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(publish_request("1.0.0", b"P1", Some(TOKEN)))
            .await
            .unwrap();
        let response = app
            .oneshot(get("/v1/check?project=demo&channel=stable&version=banana"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_download_release_headers_and_rate_limit() {
        let app = app();
        app.clone()
            .oneshot(publish_request("1.0.0", b"P1", Some(TOKEN)))
            .await
            .unwrap();

        let download = || {
            Request::builder()
                .uri("/v1/projects/demo/channels/stable/releases/latest/download")
                .header("x-real-ip", "203.0.113.9")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(download()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["x-checksum-sha256"],
            Checksum::compute(b"P1").as_str()
        );
        assert_eq!(response.headers()["x-download-count"], "1");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"P1");

        let response = app.oneshot(download()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_download_artifact_by_reference() {
        let app = app();
        app.clone()
            .oneshot(publish_request("1.0.0", b"P1", Some(TOKEN)))
            .await
            .unwrap();

        let reference = Checksum::compute(b"P1");
        let response = app
            .clone()
            .oneshot(get(&format!("/v1/artifacts/{}", reference)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/v1/artifacts/not-a-digest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_deprecate() {
        let app = app();
        for (version, payload) in [("1.0.0", b"P1"), ("1.1.0", b"P2")] {
            app.clone()
                .oneshot(publish_request(version, payload, Some(TOKEN)))
                .await
                .unwrap();
        }

        let response = app
            .clone()
            .oneshot(get("/v1/projects/demo/channels/stable/releases"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["items"][0]["version"], "1.1.0");
        assert_eq!(body["pagination"]["total"], 2);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/projects/demo/channels/stable/releases/1.1.0/deprecate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/projects/demo/channels/stable/releases/1.1.0/deprecate")
                    .header(AUTHORIZATION, format!("Bearer {}", TOKEN))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["deprecated"], true);

        let response = app
            .oneshot(get("/v1/projects/demo/channels/stable/releases/1.1.0"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["deprecated"], true);
        assert_eq!(body["data"]["download_count"], 0);
    }

    #[tokio::test]
    async fn test_health_version_and_metrics() {
        let app = app();

        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");

        let response = app.clone().oneshot(get("/version")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_unknown_webhook_secret_is_unauthorized() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/webhooks/nope/github")
                    .header("x-github-event", "release")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
