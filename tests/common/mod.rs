//! Integration test harness
//!
//! `TestApp` serves the real router on a random local port with in-memory
//! backends. Helpers below wrap reqwest calls and response assertions.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use update_butler_api::{
    build_api_server, AppState, MiddlewareConfig, PublishAuth, RateLimitConfig, RouteConfig,
};
use update_butler_core::{Checksum, ReleaseEvent};
use update_butler_db::{InMemoryArtifactStore, InMemoryReleaseCatalog};
use update_butler_service::{
    encode_payload, DeliveryError, DispatcherConfig, DownloadLinks, GitHubHook, NotificationSink,
    RetryPolicy, ServiceRegistry, ServiceRegistryBuilder,
};

/// Token accepted by every test server
pub const PUBLISH_TOKEN: &str = "integration-publish-token";

/// Sink that keeps every delivered event
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ReleaseEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events delivered so far
    pub fn events(&self) -> Vec<ReleaseEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &ReleaseEvent) -> Result<(), DeliveryError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Options for spawning a test server
pub struct TestAppBuilder {
    rate_limit: RateLimitConfig,
    sink: Option<Arc<dyn NotificationSink>>,
    hooks: Vec<GitHubHook>,
    dispatcher: DispatcherConfig,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::disabled(),
            sink: None,
            hooks: Vec::new(),
            dispatcher: DispatcherConfig {
                queue_capacity: 64,
                retry: RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20)),
            },
        }
    }
}

impl TestAppBuilder {
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn github_hook(mut self, hook: GitHubHook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub async fn spawn(self) -> TestApp {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let address = listener.local_addr().expect("Failed to get local address");
        let base_url = format!("http://{}", address);

        let catalog = Arc::new(InMemoryReleaseCatalog::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let recorder = RecordingSink::new();
        let sink: Arc<dyn NotificationSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(recorder.clone()),
        };

        let services = ServiceRegistryBuilder::new()
            .catalog(catalog.clone())
            .artifacts(artifacts.clone())
            .sink(sink)
            .retry(RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)))
            .dispatcher(self.dispatcher)
            .links(DownloadLinks::new(&base_url))
            .github_hooks(self.hooks)
            .asset_fetch_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create services");

        let app = build_api_server(
            AppState::new(services.clone()),
            RouteConfig::new()
                .with_auth(PublishAuth::new([PUBLISH_TOKEN]))
                .with_rate_limit(self.rate_limit),
            MiddlewareConfig::new().with_tracing(false),
        );

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Failed to start test server");
        });

        TestApp {
            address: base_url,
            services,
            catalog,
            artifacts,
            recorder,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to build client"),
        }
    }
}

/// A running server plus handles to its backends
pub struct TestApp {
    pub address: String,
    pub services: ServiceRegistry,
    pub catalog: Arc<InMemoryReleaseCatalog>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    /// Receives notifications unless a custom sink was given
    pub recorder: RecordingSink,
    client: reqwest::Client,
}

impl TestApp {
    /// Create a test application with default options
    pub async fn new() -> Self {
        Self::builder().spawn().await
    }

    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    /// Get base URL
    pub fn url(&self) -> &str {
        &self.address
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to send request")
    }

    /// Publish `payload` with a correct checksum
    pub async fn publish(
        &self,
        project: &str,
        channel: &str,
        version: &str,
        payload: &[u8],
    ) -> reqwest::Response {
        self.publish_json(project, channel, &publish_body(version, payload), Some(PUBLISH_TOKEN))
            .await
    }

    pub async fn publish_json(
        &self,
        project: &str,
        channel: &str,
        body: &Value,
        token: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!(
                "{}/v1/projects/{}/channels/{}/releases",
                self.address, project, channel
            ))
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("Failed to send request")
    }

    pub async fn check(&self, project: &str, channel: &str, version: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/v1/check", self.address))
            .query(&[("project", project), ("channel", channel), ("version", version)])
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn download(
        &self,
        project: &str,
        channel: &str,
        selector: &str,
        real_ip: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self.client.get(format!(
            "{}/v1/projects/{}/channels/{}/releases/{}/download",
            self.address, project, channel, selector
        ));
        if let Some(ip) = real_ip {
            request = request.header("X-Real-IP", ip);
        }
        request.send().await.expect("Failed to send request")
    }

    pub async fn deprecate(
        &self,
        project: &str,
        channel: &str,
        version: &str,
    ) -> reqwest::Response {
        self.client
            .post(format!(
                "{}/v1/projects/{}/channels/{}/releases/{}/deprecate",
                self.address, project, channel, version
            ))
            .bearer_auth(PUBLISH_TOKEN)
            .send()
            .await
            .expect("Failed to send request")
    }

    /// Drain the notification queue
    pub async fn drain_notifications(&self) {
        self.services.shutdown().await;
    }
}

/// JSON body of a publish request
pub fn publish_body(version: &str, payload: &[u8]) -> Value {
    json!({
        "version": version,
        "checksum": Checksum::compute(payload).as_str(),
        "changelog": format!("Patch notes for {}", version),
        "payload": encode_payload(payload),
    })
}

/// Parse JSON response
pub async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> T {
    response
        .json::<T>()
        .await
        .expect("Failed to parse JSON response")
}

/// Assert response status
pub fn assert_status(response: &reqwest::Response, expected: reqwest::StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}, got {}",
        expected,
        response.status()
    );
}

/// Assert response is successful (2xx)
pub fn assert_success(response: &reqwest::Response) {
    assert!(
        response.status().is_success(),
        "Expected success status, got {}",
        response.status()
    );
}

/// Assert the response carries the given error code
pub async fn assert_error_code(response: reqwest::Response, code: &str) {
    let body: Value = parse_json(response).await;
    assert_eq!(body["code"], code, "unexpected error body: {}", body);
}
