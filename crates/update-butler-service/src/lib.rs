//! Service layer for UpdateButler
//!
//! This crate sits between the API and database layers. It implements
//! version resolution, the publish pipeline, verified downloads, release
//! queries, GitHub ingestion and asynchronous release notifications.
//!
//! # Architecture
//!
//! - **VersionResolver**: answers update checks from polling clients
//! - **PublishService**: validate, store, commit, notify
//! - **DownloadService**: serves verified artifact bytes
//! - **ReleaseQueryService**: release lookup and listing
//! - **ReleaseIngestService**: GitHub release webhooks
//! - **NotificationDispatcher**: bounded queue feeding a notification sink
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use update_butler_db::{InMemoryArtifactStore, InMemoryReleaseCatalog};
//! use update_butler_service::{LogSink, ServiceRegistryBuilder};
//!
//! # async fn example() -> update_butler_service::ServiceResult<()> {
//! let services = ServiceRegistryBuilder::new()
//!     .catalog(Arc::new(InMemoryReleaseCatalog::new()))
//!     .artifacts(Arc::new(InMemoryArtifactStore::new()))
//!     .sink(Arc::new(LogSink))
//!     .build()?;
//!
//! let resolution = services.resolver.resolve("demo", "stable", "1.0.0").await;
//! # let _ = resolution;
//! services.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod download;
pub mod dto;
pub mod error;
pub mod github;
pub mod metrics;
pub mod notification;
pub mod publish;
pub mod query;
pub mod resolver;
pub mod retry;

// Re-export main types for convenience
pub use dto::*;
pub use error::{ServiceError, ServiceResult};
pub use metrics::ServiceMetrics;
pub use notification::{
    DeliveryError, DispatcherConfig, DispatcherStats, LogSink, NotificationDispatcher,
    NotificationSink, WebhookSink,
};
pub use retry::{retry_with_jitter, RetryPolicy};

// Re-export service traits and implementations
pub use download::{DefaultDownloadService, DownloadService};
pub use github::{
    version_from_tag, GitHubHook, GitHubIngestService, GitHubReleaseEvent, IngestOutcome,
    ReleaseIngestService,
};
pub use publish::{
    DefaultPublishService, PublishAttempt, PublishLimits, PublishService, PublishState,
    DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use query::{DefaultReleaseQueryService, ReleaseQueryService};
pub use resolver::{resolve_against, DefaultVersionResolver, VersionResolver};

use std::sync::Arc;
use std::time::Duration;
use update_butler_core::ChannelPolicyTable;
use update_butler_db::{ArtifactStore, ReleaseCatalog};

/// Timeout for fetching GitHub release assets
pub const DEFAULT_ASSET_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Service registry that holds all service instances
#[derive(Clone)]
pub struct ServiceRegistry {
    /// Update-check resolution
    pub resolver: Arc<dyn VersionResolver>,
    /// Publish pipeline
    pub publisher: Arc<dyn PublishService>,
    /// Verified downloads
    pub downloads: Arc<dyn DownloadService>,
    /// Release queries
    pub releases: Arc<dyn ReleaseQueryService>,
    /// GitHub ingestion
    pub github: Arc<dyn ReleaseIngestService>,
    /// Notification dispatcher
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Prometheus metrics
    pub metrics: ServiceMetrics,
    /// Public download links
    pub links: DownloadLinks,
    catalog: Arc<dyn ReleaseCatalog>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ServiceRegistry {
    /// Check both backing stores
    pub async fn health_check(&self) -> HealthReport {
        let catalog = match self.catalog.health_check().await {
            Ok(()) => ComponentHealth::up(),
            Err(e) => ComponentHealth::down(e.to_string()),
        };
        let artifacts = match self.artifacts.health_check().await {
            Ok(()) => ComponentHealth::up(),
            Err(e) => ComponentHealth::down(e.to_string()),
        };

        HealthReport { catalog, artifacts }
    }

    /// Drain pending notifications and stop the dispatcher
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

/// Builder for ServiceRegistry
///
/// `build` spawns the notification worker and must run inside a tokio runtime.
pub struct ServiceRegistryBuilder {
    catalog: Option<Arc<dyn ReleaseCatalog>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    sink: Option<Arc<dyn NotificationSink>>,
    metrics: Option<ServiceMetrics>,
    policies: ChannelPolicyTable,
    limits: PublishLimits,
    retry: RetryPolicy,
    dispatcher: DispatcherConfig,
    links: DownloadLinks,
    hooks: Vec<GitHubHook>,
    asset_fetch_timeout: Duration,
}

impl ServiceRegistryBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            catalog: None,
            artifacts: None,
            sink: None,
            metrics: None,
            policies: ChannelPolicyTable::default(),
            limits: PublishLimits::default(),
            retry: RetryPolicy::default(),
            dispatcher: DispatcherConfig::default(),
            links: DownloadLinks::default(),
            hooks: Vec::new(),
            asset_fetch_timeout: DEFAULT_ASSET_FETCH_TIMEOUT,
        }
    }

    /// Set the release catalog
    pub fn catalog(mut self, catalog: Arc<dyn ReleaseCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the artifact store
    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Set the notification sink (defaults to [`LogSink`])
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an existing metrics registry
    pub fn metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the channel policy table
    pub fn policies(mut self, policies: ChannelPolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Set the publish limits
    pub fn limits(mut self, limits: PublishLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the storage retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the dispatcher configuration
    pub fn dispatcher(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = config;
        self
    }

    /// Set the public base URL for download links
    pub fn links(mut self, links: DownloadLinks) -> Self {
        self.links = links;
        self
    }

    /// Set the GitHub webhook bindings
    pub fn github_hooks(mut self, hooks: Vec<GitHubHook>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the GitHub asset fetch timeout
    pub fn asset_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.asset_fetch_timeout = timeout;
        self
    }

    /// Build the service registry
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Internal` if the catalog or artifact store is
    /// missing, or if metrics cannot be registered.
    pub fn build(self) -> ServiceResult<ServiceRegistry> {
        let catalog = self
            .catalog
            .ok_or_else(|| ServiceError::Internal("Release catalog is required".to_string()))?;
        let artifacts = self
            .artifacts
            .ok_or_else(|| ServiceError::Internal("Artifact store is required".to_string()))?;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => ServiceMetrics::new()?,
        };
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));

        let dispatcher = Arc::new(NotificationDispatcher::spawn(
            sink,
            self.dispatcher,
            metrics.clone(),
        ));

        let resolver = Arc::new(DefaultVersionResolver::new(
            catalog.clone(),
            self.retry.clone(),
            metrics.clone(),
        ));

        let publisher: Arc<dyn PublishService> = Arc::new(DefaultPublishService::new(
            catalog.clone(),
            artifacts.clone(),
            dispatcher.clone(),
            self.policies,
            self.limits,
            self.retry.clone(),
            metrics.clone(),
        ));

        let downloads = Arc::new(DefaultDownloadService::new(
            catalog.clone(),
            artifacts.clone(),
            self.retry.clone(),
            metrics.clone(),
        ));

        let releases = Arc::new(DefaultReleaseQueryService::new(
            catalog.clone(),
            self.links.clone(),
            self.retry.clone(),
        ));

        let github = Arc::new(GitHubIngestService::new(
            self.hooks,
            publisher.clone(),
            self.limits,
            self.retry,
            self.asset_fetch_timeout,
        )?);

        Ok(ServiceRegistry {
            resolver,
            publisher,
            downloads,
            releases,
            github,
            dispatcher,
            metrics,
            links: self.links,
            catalog,
            artifacts,
        })
    }
}

impl Default for ServiceRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
