//! GitHub release ingestion
//!
//! A GitHub `release` webhook pointed at `/v1/webhooks/{secret}/github`
//! publishes the first asset of the release into the project's stable or
//! pre-release channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use update_butler_core::{Checksum, Release};

use crate::dto::PublishRequest;
use crate::error::{ServiceError, ServiceResult};
use crate::publish::{PublishLimits, PublishService};
use crate::retry::{retry_with_jitter, RetryPolicy};

/// Webhook event name GitHub sends for releases
pub const RELEASE_EVENT: &str = "release";

const INGESTED_ACTIONS: [&str; 2] = ["released", "prereleased"];

/// Binds a webhook secret to a project
#[derive(Clone, Serialize, Deserialize)]
pub struct GitHubHook {
    /// Project releases are published to
    pub project: String,

    /// Secret path segment of the webhook URL
    pub secret: String,

    /// Channel for regular releases
    #[serde(default = "default_stable_channel")]
    pub stable_channel: String,

    /// Channel for releases GitHub marks as prerelease
    #[serde(default = "default_prerelease_channel")]
    pub prerelease_channel: String,
}

fn default_stable_channel() -> String {
    "stable".to_string()
}

fn default_prerelease_channel() -> String {
    "beta".to_string()
}

impl GitHubHook {
    /// Create a hook with the default channel names
    pub fn new(project: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            secret: secret.into(),
            stable_channel: default_stable_channel(),
            prerelease_channel: default_prerelease_channel(),
        }
    }

    fn channel_for(&self, release: &GitHubRelease) -> &str {
        if release.prerelease {
            &self.prerelease_channel
        } else {
            &self.stable_channel
        }
    }
}

impl std::fmt::Debug for GitHubHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubHook")
            .field("project", &self.project)
            .field("secret", &"[REDACTED]")
            .field("stable_channel", &self.stable_channel)
            .field("prerelease_channel", &self.prerelease_channel)
            .finish()
    }
}

/// Body of a GitHub `release` webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubReleaseEvent {
    /// Action that triggered the webhook
    pub action: String,

    /// The release
    pub release: GitHubRelease,
}

/// Release section of the webhook body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    /// Git tag of the release
    pub tag_name: String,

    /// Release name
    #[serde(default)]
    pub name: Option<String>,

    /// Release notes
    #[serde(default)]
    pub body: Option<String>,

    /// Draft flag
    #[serde(default)]
    pub draft: bool,

    /// Prerelease flag
    #[serde(default)]
    pub prerelease: bool,

    /// Attached assets
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

/// Asset attached to a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAsset {
    /// File name
    pub name: String,

    /// Public download URL
    pub browser_download_url: String,
}

/// Result of handling a webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A release was published
    Published(Release),
    /// The delivery was acknowledged without publishing
    Ignored(String),
}

/// Version string from a tag such as `refs/tags/v1.2.0`
pub fn version_from_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(tag)
}

/// Trait for ingesting GitHub release webhooks
#[async_trait]
pub trait ReleaseIngestService: Send + Sync {
    /// Handle one webhook delivery
    ///
    /// # Errors
    /// * `Unauthorized` if no hook matches `secret`
    /// * `InvalidInput` if the body is not a release event
    async fn ingest(
        &self,
        secret: &str,
        event_header: Option<&str>,
        body: &[u8],
    ) -> ServiceResult<IngestOutcome>;
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Default implementation of ReleaseIngestService
pub struct GitHubIngestService {
    hooks: Vec<GitHubHook>,
    publisher: Arc<dyn PublishService>,
    client: reqwest::Client,
    limits: PublishLimits,
    retry: RetryPolicy,
}

impl GitHubIngestService {
    /// Create a new ingest service
    pub fn new(
        hooks: Vec<GitHubHook>,
        publisher: Arc<dyn PublishService>,
        limits: PublishLimits,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("update-butler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            hooks,
            publisher,
            client,
            limits,
            retry,
        })
    }

    /// Number of configured hooks
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    fn hook_for(&self, secret: &str) -> Option<&GitHubHook> {
        // Secrets are matched by SHA-256 digest
        let presented = Checksum::compute(secret.as_bytes());
        self.hooks
            .iter()
            .find(|hook| Checksum::compute(hook.secret.as_bytes()) == presented)
    }

    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Transient(format!("asset host returned {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Permanent(format!("asset host returned {}", status)));
        }
        let limit = self.limits.max_payload_bytes;
        let too_large = |size: u64| {
            FetchError::Permanent(format!(
                "asset of {} bytes exceeds the {} byte limit",
                size, limit
            ))
        };
        if let Some(length) = response.content_length() {
            if length > limit {
                return Err(too_large(length));
            }
        }

        // Content-Length is optional; the running total bounds memory
        let mut response = response;
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?
        {
            let total = (bytes.len() + chunk.len()) as u64;
            if total > limit {
                return Err(too_large(total));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ReleaseIngestService for GitHubIngestService {
    #[instrument(skip(self, secret, body))]
    async fn ingest(
        &self,
        secret: &str,
        event_header: Option<&str>,
        body: &[u8],
    ) -> ServiceResult<IngestOutcome> {
        let hook = self
            .hook_for(secret)
            .ok_or_else(|| ServiceError::Unauthorized("Unknown webhook".to_string()))?;

        if let Some(event) = event_header {
            if event != RELEASE_EVENT {
                return Ok(IngestOutcome::Ignored(format!("event '{}' is not handled", event)));
            }
        }

        let event: GitHubReleaseEvent = serde_json::from_slice(body)
            .map_err(|e| ServiceError::InvalidInput(format!("Invalid release event: {}", e)))?;

        if !INGESTED_ACTIONS.contains(&event.action.as_str()) {
            return Ok(IngestOutcome::Ignored(format!(
                "action '{}' is not handled",
                event.action
            )));
        }

        let release = event.release;
        if release.draft {
            return Ok(IngestOutcome::Ignored("draft release".to_string()));
        }
        let asset = match release.assets.first() {
            Some(asset) => asset.clone(),
            None => return Ok(IngestOutcome::Ignored("release has no assets".to_string())),
        };

        let version = version_from_tag(&release.tag_name).to_string();
        let channel = hook.channel_for(&release).to_string();
        info!(
            project = %hook.project,
            channel = %channel,
            version = %version,
            asset = %asset.name,
            "Ingesting GitHub release"
        );

        let payload = retry_with_jitter(&self.retry, "github_asset", FetchError::is_transient, || {
            self.fetch_asset(&asset.browser_download_url)
        })
        .await
        .map_err(|e| {
            warn!(url = %asset.browser_download_url, error = %e, "Failed to fetch release asset");
            match e {
                FetchError::Transient(msg) => ServiceError::StorageUnavailable(format!(
                    "Release asset could not be fetched: {}",
                    msg
                )),
                FetchError::Permanent(msg) => ServiceError::InvalidInput(format!(
                    "Release asset could not be fetched: {}",
                    msg
                )),
            }
        })?;

        let checksum = Checksum::compute(&payload);
        let mut request = PublishRequest::new(
            hook.project.clone(),
            channel,
            version,
            payload,
            checksum.as_str(),
        )
        .with_changelog(release.body.unwrap_or_default())
        .with_actor("github");
        if let Some(name) = release.name.filter(|n| !n.trim().is_empty()) {
            request = request.with_title(name);
        }

        let response = self.publisher.publish(request).await?;
        Ok(IngestOutcome::Published(response.release))
    }
}
