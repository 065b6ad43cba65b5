//! Data Transfer Objects (DTOs) for the service layer
//!
//! Request and response types used at service boundaries, separating the
//! domain models from the shapes the HTTP layer exchanges with clients.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use update_butler_core::{
    ChannelName, Checksum, ContentRef, ProjectName, Release, ReleaseId, ReleaseVersion,
};

use crate::error::{ServiceError, ServiceResult};

// ============================================================================
// Publish DTOs
// ============================================================================

/// Request to publish a new release
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Project name
    pub project: String,

    /// Channel name
    pub channel: String,

    /// Version string
    pub version: String,

    /// Artifact bytes
    pub payload: Vec<u8>,

    /// Publisher-supplied SHA-256 of the payload
    pub checksum: String,

    /// Changelog / patch notes
    pub changelog: String,

    /// Optional human title
    pub title: Option<String>,

    /// Ask for out-of-order insertion
    pub backfill: bool,

    /// Who published the release
    pub actor: Option<String>,
}

impl PublishRequest {
    /// Create a request with an empty changelog
    pub fn new(
        project: impl Into<String>,
        channel: impl Into<String>,
        version: impl Into<String>,
        payload: Vec<u8>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            channel: channel.into(),
            version: version.into(),
            payload,
            checksum: checksum.into(),
            changelog: String::new(),
            title: None,
            backfill: false,
            actor: None,
        }
    }

    /// Set the changelog
    pub fn with_changelog(mut self, changelog: impl Into<String>) -> Self {
        self.changelog = changelog.into();
        self
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Request backfill mode
    pub fn with_backfill(mut self, backfill: bool) -> Self {
        self.backfill = backfill;
        self
    }

    /// Set the publishing actor
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Response from publishing a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    /// The committed release
    pub release: Release,

    /// Whether identical bytes were already in the artifact store
    pub artifact_reused: bool,
}

/// Decode a base64 publish payload
pub fn decode_payload(encoded: &str) -> ServiceResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ServiceError::InvalidInput(format!("Payload is not valid base64: {}", e)))
}

/// Encode bytes as a base64 publish payload
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

// ============================================================================
// Resolution DTOs
// ============================================================================

/// Outcome of resolving a client's update check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Latest release of the channel
    pub release: Release,

    /// Whether the release is newer than the client's version
    pub update_available: bool,
}

/// Update check answer as returned to polling clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    /// Whether a newer release is available
    pub available: bool,

    /// Version of the candidate release
    pub version: ReleaseVersion,

    /// SHA-256 of the candidate artifact
    pub checksum: Checksum,

    /// Content reference for `GET /v1/artifacts/{reference}`
    pub download_reference: ContentRef,

    /// Download link for the candidate release
    pub download_url: String,

    /// Changelog of the candidate release
    pub changelog: String,

    /// Title of the candidate release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Artifact size in bytes
    pub size_bytes: u64,

    /// When the candidate was published
    pub published_at: DateTime<Utc>,
}

impl UpdateCheck {
    /// Build the client answer from a resolution
    pub fn from_resolution(resolution: Resolution, links: &DownloadLinks) -> Self {
        let download_url = links.release_download(&resolution.release);
        let release = resolution.release;

        Self {
            available: resolution.update_available,
            version: release.version,
            checksum: release.checksum,
            download_reference: release.content_ref,
            download_url,
            changelog: release.changelog,
            title: release.title,
            size_bytes: release.size_bytes,
            published_at: release.published_at,
        }
    }
}

// ============================================================================
// Release query DTOs
// ============================================================================

/// Release metadata together with its download statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Release metadata
    #[serde(flatten)]
    pub release: Release,

    /// Number of downloads by version
    pub download_count: u64,

    /// Download link
    pub download_url: String,
}

/// Parameters for listing releases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListReleasesRequest {
    /// Only include releases newer than this version, oldest first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,

    /// Include deprecated releases
    #[serde(default = "default_include_deprecated")]
    pub include_deprecated: bool,

    /// Maximum results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    /// Results to skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

fn default_include_deprecated() -> bool {
    true
}

impl Default for ListReleasesRequest {
    fn default() -> Self {
        Self {
            since: None,
            include_deprecated: default_include_deprecated(),
            limit: None,
            offset: None,
        }
    }
}

/// A list of releases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseList {
    /// Releases in this page
    pub releases: Vec<Release>,

    /// Total number of matching releases
    pub total: i64,

    /// Offset of this page
    pub offset: i64,

    /// Limit used for this page
    pub limit: i64,

    /// Whether more releases follow
    pub has_more: bool,
}

// ============================================================================
// Download DTOs
// ============================================================================

/// Verified artifact bytes
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    /// Storage key
    pub content_ref: ContentRef,

    /// SHA-256 of the bytes
    pub checksum: Checksum,

    /// Artifact bytes
    pub bytes: Vec<u8>,
}

/// Verified release artifact
#[derive(Debug, Clone)]
pub struct ReleaseDownload {
    /// Release that was downloaded
    pub release: Release,

    /// Artifact bytes
    pub bytes: Vec<u8>,

    /// Download counter after this download
    pub download_count: u64,
}

impl ReleaseDownload {
    /// File name suggested to clients
    pub fn file_name(&self) -> String {
        format!("{}-{}.bin", self.release.project, self.release.version)
    }
}

// ============================================================================
// Health DTOs
// ============================================================================

/// Health of a single backing component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Whether the component responded
    pub healthy: bool,

    /// Failure detail for operators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    /// A healthy component
    pub fn up() -> Self {
        Self {
            healthy: true,
            message: None,
        }
    }

    /// An unhealthy component
    pub fn down(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
        }
    }
}

/// Health of the backing stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Release catalog
    pub catalog: ComponentHealth,

    /// Artifact store
    pub artifacts: ComponentHealth,
}

impl HealthReport {
    /// Whether every component is healthy
    pub fn is_healthy(&self) -> bool {
        self.catalog.healthy && self.artifacts.healthy
    }
}

// ============================================================================
// Links
// ============================================================================

/// Builds public download links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLinks {
    base_url: String,
}

impl DownloadLinks {
    /// Links relative to `base_url` (e.g. `https://updates.example.com`)
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Link to download a specific release
    pub fn release_download(&self, release: &Release) -> String {
        format!(
            "{}/v1/projects/{}/channels/{}/releases/{}/download",
            self.base_url, release.project, release.channel, release.version
        )
    }

    /// Link to fetch an artifact by content reference
    pub fn artifact(&self, reference: &ContentRef) -> String {
        format!("{}/v1/artifacts/{}", self.base_url, reference)
    }
}

impl Default for DownloadLinks {
    fn default() -> Self {
        Self::new("")
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Validate project and channel names from caller input
pub fn parse_names(project: &str, channel: &str) -> ServiceResult<(ProjectName, ChannelName)> {
    Ok((ProjectName::new(project)?, ChannelName::new(channel)?))
}

/// Parse a release id from caller input
pub fn parse_release_id(value: &str) -> ServiceResult<ReleaseId> {
    ReleaseId::from_string(value).map_err(ServiceError::InvalidInput)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release() -> Release {
        Release::builder(
            ProjectName::new("demo").unwrap(),
            ChannelName::new("stable").unwrap(),
            ReleaseVersion::parse("1.0.0").unwrap(),
            Checksum::compute(b"P1"),
            2,
        )
        .changelog("First")
        .build()
        .unwrap()
    }

    #[test]
    fn test_payload_base64() {
        let encoded = encode_payload(b"binary\x00data");
        assert_eq!(decode_payload(&encoded).unwrap(), b"binary\x00data");
        assert!(decode_payload("not base64!!").is_err());
    }

    #[test]
    fn test_links() {
        let links = DownloadLinks::new("https://updates.example.com/");
        assert_eq!(
            links.release_download(&release()),
            "https://updates.example.com/v1/projects/demo/channels/stable/releases/1.0.0/download"
        );
    }

    #[test]
    fn test_update_check_from_resolution() {
        let release = release();
        let check = UpdateCheck::from_resolution(
            Resolution {
                release: release.clone(),
                update_available: true,
            },
            &DownloadLinks::default(),
        );

        assert!(check.available);
        assert_eq!(check.checksum, release.checksum);
        assert_eq!(check.download_reference, release.content_ref);
        assert_eq!(check.changelog, "First");

        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["version"], "1.0.0");
        assert!(json.get("title").is_none());
    }

    #[test]
    fn test_parse_names() {
        assert!(parse_names("demo", "stable").is_ok());
        assert!(matches!(
            parse_names("Demo Project", "stable"),
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
