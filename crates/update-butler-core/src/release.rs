//! Release records
//!
//! A [`Release`] binds a version in a channel to exactly one artifact. It is
//! immutable once published: corrections are new releases, and the only
//! state that may change afterwards is the `deprecated` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checksum::{Checksum, ContentRef};
use crate::error::{ButlerError, Result};
use crate::types::{ChannelName, ProjectName, ReleaseId};
use crate::version::ReleaseVersion;

/// Maximum length of a release title
pub const MAX_TITLE_LENGTH: usize = 256;

/// Maximum length of a changelog
pub const MAX_CHANGELOG_LENGTH: usize = 64 * 1024;

/// A published release within a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Unique release identifier
    pub id: ReleaseId,

    /// Owning project
    pub project: ProjectName,

    /// Owning channel
    pub channel: ChannelName,

    /// Semantic version, unique within the channel
    pub version: ReleaseVersion,

    /// Optional human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Changelog / patch notes
    #[serde(default)]
    pub changelog: String,

    /// SHA-256 checksum of the artifact bytes
    pub checksum: Checksum,

    /// Storage key of the artifact
    pub content_ref: ContentRef,

    /// Artifact size in bytes
    pub size_bytes: u64,

    /// When the release was committed
    pub published_at: DateTime<Utc>,

    /// Whether the release has been deprecated
    #[serde(default)]
    pub deprecated: bool,
}

impl Release {
    /// Start building a release
    pub fn builder(
        project: ProjectName,
        channel: ChannelName,
        version: ReleaseVersion,
        checksum: Checksum,
        size_bytes: u64,
    ) -> ReleaseBuilder {
        ReleaseBuilder::new(project, channel, version, checksum, size_bytes)
    }

    /// Whether this release is newer than `version`
    pub fn is_newer_than(&self, version: &ReleaseVersion) -> bool {
        self.version > *version
    }

    /// `project/channel@version` coordinates for logs and messages
    pub fn coordinates(&self) -> String {
        format!("{}/{}@{}", self.project, self.channel, self.version)
    }

    /// Title if present, otherwise the version string
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| self.version.to_string())
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coordinates())
    }
}

/// Builder for [`Release`]
#[derive(Debug, Clone)]
pub struct ReleaseBuilder {
    id: ReleaseId,
    project: ProjectName,
    channel: ChannelName,
    version: ReleaseVersion,
    title: Option<String>,
    changelog: String,
    checksum: Checksum,
    size_bytes: u64,
    published_at: DateTime<Utc>,
    deprecated: bool,
}

impl ReleaseBuilder {
    /// Create a new builder
    pub fn new(
        project: ProjectName,
        channel: ChannelName,
        version: ReleaseVersion,
        checksum: Checksum,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: ReleaseId::new(),
            project,
            channel,
            version,
            title: None,
            changelog: String::new(),
            checksum,
            size_bytes,
            published_at: Utc::now(),
            deprecated: false,
        }
    }

    /// Set the release ID
    pub fn id(mut self, id: ReleaseId) -> Self {
        self.id = id;
        self
    }

    /// Set the title, ignoring blank values
    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self
    }

    /// Set the changelog
    pub fn changelog(mut self, changelog: impl Into<String>) -> Self {
        self.changelog = changelog.into();
        self
    }

    /// Set the publish timestamp
    pub fn published_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.published_at = timestamp;
        self
    }

    /// Set the deprecation flag
    pub fn deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = deprecated;
        self
    }

    /// Build the release with validation
    pub fn build(self) -> Result<Release> {
        if let Some(title) = &self.title {
            if title.len() > MAX_TITLE_LENGTH {
                return Err(ButlerError::ValidationError(format!(
                    "Release title exceeds {} characters",
                    MAX_TITLE_LENGTH
                )));
            }
        }

        if self.changelog.len() > MAX_CHANGELOG_LENGTH {
            return Err(ButlerError::ValidationError(format!(
                "Changelog exceeds {} bytes",
                MAX_CHANGELOG_LENGTH
            )));
        }

        let content_ref = ContentRef::for_checksum(&self.checksum);

        Ok(Release {
            id: self.id,
            project: self.project,
            channel: self.channel,
            version: self.version,
            title: self.title,
            changelog: self.changelog,
            checksum: self.checksum,
            content_ref,
            size_bytes: self.size_bytes,
            published_at: self.published_at,
            deprecated: self.deprecated,
        })
    }
}
