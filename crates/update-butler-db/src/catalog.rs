//! Release catalog trait
//!
//! The catalog is the source of truth for which releases exist. It stores
//! release metadata only; artifact bytes live in an
//! [`ArtifactStore`](crate::ArtifactStore).
//!
//! Uniqueness of `(project, channel, version)` is enforced by the catalog
//! itself, so concurrent appends of the same triple can never both succeed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use update_butler_core::{
    Channel, ChannelName, ChannelPolicy, Project, ProjectName, PublishMode, Release, ReleaseId,
    ReleaseVersion,
};

use crate::error::DbResult;

/// Default page size for release listings
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Maximum page size for release listings
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Query parameters for listing a channel's releases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseQuery {
    /// Project to list
    pub project: ProjectName,

    /// Channel to list
    pub channel: ChannelName,

    /// Include deprecated releases
    pub include_deprecated: bool,

    /// Maximum results
    pub limit: i64,

    /// Number of results to skip
    pub offset: i64,
}

impl ReleaseQuery {
    /// Query for every release in a channel, newest first
    pub fn new(project: ProjectName, channel: ChannelName) -> Self {
        Self {
            project,
            channel,
            include_deprecated: true,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }

    /// Include or exclude deprecated releases
    pub fn include_deprecated(mut self, include: bool) -> Self {
        self.include_deprecated = include;
        self
    }

    /// Set the page limit, clamped to `1..=MAX_PAGE_LIMIT`
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    /// Set the page offset
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset.max(0);
        self
    }

    /// Apply the window to an already ordered list
    pub fn paginate(&self, ordered: Vec<Release>) -> ReleasePage {
        let visible: Vec<Release> = ordered
            .into_iter()
            .filter(|r| self.include_deprecated || !r.deprecated)
            .collect();
        let total = visible.len() as i64;
        let releases = visible
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect::<Vec<_>>();

        ReleasePage {
            releases,
            total,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

/// A page of releases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePage {
    /// Releases in this page, newest first
    pub releases: Vec<Release>,

    /// Number of releases matching the query
    pub total: i64,

    /// Offset of this page
    pub offset: i64,

    /// Limit used for this page
    pub limit: i64,
}

impl ReleasePage {
    /// Whether more releases follow this page
    pub fn has_more(&self) -> bool {
        self.offset + (self.releases.len() as i64) < self.total
    }
}

/// Durable, queryable release catalog
///
/// All implementations must be thread-safe; a single catalog instance is
/// shared by every request handler.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ReleaseCatalog: Send + Sync {
    /// Create the project and channel if they do not exist yet
    ///
    /// The policy is only recorded when the channel is created; an existing
    /// channel keeps the policy it was created with.
    ///
    /// # Returns
    /// The stored channel
    async fn ensure_channel(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        policy: ChannelPolicy,
    ) -> DbResult<Channel>;

    /// Look up a project
    async fn get_project(&self, project: &ProjectName) -> DbResult<Option<Project>>;

    /// Look up a channel
    async fn get_channel(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Channel>>;

    /// Greatest version in the channel, deprecated releases included
    ///
    /// # Returns
    /// `None` when the channel has no releases
    async fn get_latest(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Release>>;

    /// Greatest non-deprecated version in the channel
    ///
    /// Falls back to [`ReleaseCatalog::get_latest`] when every release is
    /// deprecated.
    async fn get_latest_active(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Release>>;

    /// Release with exactly this version
    async fn get_by_version(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Option<Release>>;

    /// Releases strictly newer than `version`, in ascending version order
    async fn list_since(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Vec<Release>>;

    /// Page through a channel's releases, newest first
    async fn list_releases(&self, query: &ReleaseQuery) -> DbResult<ReleasePage>;

    /// Atomically append a release to its channel
    ///
    /// # Arguments
    /// * `release` - The release to commit; its channel must exist
    /// * `mode` - With [`PublishMode::Monotonic`] the version must be greater
    ///   than the channel's current latest at commit time
    ///
    /// # Errors
    /// * `DbError::AlreadyExists` if the version is already in the channel
    /// * `DbError::OutOfOrder` if a monotonic append is not newer than latest
    /// * `DbError::NotFound` if the channel does not exist
    async fn append(&self, release: Release, mode: PublishMode) -> DbResult<Release>;

    /// Flag a release as deprecated
    ///
    /// Deprecating an already deprecated release is a no-op.
    async fn deprecate(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Release>;

    /// Increment a release's download counter and return the new count
    async fn record_download(&self, release_id: &ReleaseId) -> DbResult<u64>;

    /// Current download counter of a release
    async fn download_count(&self, release_id: &ReleaseId) -> DbResult<u64>;

    /// Check that the backing store is reachable
    async fn health_check(&self) -> DbResult<()>;
}
