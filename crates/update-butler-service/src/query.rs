//! Release lookup and listing

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};
use update_butler_core::{ChannelName, ProjectName, Release, ReleaseVersion, VersionSelector};
use update_butler_db::{ReleaseCatalog, ReleasePage, ReleaseQuery};

use crate::dto::{parse_names, DownloadLinks, ListReleasesRequest, ReleaseDescriptor, ReleaseList};
use crate::error::{ServiceError, ServiceResult};
use crate::resolver::missing_release_error;
use crate::retry::{storage_retry, RetryPolicy};

/// Trait for read-only release queries
#[async_trait]
pub trait ReleaseQueryService: Send + Sync {
    /// Find a release by exact version or `latest`
    async fn find_release(
        &self,
        project: &str,
        channel: &str,
        selector: &str,
    ) -> ServiceResult<Release>;

    /// Find a release and attach its download statistics
    async fn describe_release(
        &self,
        project: &str,
        channel: &str,
        selector: &str,
    ) -> ServiceResult<ReleaseDescriptor>;

    /// List the releases of a channel
    ///
    /// Newest first, or oldest first when `since` is given.
    async fn list_releases(
        &self,
        project: &str,
        channel: &str,
        request: ListReleasesRequest,
    ) -> ServiceResult<ReleaseList>;
}

/// Default implementation of ReleaseQueryService
pub struct DefaultReleaseQueryService {
    catalog: Arc<dyn ReleaseCatalog>,
    links: DownloadLinks,
    retry: RetryPolicy,
}

impl DefaultReleaseQueryService {
    /// Create a new query service
    pub fn new(catalog: Arc<dyn ReleaseCatalog>, links: DownloadLinks, retry: RetryPolicy) -> Self {
        Self {
            catalog,
            links,
            retry,
        }
    }

    /// Fail with the right not-found error unless the channel exists
    async fn require_channel(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> ServiceResult<()> {
        let existing = storage_retry(&self.retry, "get_channel", || {
            self.catalog.get_channel(project, channel)
        })
        .await?;

        match existing {
            Some(_) => Ok(()),
            None => {
                Err(missing_release_error(self.catalog.as_ref(), &self.retry, project, channel)
                    .await)
            }
        }
    }

    fn build_query(
        project: ProjectName,
        channel: ChannelName,
        request: &ListReleasesRequest,
    ) -> ReleaseQuery {
        let mut query =
            ReleaseQuery::new(project, channel).include_deprecated(request.include_deprecated);
        if let Some(limit) = request.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = request.offset {
            query = query.offset(offset);
        }
        query
    }
}

fn into_list(page: ReleasePage) -> ReleaseList {
    let has_more = page.has_more();
    ReleaseList {
        releases: page.releases,
        total: page.total,
        offset: page.offset,
        limit: page.limit,
        has_more,
    }
}

#[async_trait]
impl ReleaseQueryService for DefaultReleaseQueryService {
    #[instrument(skip(self))]
    async fn find_release(
        &self,
        project: &str,
        channel: &str,
        selector: &str,
    ) -> ServiceResult<Release> {
        let (project, channel) = parse_names(project, channel)?;
        let selector = VersionSelector::parse(selector)?;

        let found = match &selector {
            VersionSelector::Latest => {
                storage_retry(&self.retry, "get_latest_active", || {
                    self.catalog.get_latest_active(&project, &channel)
                })
                .await?
            }
            VersionSelector::Exact(version) => {
                storage_retry(&self.retry, "get_by_version", || {
                    self.catalog.get_by_version(&project, &channel, version)
                })
                .await?
            }
        };

        if let Some(release) = found {
            return Ok(release);
        }

        let missing =
            missing_release_error(self.catalog.as_ref(), &self.retry, &project, &channel).await;
        Err(match (missing, selector) {
            (ServiceError::NoReleaseFound { .. }, VersionSelector::Exact(version)) => {
                ServiceError::ReleaseNotFound(format!("{}/{}@{}", project, channel, version))
            }
            (other, _) => other,
        })
    }

    #[instrument(skip(self))]
    async fn describe_release(
        &self,
        project: &str,
        channel: &str,
        selector: &str,
    ) -> ServiceResult<ReleaseDescriptor> {
        let release = self.find_release(project, channel, selector).await?;
        let download_count = storage_retry(&self.retry, "download_count", || {
            self.catalog.download_count(&release.id)
        })
        .await?;
        let download_url = self.links.release_download(&release);

        Ok(ReleaseDescriptor {
            release,
            download_count,
            download_url,
        })
    }

    #[instrument(skip(self, request))]
    async fn list_releases(
        &self,
        project: &str,
        channel: &str,
        request: ListReleasesRequest,
    ) -> ServiceResult<ReleaseList> {
        let (project, channel) = parse_names(project, channel)?;
        self.require_channel(&project, &channel).await?;

        let page = match &request.since {
            Some(since) => {
                let since = ReleaseVersion::parse(since)?;
                let ascending = storage_retry(&self.retry, "list_since", || {
                    self.catalog.list_since(&project, &channel, &since)
                })
                .await?;
                Self::build_query(project, channel, &request).paginate(ascending)
            }
            None => {
                let query = Self::build_query(project, channel, &request);
                storage_retry(&self.retry, "list_releases", || self.catalog.list_releases(&query))
                    .await?
            }
        };

        debug!(returned = page.releases.len(), total = page.total, "Listed releases");
        Ok(into_list(page))
    }
}
