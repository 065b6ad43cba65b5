//! Version resolution
//!
//! Maps a client's `(project, channel, current version)` to the channel's
//! latest active release and whether it is an update for that client.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};
use update_butler_core::{ChannelName, ProjectName, Release, ReleaseVersion};
use update_butler_db::ReleaseCatalog;

use crate::dto::Resolution;
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::ServiceMetrics;
use crate::retry::{storage_retry, RetryPolicy};

/// Trait for update-check resolution
#[async_trait]
pub trait VersionResolver: Send + Sync {
    /// Resolve the release a client at `client_version` should see
    ///
    /// # Errors
    /// * `UnknownProject` / `UnknownChannel` for unknown names
    /// * `NoReleaseFound` when the channel is empty
    /// * `MalformedVersion` when `client_version` is not a semantic version
    async fn resolve(
        &self,
        project: &str,
        channel: &str,
        client_version: &str,
    ) -> ServiceResult<Resolution>;
}

/// Pure resolution step: the latest release is always the candidate
pub fn resolve_against(latest: Release, client_version: &ReleaseVersion) -> Resolution {
    let update_available = latest.is_newer_than(client_version);
    Resolution {
        release: latest,
        update_available,
    }
}

/// Default implementation of VersionResolver backed by the release catalog
pub struct DefaultVersionResolver {
    catalog: Arc<dyn ReleaseCatalog>,
    retry: RetryPolicy,
    metrics: ServiceMetrics,
}

impl DefaultVersionResolver {
    /// Create a new resolver
    pub fn new(
        catalog: Arc<dyn ReleaseCatalog>,
        retry: RetryPolicy,
        metrics: ServiceMetrics,
    ) -> Self {
        Self {
            catalog,
            retry,
            metrics,
        }
    }

    async fn resolve_inner(
        &self,
        project: &str,
        channel: &str,
        client_version: &str,
    ) -> ServiceResult<Resolution> {
        // Names that fail validation cannot exist in the catalog
        let project_name = ProjectName::new(project)
            .map_err(|_| ServiceError::UnknownProject(project.to_string()))?;
        let channel_name = ChannelName::new(channel).map_err(|_| ServiceError::UnknownChannel {
            project: project.to_string(),
            channel: channel.to_string(),
        })?;
        let client_version = ReleaseVersion::parse(client_version)?;

        let latest = storage_retry(&self.retry, "get_latest_active", || {
            self.catalog.get_latest_active(&project_name, &channel_name)
        })
        .await?;

        match latest {
            Some(latest) => Ok(resolve_against(latest, &client_version)),
            None => Err(missing_release_error(
                self.catalog.as_ref(),
                &self.retry,
                &project_name,
                &channel_name,
            )
            .await),
        }
    }
}

#[async_trait]
impl VersionResolver for DefaultVersionResolver {
    #[instrument(skip(self))]
    async fn resolve(
        &self,
        project: &str,
        channel: &str,
        client_version: &str,
    ) -> ServiceResult<Resolution> {
        let result = self.resolve_inner(project, channel, client_version).await;

        let outcome = match &result {
            Ok(r) if r.update_available => "update_available",
            Ok(_) => "up_to_date",
            Err(e) if e.is_not_found() => "not_found",
            Err(ServiceError::MalformedVersion(_)) => "malformed",
            Err(_) => "failed",
        };
        self.metrics.record_resolution(outcome);

        if let Ok(resolution) = &result {
            debug!(
                latest = %resolution.release.version,
                update_available = resolution.update_available,
                "Resolved update check"
            );
        }

        result
    }
}

/// Work out why a channel yielded no release
///
/// Distinguishes an unknown project, an unknown channel and an empty channel.
pub(crate) async fn missing_release_error(
    catalog: &dyn ReleaseCatalog,
    retry: &RetryPolicy,
    project: &ProjectName,
    channel: &ChannelName,
) -> ServiceError {
    let lookup =
        storage_retry(retry, "get_channel", || catalog.get_channel(project, channel)).await;

    match lookup {
        Ok(Some(_)) => ServiceError::NoReleaseFound {
            project: project.to_string(),
            channel: channel.to_string(),
        },
        Ok(None) => {
            match storage_retry(retry, "get_project", || catalog.get_project(project)).await {
                Ok(Some(_)) => ServiceError::UnknownChannel {
                    project: project.to_string(),
                    channel: channel.to_string(),
                },
                Ok(None) => ServiceError::UnknownProject(project.to_string()),
                Err(e) => e,
            }
        }
        Err(e) => e,
    }
}
