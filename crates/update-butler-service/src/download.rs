//! Artifact downloads
//!
//! Bytes are re-verified against their checksum on every read. A mismatch
//! is treated as storage corruption: it is logged and the request fails
//! instead of serving the bytes.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use update_butler_core::{Checksum, ContentRef, Release, ReleaseVersion, VersionSelector};
use update_butler_db::{ArtifactStore, ReleaseCatalog};

use crate::dto::{parse_names, ArtifactDownload, ReleaseDownload};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::ServiceMetrics;
use crate::resolver::missing_release_error;
use crate::retry::{storage_retry, RetryPolicy};

/// Trait for serving artifact bytes
#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Fetch verified bytes by content reference
    async fn download_artifact(&self, reference: &str) -> ServiceResult<ArtifactDownload>;

    /// Fetch the verified artifact of a release and count the download
    ///
    /// `selector` is an exact version or `latest`.
    async fn download_release(
        &self,
        project: &str,
        channel: &str,
        selector: &str,
    ) -> ServiceResult<ReleaseDownload>;
}

/// Default implementation of DownloadService
pub struct DefaultDownloadService {
    catalog: Arc<dyn ReleaseCatalog>,
    artifacts: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
    metrics: ServiceMetrics,
}

impl DefaultDownloadService {
    /// Create a new download service
    pub fn new(
        catalog: Arc<dyn ReleaseCatalog>,
        artifacts: Arc<dyn ArtifactStore>,
        retry: RetryPolicy,
        metrics: ServiceMetrics,
    ) -> Self {
        Self {
            catalog,
            artifacts,
            retry,
            metrics,
        }
    }

    /// Read bytes and check them against `expected`
    async fn read_verified(
        &self,
        reference: &ContentRef,
        expected: &Checksum,
    ) -> ServiceResult<Vec<u8>> {
        let bytes = storage_retry(&self.retry, "artifact_get", || self.artifacts.get(reference))
            .await
            .map_err(|e| match e {
                ServiceError::ReleaseNotFound(_) => {
                    ServiceError::ArtifactNotFound(reference.to_string())
                }
                other => other,
            })?;

        let actual = Checksum::compute(&bytes);
        if actual != *expected {
            error!(
                reference = %reference,
                expected = %expected,
                actual = %actual,
                "Stored artifact failed integrity check"
            );
            return Err(ServiceError::StorageUnavailable(format!(
                "Artifact {} failed integrity verification",
                reference
            )));
        }

        Ok(bytes)
    }

    async fn select_release(
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

        match found {
            Some(release) => Ok(release),
            None => {
                let missing =
                    missing_release_error(self.catalog.as_ref(), &self.retry, &project, &channel)
                        .await;
                Err(match (missing, &selector) {
                    (ServiceError::NoReleaseFound { .. }, VersionSelector::Exact(version)) => {
                        release_not_found(&project.to_string(), &channel.to_string(), version)
                    }
                    (other, _) => other,
                })
            }
        }
    }

    async fn download_release_inner(
        &self,
        project: &str,
        channel: &str,
        selector: &str,
    ) -> ServiceResult<ReleaseDownload> {
        let release = self.select_release(project, channel, selector).await?;
        let bytes = self
            .read_verified(&release.content_ref, &release.checksum)
            .await?;

        let download_count = match self.catalog.record_download(&release.id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(release = %release.coordinates(), error = %e, "Failed to record download");
                0
            }
        };

        Ok(ReleaseDownload {
            release,
            bytes,
            download_count,
        })
    }
}

fn release_not_found(project: &str, channel: &str, version: &ReleaseVersion) -> ServiceError {
    ServiceError::ReleaseNotFound(format!("{}/{}@{}", project, channel, version))
}

fn outcome_of<T>(result: &ServiceResult<T>) -> &'static str {
    match result {
        Ok(_) => "served",
        Err(e) if e.is_not_found() => "not_found",
        Err(ServiceError::StorageUnavailable(_)) => "unavailable",
        Err(_) => "rejected",
    }
}

#[async_trait]
impl DownloadService for DefaultDownloadService {
    #[instrument(skip(self))]
    async fn download_artifact(&self, reference: &str) -> ServiceResult<ArtifactDownload> {
        let result: ServiceResult<ArtifactDownload> = async {
            let content_ref = ContentRef::parse(reference)?;
            let checksum = content_ref.checksum();
            let bytes = self.read_verified(&content_ref, &checksum).await?;
            Ok::<_, ServiceError>(ArtifactDownload {
                content_ref,
                checksum,
                bytes,
            })
        }
        .await;

        self.metrics.record_download(outcome_of(&result));
        if let Ok(download) = &result {
            debug!(size = download.bytes.len(), "Serving artifact");
        }
        result
    }

    #[instrument(skip(self))]
    async fn download_release(
        &self,
        project: &str,
        channel: &str,
        selector: &str,
    ) -> ServiceResult<ReleaseDownload> {
        let result = self.download_release_inner(project, channel, selector).await;

        self.metrics.record_download(outcome_of(&result));
        if let Ok(download) = &result {
            debug!(
                release = %download.release.coordinates(),
                downloads = download.download_count,
                "Serving release artifact"
            );
        }
        result
    }
}
