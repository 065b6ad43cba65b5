//! Publish pipeline
//!
//! Every publish attempt walks `Received -> Validated -> Stored -> Committed`
//! or ends in `Rejected`. All validation happens before anything is written.
//! Artifact bytes are stored before the catalog append, so a committed
//! release never points at missing bytes; a failure between the two steps
//! leaves an orphaned artifact that the next identical publish reuses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use update_butler_core::{
    Channel, ChannelName, ChannelPolicy, ChannelPolicyTable, Checksum, ProjectName, PublishMode,
    Release, ReleaseEvent, ReleaseVersion,
};
use update_butler_db::{ArtifactStore, ReleaseCatalog};

use crate::dto::{parse_names, PublishRequest, PublishResponse};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::ServiceMetrics;
use crate::notification::NotificationDispatcher;
use crate::resolver::missing_release_error;
use crate::retry::{storage_retry, RetryPolicy};

/// Default maximum artifact size (256 MiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;

/// State of a single publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    /// Request accepted for processing
    Received,
    /// All validation checks passed
    Validated,
    /// Artifact bytes are durable in the artifact store
    Stored,
    /// Release appended to the catalog
    Committed,
    /// Attempt failed
    Rejected,
}

impl PublishState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: PublishState) -> bool {
        use PublishState::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Validated, Stored)
                | (Stored, Committed)
                | (Received, Rejected)
                | (Validated, Rejected)
                | (Stored, Rejected)
        )
    }

    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, PublishState::Committed | PublishState::Rejected)
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishState::Received => "received",
            PublishState::Validated => "validated",
            PublishState::Stored => "stored",
            PublishState::Committed => "committed",
            PublishState::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

/// Tracks the state of one publish attempt
#[derive(Debug)]
pub struct PublishAttempt {
    coordinates: String,
    state: PublishState,
}

impl PublishAttempt {
    /// Start an attempt in the `Received` state
    pub fn new(coordinates: impl Into<String>) -> Self {
        Self {
            coordinates: coordinates.into(),
            state: PublishState::Received,
        }
    }

    /// Current state
    pub fn state(&self) -> PublishState {
        self.state
    }

    /// Move to the next state
    pub fn advance(&mut self, next: PublishState) -> ServiceResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ServiceError::Internal(format!(
                "Invalid publish transition {} -> {} for {}",
                self.state, next, self.coordinates
            )));
        }
        debug!(release = %self.coordinates, from = %self.state, to = %next, "Publish state change");
        self.state = next;
        Ok(())
    }

    /// Move to `Rejected` and hand back the error
    pub fn reject(&mut self, error: ServiceError) -> ServiceError {
        if !self.state.is_terminal() {
            self.state = PublishState::Rejected;
        }
        warn!(release = %self.coordinates, error = %error, "Publish rejected");
        error
    }
}

/// Limits applied to publish requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishLimits {
    /// Maximum artifact size in bytes
    pub max_payload_bytes: u64,
}

impl Default for PublishLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Trait for publishing and deprecating releases
#[async_trait]
pub trait PublishService: Send + Sync {
    /// Validate and commit a new release
    async fn publish(&self, request: PublishRequest) -> ServiceResult<PublishResponse>;

    /// Flag a published release as deprecated
    async fn deprecate(
        &self,
        project: &str,
        channel: &str,
        version: &str,
        actor: Option<String>,
    ) -> ServiceResult<Release>;
}

/// A publish request that passed every check; `release` is ready to append
struct ValidatedPublish {
    release: Release,
    policy: ChannelPolicy,
    mode: PublishMode,
}

/// Default implementation of PublishService
pub struct DefaultPublishService {
    catalog: Arc<dyn ReleaseCatalog>,
    artifacts: Arc<dyn ArtifactStore>,
    dispatcher: Arc<NotificationDispatcher>,
    policies: ChannelPolicyTable,
    limits: PublishLimits,
    retry: RetryPolicy,
    metrics: ServiceMetrics,
}

impl DefaultPublishService {
    /// Create a new publish service
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn ReleaseCatalog>,
        artifacts: Arc<dyn ArtifactStore>,
        dispatcher: Arc<NotificationDispatcher>,
        policies: ChannelPolicyTable,
        limits: PublishLimits,
        retry: RetryPolicy,
        metrics: ServiceMetrics,
    ) -> Self {
        Self {
            catalog,
            artifacts,
            dispatcher,
            policies,
            limits,
            retry,
            metrics,
        }
    }

    /// Run every check that does not need to write anything
    async fn validate(&self, request: &PublishRequest) -> ServiceResult<ValidatedPublish> {
        let (project, channel) = parse_names(&request.project, &request.channel)?;
        let version = ReleaseVersion::parse(&request.version)?;

        if request.payload.is_empty() {
            return Err(ServiceError::InvalidInput("Payload cannot be empty".to_string()));
        }
        if request.payload.len() as u64 > self.limits.max_payload_bytes {
            return Err(ServiceError::InvalidInput(format!(
                "Payload of {} bytes exceeds the {} byte limit",
                request.payload.len(),
                self.limits.max_payload_bytes
            )));
        }

        let checksum = Checksum::parse(&request.checksum)?;
        checksum.verify(&request.payload)?;

        // Title and changelog limits are enforced by the builder
        let release = Release::builder(
            project.clone(),
            channel.clone(),
            version.clone(),
            checksum,
            request.payload.len() as u64,
        )
        .title(request.title.clone())
        .changelog(request.changelog.clone())
        .build()?;

        let existing: Option<Channel> = storage_retry(&self.retry, "get_channel", || {
            self.catalog.get_channel(&project, &channel)
        })
        .await?;
        let policy = existing
            .map(|c| c.policy)
            .unwrap_or_else(|| self.policies.policy_for(&channel));

        if !policy.permits(&version) {
            return Err(ServiceError::PolicyViolation(format!(
                "Channel {}/{} does not accept pre-release version {}",
                project, channel, version
            )));
        }

        let mode = if request.backfill {
            if !policy.allows_backfill() {
                return Err(ServiceError::PolicyViolation(format!(
                    "Channel {}/{} does not permit backfill",
                    project, channel
                )));
            }
            PublishMode::Backfill
        } else {
            PublishMode::Monotonic
        };

        self.check_ordering(&project, &channel, &version, mode).await?;

        Ok(ValidatedPublish {
            release,
            policy,
            mode,
        })
    }

    /// Reject duplicates, and versions older than latest when monotonic
    async fn check_ordering(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
        mode: PublishMode,
    ) -> ServiceResult<()> {
        match mode {
            PublishMode::Monotonic => {
                let latest = storage_retry(&self.retry, "get_latest", || {
                    self.catalog.get_latest(project, channel)
                })
                .await?;

                if let Some(latest) = latest {
                    if *version == latest.version {
                        return Err(ServiceError::VersionConflict(format!(
                            "{} already exists",
                            latest.coordinates()
                        )));
                    }
                    if *version < latest.version {
                        return Err(ServiceError::VersionConflict(format!(
                            "{} is not newer than latest {}",
                            version, latest.version
                        )));
                    }
                }
            }
            PublishMode::Backfill => {
                let existing = storage_retry(&self.retry, "get_by_version", || {
                    self.catalog.get_by_version(project, channel, version)
                })
                .await?;

                if let Some(existing) = existing {
                    return Err(ServiceError::VersionConflict(format!(
                        "{} already exists",
                        existing.coordinates()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Append to the catalog, treating our own earlier commit as success
    async fn commit(&self, release: Release, mode: PublishMode) -> ServiceResult<Release> {
        let result = storage_retry(&self.retry, "append", || {
            self.catalog.append(release.clone(), mode)
        })
        .await;

        match result {
            Ok(committed) => Ok(committed),
            Err(ServiceError::VersionConflict(msg)) => {
                // A retried append may have committed on an earlier attempt
                let stored = self
                    .catalog
                    .get_by_version(&release.project, &release.channel, &release.version)
                    .await
                    .map_err(ServiceError::from)?;
                match stored {
                    Some(stored) if stored.id == release.id => Ok(stored),
                    _ => Err(ServiceError::VersionConflict(msg)),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn run(
        &self,
        request: PublishRequest,
        attempt: &mut PublishAttempt,
    ) -> ServiceResult<PublishResponse> {
        let ValidatedPublish {
            release,
            policy,
            mode,
        } = self.validate(&request).await?;
        attempt.advance(PublishState::Validated)?;

        let payload = request.payload;
        let stored =
            storage_retry(&self.retry, "artifact_put", || self.artifacts.put(&payload)).await?;
        if stored.checksum != release.checksum || stored.size_bytes != release.size_bytes {
            return Err(ServiceError::StorageUnavailable(format!(
                "Artifact store returned {} ({} bytes) for {} ({} bytes)",
                stored.checksum, stored.size_bytes, release.checksum, release.size_bytes
            )));
        }
        attempt.advance(PublishState::Stored)?;
        debug!(
            reference = %stored.content_ref,
            reused = !stored.newly_written,
            "Artifact stored"
        );

        storage_retry(&self.retry, "ensure_channel", || {
            self.catalog.ensure_channel(&release.project, &release.channel, policy)
        })
        .await?;

        let committed = self.commit(release, mode).await?;
        attempt.advance(PublishState::Committed)?;

        let mut event = ReleaseEvent::published(committed.clone());
        if let Some(actor) = request.actor {
            event = event.with_actor(actor);
        }
        self.dispatcher.notify(event);

        Ok(PublishResponse {
            release: committed,
            artifact_reused: !stored.newly_written,
        })
    }
}

#[async_trait]
impl PublishService for DefaultPublishService {
    #[instrument(
        skip(self, request),
        fields(project = %request.project, channel = %request.channel, version = %request.version)
    )]
    async fn publish(&self, request: PublishRequest) -> ServiceResult<PublishResponse> {
        let started = Instant::now();
        let mut attempt = PublishAttempt::new(format!(
            "{}/{}@{}",
            request.project, request.channel, request.version
        ));
        info!(size = request.payload.len(), backfill = request.backfill, "Publish received");

        match self.run(request, &mut attempt).await {
            Ok(response) => {
                self.metrics
                    .record_publish("committed", started.elapsed().as_secs_f64());
                info!(
                    release_id = %response.release.id,
                    checksum = %response.release.checksum,
                    "Release committed"
                );
                Ok(response)
            }
            Err(e) => {
                let outcome = if e.is_validation() { "rejected" } else { "failed" };
                self.metrics
                    .record_publish(outcome, started.elapsed().as_secs_f64());
                Err(attempt.reject(e))
            }
        }
    }

    #[instrument(skip(self, actor))]
    async fn deprecate(
        &self,
        project: &str,
        channel: &str,
        version: &str,
        actor: Option<String>,
    ) -> ServiceResult<Release> {
        let (project, channel) = parse_names(project, channel)?;
        let version = ReleaseVersion::parse(version)?;

        let existing = storage_retry(&self.retry, "get_by_version", || {
            self.catalog.get_by_version(&project, &channel, &version)
        })
        .await?;

        let existing = match existing {
            Some(release) => release,
            None => {
                let missing =
                    missing_release_error(self.catalog.as_ref(), &self.retry, &project, &channel)
                        .await;
                return Err(match missing {
                    ServiceError::NoReleaseFound { .. } => ServiceError::ReleaseNotFound(
                        format!("{}/{}@{}", project, channel, version),
                    ),
                    other => other,
                });
            }
        };

        if existing.deprecated {
            debug!("Release already deprecated");
            return Ok(existing);
        }

        let deprecated = storage_retry(&self.retry, "deprecate", || {
            self.catalog.deprecate(&project, &channel, &version)
        })
        .await
        .map_err(|e| match e {
            ServiceError::ReleaseNotFound(_) => {
                ServiceError::ReleaseNotFound(format!("{}/{}@{}", project, channel, version))
            }
            other => other,
        })?;

        info!(release = %deprecated.coordinates(), "Release deprecated");

        let mut event = ReleaseEvent::deprecated(deprecated.clone());
        if let Some(actor) = actor {
            event = event.with_actor(actor);
        }
        self.dispatcher.notify(event);

        Ok(deprecated)
    }
}
