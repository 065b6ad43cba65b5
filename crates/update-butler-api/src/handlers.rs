//! Route handlers
//!
//! Handlers parse the path and query, call one service from the registry and
//! wrap the result. Download handlers stream raw bytes with checksum headers.

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use update_butler_core::{Checksum, Release};
use update_butler_service::{
    decode_payload, IngestOutcome, ListReleasesRequest, PublishRequest, PublishResponse,
    ReleaseDescriptor, ServiceRegistry, UpdateCheck,
};

use crate::{
    auth::Publisher,
    error::{ApiError, ApiResult},
    responses::{created, ok, ApiResponse, HealthResponse, PaginatedResponse},
};

/// Header carrying the SHA-256 of served artifact bytes
pub const CHECKSUM_HEADER: &str = "x-checksum-sha256";

/// Header carrying the release download counter
pub const DOWNLOAD_COUNT_HEADER: &str = "x-download-count";

/// Header naming the GitHub webhook event type
pub const GITHUB_EVENT_HEADER: &str = "x-github-event";

/// Prometheus text exposition content type
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Router state; cloning shares the same registry
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<ServiceRegistry>,
}

impl AppState {
    pub fn new(services: ServiceRegistry) -> Self {
        Self {
            services: Arc::new(services),
        }
    }
}

// ============================================================================
// Update checks
// ============================================================================

/// Query parameters of an update check
#[derive(Debug, Deserialize)]
pub struct CheckUpdateParams {
    /// Project name
    pub project: String,

    /// Channel name
    pub channel: String,

    /// Version the client currently runs
    pub version: String,
}

/// Answer a client's update check
#[instrument(skip(state))]
pub async fn check_update(
    State(state): State<AppState>,
    Query(params): Query<CheckUpdateParams>,
) -> ApiResult<Json<ApiResponse<UpdateCheck>>> {
    debug!(
        "Update check for {}/{} from {}",
        params.project, params.channel, params.version
    );

    let resolution = state
        .services
        .resolver
        .resolve(&params.project, &params.channel, &params.version)
        .await?;

    let check = UpdateCheck::from_resolution(resolution, &state.services.links);
    Ok(Json(ok(check)))
}

// ============================================================================
// Releases
// ============================================================================

/// Body of a publish request
#[derive(Debug, Deserialize)]
pub struct PublishReleaseBody {
    /// Version string
    pub version: String,

    /// SHA-256 of the payload
    pub checksum: String,

    /// Changelog / patch notes
    #[serde(default)]
    pub changelog: String,

    /// Optional human title
    #[serde(default)]
    pub title: Option<String>,

    /// Ask for out-of-order insertion
    #[serde(default)]
    pub backfill: bool,

    /// Artifact bytes, base64-encoded
    pub payload: String,
}

/// Publish a new release
#[instrument(skip(state, body))]
pub async fn publish_release(
    State(state): State<AppState>,
    Path((project, channel)): Path<(String, String)>,
    Extension(publisher): Extension<Publisher>,
    Json(body): Json<PublishReleaseBody>,
) -> ApiResult<(StatusCode, Json<ApiResponse<PublishResponse>>)> {
    info!("Publishing {}/{}@{}", project, channel, body.version);

    let payload = decode_payload(&body.payload)?;

    let mut request = PublishRequest::new(project, channel, body.version, payload, body.checksum)
        .with_changelog(body.changelog)
        .with_backfill(body.backfill)
        .with_actor(publisher.actor());
    if let Some(title) = body.title {
        request = request.with_title(title);
    }

    let response = state.services.publisher.publish(request).await?;

    Ok(created(response))
}

/// Get a release by version or `latest`
#[instrument(skip(state))]
pub async fn get_release(
    State(state): State<AppState>,
    Path((project, channel, version)): Path<(String, String, String)>,
) -> ApiResult<Json<ApiResponse<ReleaseDescriptor>>> {
    debug!("Getting release {}/{}@{}", project, channel, version);

    let descriptor = state
        .services
        .releases
        .describe_release(&project, &channel, &version)
        .await?;

    Ok(Json(ok(descriptor)))
}

/// List the releases of a channel
#[instrument(skip(state))]
pub async fn list_releases(
    State(state): State<AppState>,
    Path((project, channel)): Path<(String, String)>,
    Query(request): Query<ListReleasesRequest>,
) -> ApiResult<PaginatedResponse<Release>> {
    debug!("Listing releases of {}/{}", project, channel);

    let list = state
        .services
        .releases
        .list_releases(&project, &channel, request)
        .await?;

    Ok(list.into())
}

/// Flag a release as deprecated
#[instrument(skip(state))]
pub async fn deprecate_release(
    State(state): State<AppState>,
    Path((project, channel, version)): Path<(String, String, String)>,
    Extension(publisher): Extension<Publisher>,
) -> ApiResult<Json<ApiResponse<Release>>> {
    info!("Deprecating {}/{}@{}", project, channel, version);

    let release = state
        .services
        .publisher
        .deprecate(&project, &channel, &version, Some(publisher.actor()))
        .await?;

    Ok(Json(ok(release)))
}

// ============================================================================
// Downloads
// ============================================================================

/// Download the artifact of a release (version or `latest`)
#[instrument(skip(state))]
pub async fn download_release(
    State(state): State<AppState>,
    Path((project, channel, version)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let download = state
        .services
        .downloads
        .download_release(&project, &channel, &version)
        .await?;

    let file_name = download.file_name();
    let mut headers = artifact_headers(&download.release.checksum, &file_name)?;
    headers.insert(
        HeaderName::from_static(DOWNLOAD_COUNT_HEADER),
        HeaderValue::from(download.download_count),
    );

    Ok((headers, download.bytes).into_response())
}

/// Download artifact bytes by content reference
#[instrument(skip(state))]
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Response> {
    let artifact = state.services.downloads.download_artifact(&reference).await?;

    let file_name = format!("{}.bin", artifact.content_ref);
    let headers = artifact_headers(&artifact.checksum, &file_name)?;

    Ok((headers, artifact.bytes).into_response())
}

fn artifact_headers(checksum: &Checksum, file_name: &str) -> ApiResult<HeaderMap> {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .map_err(|e| {
            error!(file_name = %file_name, error = %e, "Invalid Content-Disposition header");
            ApiError::internal_server_error()
        })?;
    let checksum = HeaderValue::from_str(checksum.as_str()).map_err(|e| {
        error!(error = %e, "Invalid checksum header");
        ApiError::internal_server_error()
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(CONTENT_DISPOSITION, disposition);
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(HeaderName::from_static(CHECKSUM_HEADER), checksum);

    Ok(headers)
}

// ============================================================================
// Inbound webhooks
// ============================================================================

/// Acknowledgement returned to GitHub
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    /// `published` or `ignored`
    pub status: String,

    /// Release created from the delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,

    /// Why the delivery was ignored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Receive a GitHub release webhook
#[instrument(skip(state, secret, headers, body))]
pub async fn github_webhook(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<WebhookAck>>> {
    let event = headers
        .get(GITHUB_EVENT_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.services.github.ingest(&secret, event, &body).await?;

    let ack = match outcome {
        IngestOutcome::Published(release) => {
            info!("GitHub delivery published {}", release.coordinates());
            WebhookAck {
                status: "published".to_string(),
                release: Some(release),
                reason: None,
            }
        }
        IngestOutcome::Ignored(reason) => {
            debug!("GitHub delivery ignored: {}", reason);
            WebhookAck {
                status: "ignored".to_string(),
                release: None,
                reason: Some(reason),
            }
        }
    };

    Ok(Json(ok(ack)))
}

// ============================================================================
// Operations
// ============================================================================

/// 200 when both stores answer, 503 otherwise
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> HealthResponse {
    let report = state.services.health_check().await;
    HealthResponse::from_report(report).with_version(env!("CARGO_PKG_VERSION"))
}

/// Prometheus text exposition
#[instrument(skip(state))]
pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let body = state.services.metrics.render()?;
    Ok(([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response())
}

pub async fn version_info() -> Json<ApiResponse<VersionInfo>> {
    Json(ok(VersionInfo::current()))
}

/// Body of `GET /version`
#[derive(Debug, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Server crate version
    pub version: String,
    /// Prefix of the versioned routes
    pub api_version: String,
    /// `BUILD_TIMESTAMP` at compile time, `unknown` when unset
    pub build_timestamp: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: "v1".to_string(),
            build_timestamp: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown").to_string(),
        }
    }
}
