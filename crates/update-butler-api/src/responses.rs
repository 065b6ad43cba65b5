//! JSON envelopes returned by the handlers
//!
//! Single objects are wrapped as `{"data": ...}`, listings as
//! `{"items": [...], "pagination": {...}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use update_butler_core::Release;
use update_butler_service::{HealthReport, ReleaseList};

/// `{"data": T}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// One page of a release listing
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginationMeta {
    /// Matching releases across all pages
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
    pub has_more: bool,
}

impl From<ReleaseList> for PaginatedResponse<Release> {
    fn from(list: ReleaseList) -> Self {
        let pagination = PaginationMeta {
            total: list.total,
            offset: list.offset,
            limit: list.limit,
            has_more: list.has_more,
        };
        Self {
            items: list.releases,
            pagination,
        }
    }
}

impl<T: Serialize> IntoResponse for PaginatedResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    fn from_flag(healthy: bool) -> Self {
        if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// State of one backing store
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<update_butler_service::ComponentHealth> for ComponentHealth {
    fn from(health: update_butler_service::ComponentHealth) -> Self {
        Self {
            status: HealthStatus::from_flag(health.healthy),
            message: health.message,
        }
    }
}

/// Body of `GET /health`; answered with 503 when any store is down
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Keyed by component: `catalog`, `artifacts`
    pub checks: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    pub fn from_report(report: HealthReport) -> Self {
        let status = HealthStatus::from_flag(report.is_healthy());
        let checks: BTreeMap<String, ComponentHealth> = BTreeMap::from([
            ("catalog".to_string(), report.catalog.into()),
            ("artifacts".to_string(), report.artifacts.into()),
        ]);

        Self {
            status,
            version: None,
            checks,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let code = match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };
        (code, Json(self)).into_response()
    }
}

/// 200 with `{"data": ...}`
pub fn ok<T>(data: T) -> ApiResponse<T> {
    ApiResponse::new(data)
}

/// 201 with `{"data": ...}`
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::new(data)))
}
