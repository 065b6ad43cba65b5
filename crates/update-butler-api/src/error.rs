//! HTTP error bodies
//!
//! Every failure is answered with `{"status", "error", "code", "timestamp"}`.
//! Storage and internal failures are logged here and replaced with a generic
//! message so backend details never reach clients.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;
use update_butler_service::ServiceError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// 429; `Retry-After` is never below one second
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            retry_after: Some(retry_after_secs.max(1)),
            ..Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                "Rate limit exceeded",
            )
        }
    }

    pub fn temporarily_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "TEMPORARILY_UNAVAILABLE",
            "Service temporarily unavailable, try again later",
        )
    }

    pub fn internal_server_error() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Internal server error",
        )
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn error_code(&self) -> &str {
        self.code
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: self.status.as_u16(),
            error: self.message,
            code: Some(self.code.to_string()),
            timestamp: Utc::now(),
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        use StatusCode as S;

        let (status, code) = match &err {
            ServiceError::UnknownProject(_) => (S::NOT_FOUND, "UNKNOWN_PROJECT"),
            ServiceError::UnknownChannel { .. } => (S::NOT_FOUND, "UNKNOWN_CHANNEL"),
            ServiceError::NoReleaseFound { .. } => (S::NOT_FOUND, "NO_RELEASE_FOUND"),
            ServiceError::ReleaseNotFound(_) => (S::NOT_FOUND, "RELEASE_NOT_FOUND"),
            ServiceError::ArtifactNotFound(_) => (S::NOT_FOUND, "ARTIFACT_NOT_FOUND"),
            ServiceError::VersionConflict(_) => (S::CONFLICT, "VERSION_CONFLICT"),
            ServiceError::ChecksumMismatch { .. } => (S::UNPROCESSABLE_ENTITY, "CHECKSUM_MISMATCH"),
            ServiceError::MalformedVersion(_) => (S::BAD_REQUEST, "MALFORMED_VERSION"),
            ServiceError::PolicyViolation(_) => (S::UNPROCESSABLE_ENTITY, "POLICY_VIOLATION"),
            ServiceError::InvalidInput(_) => (S::BAD_REQUEST, "INVALID_INPUT"),
            ServiceError::Unauthorized(_) => (S::UNAUTHORIZED, "UNAUTHORIZED"),
            ServiceError::StorageUnavailable(msg) => {
                error!(error = %msg, "Storage unavailable");
                return ApiError::temporarily_unavailable();
            }
            ServiceError::NotificationDeliveryFailed(msg) | ServiceError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                return ApiError::internal_server_error();
            }
        };

        ApiError::new(status, code, err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::bad_request(format!("Invalid JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_mapping() {
        let cases = [
            (
                ServiceError::UnknownProject("demo".to_string()),
                StatusCode::NOT_FOUND,
                "UNKNOWN_PROJECT",
            ),
            (
                ServiceError::VersionConflict("1.0.0".to_string()),
                StatusCode::CONFLICT,
                "VERSION_CONFLICT",
            ),
            (
                ServiceError::ChecksumMismatch {
                    expected: "a".to_string(),
                    actual: "b".to_string(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "CHECKSUM_MISMATCH",
            ),
            (
                ServiceError::MalformedVersion("x".to_string()),
                StatusCode::BAD_REQUEST,
                "MALFORMED_VERSION",
            ),
            (
                ServiceError::PolicyViolation("no".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "POLICY_VIOLATION",
            ),
        ];

        for (service_err, status, code) in cases {
            let api_err = ApiError::from(service_err);
            assert_eq!(api_err.status_code(), status);
            assert_eq!(api_err.error_code(), code);
        }
    }

    #[test]
    fn test_client_errors_keep_service_message() {
        let err = ApiError::from(ServiceError::UnknownProject("demo".to_string()));
        assert!(err.message.contains("demo"));
    }

    #[test]
    fn test_storage_errors_do_not_leak() {
        let api_err = ApiError::from(ServiceError::StorageUnavailable(
            "connection to 10.0.0.5 refused".to_string(),
        ));
        assert_eq!(api_err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!api_err.message.contains("10.0.0.5"));
        assert_eq!(api_err.error_code(), "TEMPORARILY_UNAVAILABLE");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::rate_limited(0).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");
    }

    #[test]
    fn test_body_shape() {
        let body = ErrorResponse {
            status: 404,
            error: "Not found".to_string(),
            code: Some("UNKNOWN_PROJECT".to_string()),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], 404);
        assert_eq!(json["error"], "Not found");
        assert_eq!(json["code"], "UNKNOWN_PROJECT");
    }
}
