//! Service-layer error types
//!
//! This module defines the error taxonomy seen by callers of the service
//! layer and maps domain and persistence errors onto it.

use thiserror::Error;
use update_butler_core::ButlerError;
use update_butler_db::DbError;

/// Result type alias for service operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Service-layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No project with this name
    #[error("Unknown project: {0}")]
    UnknownProject(String),

    /// The project exists but has no such channel
    #[error("Unknown channel: {project}/{channel}")]
    UnknownChannel { project: String, channel: String },

    /// The channel exists but has no releases
    #[error("No release found in {project}/{channel}")]
    NoReleaseFound { project: String, channel: String },

    /// No release with the requested version
    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    /// No artifact under the requested reference
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// The version already exists or is not newer than latest
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Supplied checksum does not match the payload
    #[error("Checksum mismatch: expected {expected}, actual {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Version string could not be parsed
    #[error("Malformed version: {0}")]
    MalformedVersion(String),

    /// The channel policy forbids this release
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Catalog or artifact store is unreachable or returned corrupt data
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A notification could not be delivered
    #[error("Notification delivery failed: {0}")]
    NotificationDeliveryFailed(String),

    /// Internal service error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Errors caused by caller input, never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ServiceError::MalformedVersion(_)
                | ServiceError::ChecksumMismatch { .. }
                | ServiceError::VersionConflict(_)
                | ServiceError::PolicyViolation(_)
                | ServiceError::InvalidInput(_)
        )
    }

    /// Infrastructure errors that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::StorageUnavailable(_))
    }

    /// Not-found class errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::UnknownProject(_)
                | ServiceError::UnknownChannel { .. }
                | ServiceError::NoReleaseFound { .. }
                | ServiceError::ReleaseNotFound(_)
                | ServiceError::ArtifactNotFound(_)
        )
    }
}

impl From<ButlerError> for ServiceError {
    fn from(err: ButlerError) -> Self {
        match err {
            ButlerError::MalformedVersion { input, reason } => {
                ServiceError::MalformedVersion(format!("{}: {}", input, reason))
            }
            ButlerError::ChecksumMismatch { expected, actual } => {
                ServiceError::ChecksumMismatch { expected, actual }
            }
            ButlerError::InvalidChecksum(msg)
            | ButlerError::InvalidContentRef(msg)
            | ButlerError::ValidationError(msg) => ServiceError::InvalidInput(msg),
            ButlerError::InvalidName { kind, value, reason } => {
                ServiceError::InvalidInput(format!("Invalid {} '{}': {}", kind, value, reason))
            }
            ButlerError::SerializationError(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => ServiceError::ReleaseNotFound(msg),
            DbError::AlreadyExists(msg) | DbError::UniqueViolation(msg) => {
                ServiceError::VersionConflict(format!("{} already exists", msg))
            }
            DbError::OutOfOrder(msg) => ServiceError::VersionConflict(msg),
            DbError::ConstraintViolation(msg) | DbError::MissingReference(msg) => {
                ServiceError::InvalidInput(msg)
            }
            DbError::Connection(msg)
            | DbError::Pool(msg)
            | DbError::Transaction(msg)
            | DbError::Storage(msg) => ServiceError::StorageUnavailable(msg),
            DbError::Query(msg)
            | DbError::Migration(msg)
            | DbError::InvalidData(msg)
            | DbError::Configuration(msg)
            | DbError::Internal(msg) => ServiceError::Internal(msg),
            DbError::Domain(err) => ServiceError::from(err),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(format!("Serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_db_error() {
        let err: ServiceError = DbError::AlreadyExists("demo/stable@1.0.0".to_string()).into();
        assert!(matches!(err, ServiceError::VersionConflict(_)));
        assert!(err.is_validation());

        let err: ServiceError = DbError::OutOfOrder("0.9.0".to_string()).into();
        assert!(matches!(err, ServiceError::VersionConflict(_)));

        let err: ServiceError = DbError::Connection("refused".to_string()).into();
        assert!(err.is_transient());

        let err: ServiceError = DbError::Storage("disk full".to_string()).into();
        assert!(matches!(err, ServiceError::StorageUnavailable(_)));
    }

    #[test]
    fn test_from_domain_error() {
        let err: ServiceError = ButlerError::MalformedVersion {
            input: "1.x".to_string(),
            reason: "unexpected character".to_string(),
        }
        .into();
        assert!(matches!(err, ServiceError::MalformedVersion(_)));

        let err: ServiceError = ButlerError::InvalidName {
            kind: "project",
            value: "Bad Name".to_string(),
            reason: "invalid character".to_string(),
        }
        .into();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_classification() {
        let err = ServiceError::NoReleaseFound {
            project: "demo".to_string(),
            channel: "stable".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "No release found in demo/stable");
    }
}
