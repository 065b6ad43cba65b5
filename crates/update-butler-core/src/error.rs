//! Error types for UpdateButler domain validation

use thiserror::Error;

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, ButlerError>;

/// Errors raised while constructing or validating domain values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ButlerError {
    /// Version string is not a valid semantic version
    #[error("Malformed version '{input}': {reason}")]
    MalformedVersion { input: String, reason: String },

    /// Checksum string is not a valid SHA-256 hex digest
    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    /// Supplied checksum does not match the recomputed digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Content reference is not well-formed
    #[error("Invalid content reference: {0}")]
    InvalidContentRef(String),

    /// Project or channel name is not a valid slug
    #[error("Invalid {kind} name '{value}': {reason}")]
    InvalidName {
        kind: &'static str,
        value: String,
        reason: String,
    },

    /// Generic validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ButlerError {
    /// Check if this error was caused by a malformed version string
    pub fn is_malformed_version(&self) -> bool {
        matches!(self, ButlerError::MalformedVersion { .. })
    }
}

impl From<serde_json::Error> for ButlerError {
    fn from(err: serde_json::Error) -> Self {
        ButlerError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ButlerError::MalformedVersion {
            input: "1.x".to_string(),
            reason: "unexpected character".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed version '1.x': unexpected character");
        assert!(err.is_malformed_version());

        let err = ButlerError::InvalidName {
            kind: "project",
            value: "Bad Name".to_string(),
            reason: "must be lowercase".to_string(),
        };
        assert!(err.to_string().starts_with("Invalid project name"));
    }
}
