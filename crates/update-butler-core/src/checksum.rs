//! Checksums and content references
//!
//! Every artifact is identified by the SHA-256 digest of its bytes. A
//! [`Checksum`] is the validated lowercase hex form of that digest, and a
//! [`ContentRef`] is the storage key derived from it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{ButlerError, Result};

/// Length of a SHA-256 digest in hexadecimal characters
pub const SHA256_HEX_LENGTH: usize = 64;

fn validate_hex_digest(value: &str) -> std::result::Result<(), String> {
    if value.len() != SHA256_HEX_LENGTH {
        return Err(format!(
            "expected {} hex characters, got {}",
            SHA256_HEX_LENGTH,
            value.len()
        ));
    }

    if !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("must be a hexadecimal string".to_string());
    }

    Ok(())
}

/// SHA-256 checksum of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Parse a checksum from its hex form
    ///
    /// Accepts upper or lower case and an optional `sha256:` prefix.
    ///
    /// # Errors
    /// Returns `ButlerError::InvalidChecksum` if the value is not a SHA-256 hex digest
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let digest = lowered.strip_prefix("sha256:").unwrap_or(&lowered);

        validate_hex_digest(digest).map_err(ButlerError::InvalidChecksum)?;

        Ok(Self(digest.to_string()))
    }

    /// Compute the checksum of a byte slice
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Recompute the digest of `data` and compare it against this checksum
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }

    /// Compare against `data`, returning a mismatch error with both digests
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = Self::compute(data);
        if actual == *self {
            Ok(())
        } else {
            Err(ButlerError::ChecksumMismatch {
                expected: self.0.clone(),
                actual: actual.0,
            })
        }
    }

    /// Compare against a raw hash string, ignoring case
    pub fn verify_hash(&self, hash_value: &str) -> bool {
        self.0 == hash_value.trim().to_ascii_lowercase()
    }

    /// Get the lowercase hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = ButlerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = ButlerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.0
    }
}

/// Content-addressed storage key of an artifact
///
/// Derived deterministically from the artifact checksum, so identical bytes
/// always map to the same reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentRef(String);

impl ContentRef {
    /// Derive the reference for a checksum
    pub fn for_checksum(checksum: &Checksum) -> Self {
        Self(checksum.as_str().to_string())
    }

    /// Parse a reference received from a client
    ///
    /// # Errors
    /// Returns `ButlerError::InvalidContentRef` for anything that is not a lowercase SHA-256 digest
    pub fn parse(value: &str) -> Result<Self> {
        validate_hex_digest(value).map_err(ButlerError::InvalidContentRef)?;
        if value.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ButlerError::InvalidContentRef(
                "must be lowercase".to_string(),
            ));
        }
        Ok(Self(value.to_string()))
    }

    /// The checksum this reference was derived from
    pub fn checksum(&self) -> Checksum {
        Checksum(self.0.clone())
    }

    /// Two-character prefix used to fan blobs out across directories
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }

    /// Get the reference as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentRef {
    type Err = ButlerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentRef {
    type Error = ButlerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentRef> for String {
    fn from(reference: ContentRef) -> Self {
        reference.0
    }
}
