//! Release version parsing and ordering
//!
//! Versions follow semantic-versioning precedence: numeric `major.minor.patch`
//! components compare numerically, a pre-release sorts before the release it
//! precedes, and pre-release identifiers compare by semver identifier rules
//! (`1.0.0-alpha < 1.0.0-beta < 1.0.0-rc.1 < 1.0.0`).
//!
//! Build metadata never takes part in ordering or uniqueness, so it is
//! stripped at parse time. A leading `v` (as used by Git tags) is accepted.

use semver::{BuildMetadata, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{ButlerError, Result};

/// A normalized semantic version used as the ordering key within a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseVersion(Version);

impl ReleaseVersion {
    /// Parse a version string
    ///
    /// # Errors
    /// Returns `ButlerError::MalformedVersion` if the input is not a semantic version
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let unprefixed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if unprefixed.is_empty() {
            return Err(ButlerError::MalformedVersion {
                input: input.to_string(),
                reason: "version cannot be empty".to_string(),
            });
        }

        let mut version = Version::parse(unprefixed).map_err(|e| ButlerError::MalformedVersion {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        version.build = BuildMetadata::EMPTY;

        Ok(Self(version))
    }

    /// Create a version from numeric components
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Whether this version carries a pre-release tag
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// The pre-release tag, if any
    pub fn prerelease(&self) -> Option<&str> {
        if self.0.pre.is_empty() {
            None
        } else {
            Some(self.0.pre.as_str())
        }
    }

    /// Borrow the underlying semver value
    pub fn as_semver(&self) -> &Version {
        &self.0
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Build metadata is always empty, so semver's total order is pure precedence.
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReleaseVersion {
    type Err = ButlerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Version> for ReleaseVersion {
    fn from(mut version: Version) -> Self {
        version.build = BuildMetadata::EMPTY;
        Self(version)
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ReleaseVersion::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Selects a release either by exact version or by the `latest` alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// The latest active release of the channel
    Latest,
    /// A specific version
    Exact(ReleaseVersion),
}

impl VersionSelector {
    /// Keyword accepted in place of a version
    pub const LATEST: &'static str = "latest";

    /// Parse a selector, accepting `latest` case-insensitively
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().eq_ignore_ascii_case(Self::LATEST) {
            Ok(VersionSelector::Latest)
        } else {
            ReleaseVersion::parse(input).map(VersionSelector::Exact)
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "{}", Self::LATEST),
            VersionSelector::Exact(version) => write!(f, "{}", version),
        }
    }
}
