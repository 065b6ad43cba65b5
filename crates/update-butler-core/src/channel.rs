//! Projects, channels and channel policies
//!
//! Channel behaviour (whether pre-releases are accepted, whether versions
//! must be published in increasing order) is plain data carried by a
//! [`ChannelPolicy`]. A [`ChannelPolicyTable`] decides which policy a
//! channel receives when it is first created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ButlerError, Result};
use crate::types::{ChannelName, ProjectName};
use crate::version::ReleaseVersion;

/// How new versions relate to the existing history of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Every new version must be greater than the current latest
    Monotonic,
    /// Versions may be inserted anywhere as long as they are unique
    Backfill,
}

impl Default for PublishMode {
    fn default() -> Self {
        Self::Monotonic
    }
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monotonic => write!(f, "monotonic"),
            Self::Backfill => write!(f, "backfill"),
        }
    }
}

impl FromStr for PublishMode {
    type Err = ButlerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monotonic" => Ok(Self::Monotonic),
            "backfill" => Ok(Self::Backfill),
            _ => Err(ButlerError::ValidationError(format!(
                "Invalid publish mode: {}",
                s
            ))),
        }
    }
}

/// Publishing rules attached to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    /// Whether versions with a pre-release tag may be published
    #[serde(default = "default_allow_prerelease")]
    pub allow_prerelease: bool,

    /// Ordering rule for new versions
    #[serde(default)]
    pub publish_mode: PublishMode,
}

fn default_allow_prerelease() -> bool {
    true
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self {
            allow_prerelease: default_allow_prerelease(),
            publish_mode: PublishMode::Monotonic,
        }
    }
}

impl ChannelPolicy {
    /// Policy for a stable track: no pre-releases, strictly increasing versions
    pub fn stable() -> Self {
        Self {
            allow_prerelease: false,
            publish_mode: PublishMode::Monotonic,
        }
    }

    /// Policy for a pre-release track
    pub fn prerelease() -> Self {
        Self {
            allow_prerelease: true,
            publish_mode: PublishMode::Monotonic,
        }
    }

    /// Set whether pre-releases are accepted
    pub fn with_prerelease(mut self, allow: bool) -> Self {
        self.allow_prerelease = allow;
        self
    }

    /// Set the publish mode
    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    /// Whether this policy accepts the given version at all
    pub fn permits(&self, version: &ReleaseVersion) -> bool {
        self.allow_prerelease || !version.is_prerelease()
    }

    /// Whether out-of-order insertion may be requested
    pub fn allows_backfill(&self) -> bool {
        self.publish_mode == PublishMode::Backfill
    }
}

/// Maps channel names to the policy they receive on creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPolicyTable {
    /// Policy for channels without an explicit entry
    #[serde(default)]
    pub default: ChannelPolicy,

    /// Per-channel overrides
    #[serde(default)]
    pub channels: HashMap<String, ChannelPolicy>,
}

impl Default for ChannelPolicyTable {
    fn default() -> Self {
        let mut channels = HashMap::new();
        channels.insert("stable".to_string(), ChannelPolicy::stable());
        channels.insert("beta".to_string(), ChannelPolicy::prerelease());

        Self {
            default: ChannelPolicy::default(),
            channels,
        }
    }
}

impl ChannelPolicyTable {
    /// Create a table with only a default policy
    pub fn with_default(default: ChannelPolicy) -> Self {
        Self {
            default,
            channels: HashMap::new(),
        }
    }

    /// Add or replace a channel override
    pub fn with_channel(mut self, name: impl Into<String>, policy: ChannelPolicy) -> Self {
        self.channels.insert(name.into(), policy);
        self
    }

    /// Policy for a channel name
    pub fn policy_for(&self, channel: &ChannelName) -> ChannelPolicy {
        self.channels
            .get(channel.as_str())
            .copied()
            .unwrap_or(self.default)
    }
}

/// A project publishing releases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique project name
    pub name: ProjectName,

    /// When the project was first seen
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Create a new project record
    pub fn new(name: ProjectName) -> Self {
        Self {
            name,
            created_at: Utc::now(),
        }
    }
}

/// A named release track within a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Owning project
    pub project: ProjectName,

    /// Channel name
    pub name: ChannelName,

    /// Policy captured when the channel was created
    pub policy: ChannelPolicy,

    /// When the channel was created
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Create a new channel record
    pub fn new(project: ProjectName, name: ChannelName, policy: ChannelPolicy) -> Self {
        Self {
            project,
            name,
            policy,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str) -> ChannelName {
        ChannelName::new(name).unwrap()
    }

    #[test]
    fn test_stable_policy_rejects_prereleases() {
        let policy = ChannelPolicy::stable();
        assert!(policy.permits(&ReleaseVersion::parse("1.0.0").unwrap()));
        assert!(!policy.permits(&ReleaseVersion::parse("1.0.0-beta").unwrap()));
        assert!(!policy.allows_backfill());
    }

    #[test]
    fn test_policy_builder() {
        let policy = ChannelPolicy::stable().with_publish_mode(PublishMode::Backfill);
        assert!(policy.allows_backfill());
        assert!(!policy.allow_prerelease);

        let policy = policy.with_prerelease(true);
        assert!(policy.permits(&ReleaseVersion::parse("2.0.0-rc.1").unwrap()));
    }

    #[test]
    fn test_default_table() {
        let table = ChannelPolicyTable::default();
        assert_eq!(table.policy_for(&channel("stable")), ChannelPolicy::stable());
        assert_eq!(table.policy_for(&channel("beta")), ChannelPolicy::prerelease());
        assert_eq!(table.policy_for(&channel("nightly")), ChannelPolicy::default());
    }

    #[test]
    fn test_table_overrides() {
        let table = ChannelPolicyTable::with_default(ChannelPolicy::stable()).with_channel(
            "archive",
            ChannelPolicy::stable().with_publish_mode(PublishMode::Backfill),
        );

        assert!(table.policy_for(&channel("archive")).allows_backfill());
        assert!(!table.policy_for(&channel("other")).allow_prerelease);
    }

    #[test]
    fn test_publish_mode_strings() {
        assert_eq!(PublishMode::Backfill.to_string(), "backfill");
        assert_eq!("monotonic".parse::<PublishMode>().unwrap(), PublishMode::Monotonic);
        assert!("sideways".parse::<PublishMode>().is_err());
    }

    #[test]
    fn test_policy_deserialize_defaults() {
        let policy: ChannelPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, ChannelPolicy::default());

        let policy: ChannelPolicy =
            serde_json::from_str(r#"{"allow_prerelease": false, "publish_mode": "backfill"}"#)
                .unwrap();
        assert!(!policy.allow_prerelease);
        assert!(policy.allows_backfill());
    }
}
