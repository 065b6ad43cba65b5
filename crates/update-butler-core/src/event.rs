//! Catalog change notifications
//!
//! A `ReleaseEvent` is built only after the catalog has committed the change
//! it describes, then queued for the notification dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::release::Release;
use crate::types::{ChannelName, ProjectName};

/// What happened to the release; serialized as `{"type": "...", "release": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    ReleasePublished { release: Release },
    /// Carries the release with its deprecation flag already set
    ReleaseDeprecated { release: Release },
}

impl EventType {
    pub fn event_name(&self) -> &'static str {
        match self {
            EventType::ReleasePublished { .. } => "release_published",
            EventType::ReleaseDeprecated { .. } => "release_deprecated",
        }
    }

    pub fn release(&self) -> &Release {
        let (EventType::ReleasePublished { release } | EventType::ReleaseDeprecated { release }) =
            self;
        release
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEvent {
    #[serde(flatten)]
    pub event_type: EventType,

    pub timestamp: DateTime<Utc>,

    /// `token:<id>` for API publishers, `github` for webhook ingest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl ReleaseEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            actor: None,
        }
    }

    pub fn published(release: Release) -> Self {
        Self::new(EventType::ReleasePublished { release })
    }

    pub fn deprecated(release: Release) -> Self {
        Self::new(EventType::ReleaseDeprecated { release })
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn event_name(&self) -> &'static str {
        self.event_type.event_name()
    }

    pub fn release(&self) -> &Release {
        self.event_type.release()
    }

    pub fn project(&self) -> &ProjectName {
        &self.release().project
    }

    pub fn channel(&self) -> &ChannelName {
        &self.release().channel
    }
}

impl fmt::Display for ReleaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} at {}",
            self.event_name(),
            self.release().coordinates(),
            self.timestamp.to_rfc3339()
        )?;
        match &self.actor {
            Some(actor) => write!(f, " by {}", actor),
            None => Ok(()),
        }
    }
}
