//! Core domain models and types for UpdateButler
//!
//! This crate contains the data structures and pure domain logic shared by
//! every other layer: release version ordering, SHA-256 checksums and
//! content references, projects, channels with their policies, releases,
//! and the events emitted when the release history changes.

pub mod channel;
pub mod checksum;
pub mod error;
pub mod event;
pub mod release;
pub mod types;
pub mod version;

// Re-exports for convenience
pub use channel::{Channel, ChannelPolicy, ChannelPolicyTable, Project, PublishMode};
pub use checksum::{Checksum, ContentRef};
pub use error::{ButlerError, Result};
pub use event::{EventType, ReleaseEvent};
pub use release::{Release, ReleaseBuilder};
pub use types::{ChannelName, ProjectName, ReleaseId};
pub use version::{ReleaseVersion, VersionSelector};
