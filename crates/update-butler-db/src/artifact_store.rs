//! Content-addressed artifact storage
//!
//! Artifacts are keyed by the SHA-256 of their bytes, so writing the same
//! bytes twice is a no-op and two releases with identical payloads share a
//! single stored object. Stored bytes are never mutated.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use ulid::Ulid;
use update_butler_core::{Checksum, ContentRef};

use crate::error::{DbError, DbResult};

/// Result of writing an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Storage key
    pub content_ref: ContentRef,

    /// SHA-256 of the stored bytes
    pub checksum: Checksum,

    /// Size of the stored bytes
    pub size_bytes: u64,

    /// False when identical bytes were already present
    pub newly_written: bool,
}

/// Content-addressed blob store for artifact bytes
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes under their content reference
    ///
    /// Storing bytes that are already present returns the same reference
    /// without rewriting them.
    async fn put(&self, data: &[u8]) -> DbResult<StoredArtifact>;

    /// Fetch the bytes for a content reference
    ///
    /// # Errors
    /// `DbError::NotFound` if nothing is stored under the reference
    async fn get(&self, reference: &ContentRef) -> DbResult<Vec<u8>>;

    /// Whether anything is stored under the reference
    async fn exists(&self, reference: &ContentRef) -> DbResult<bool>;

    /// Recompute the digest of the stored bytes and compare it to `expected`
    ///
    /// Missing artifacts verify as `false`.
    async fn verify(&self, reference: &ContentRef, expected: &Checksum) -> DbResult<bool> {
        match self.get(reference).await {
            Ok(bytes) => Ok(expected.matches(&bytes)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check that the store is usable
    async fn health_check(&self) -> DbResult<()>;
}

/// Artifact store on the local filesystem
///
/// Objects are laid out as `<root>/<first two hex chars>/<full hex digest>`.
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so readers never observe a partially written object.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> DbResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            DbError::Storage(format!("Cannot create store root {}: {}", root.display(), e))
        })?;

        debug!(root = %root.display(), "Opened filesystem artifact store");
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path on disk for a content reference
    pub fn object_path(&self, reference: &ContentRef) -> PathBuf {
        self.root.join(reference.shard()).join(reference.as_str())
    }

    async fn write_atomically(&self, reference: &ContentRef, data: &[u8]) -> DbResult<()> {
        let final_path = self.object_path(reference);
        let shard_dir = self.root.join(reference.shard());
        tokio::fs::create_dir_all(&shard_dir).await?;

        let temp_path = shard_dir.join(format!(".{}.{}.tmp", reference.as_str(), Ulid::new()));

        let result = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &final_path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(DbError::Storage(format!(
                "Failed to write artifact {}: {}",
                reference, e
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, data: &[u8]) -> DbResult<StoredArtifact> {
        let checksum = Checksum::compute(data);
        let content_ref = ContentRef::for_checksum(&checksum);
        let size_bytes = data.len() as u64;

        let newly_written = match tokio::fs::read(self.object_path(&content_ref)).await {
            Ok(existing) if checksum.matches(&existing) => false,
            Ok(_) => {
                warn!(reference = %content_ref, "Stored object is corrupt, rewriting");
                self.write_atomically(&content_ref, data).await?;
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.write_atomically(&content_ref, data).await?;
                true
            }
            Err(e) => return Err(e.into()),
        };

        debug!(reference = %content_ref, newly_written, "Artifact stored");

        Ok(StoredArtifact {
            content_ref,
            checksum,
            size_bytes,
            newly_written,
        })
    }

    async fn get(&self, reference: &ContentRef) -> DbResult<Vec<u8>> {
        match tokio::fs::read(self.object_path(reference)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DbError::NotFound(format!("Artifact {}", reference)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, reference: &ContentRef) -> DbResult<bool> {
        Ok(tokio::fs::try_exists(self.object_path(reference)).await?)
    }

    async fn health_check(&self) -> DbResult<()> {
        let metadata = tokio::fs::metadata(&self.root).await.map_err(|e| {
            DbError::Storage(format!("Store root {} unavailable: {}", self.root.display(), e))
        })?;

        if !metadata.is_dir() {
            return Err(DbError::Storage(format!(
                "Store root {} is not a directory",
                self.root.display()
            )));
        }

        Ok(())
    }
}

/// Artifact store held in process memory
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: RwLock<HashMap<ContentRef, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored objects
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Overwrite an object without checking its digest
    ///
    /// Only useful for simulating storage corruption in tests.
    #[doc(hidden)]
    pub async fn overwrite_unchecked(&self, reference: &ContentRef, data: Vec<u8>) {
        self.objects.write().await.insert(reference.clone(), data);
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, data: &[u8]) -> DbResult<StoredArtifact> {
        let checksum = Checksum::compute(data);
        let content_ref = ContentRef::for_checksum(&checksum);

        let mut objects = self.objects.write().await;
        let newly_written = match objects.get(&content_ref) {
            Some(existing) if checksum.matches(existing) => false,
            _ => {
                objects.insert(content_ref.clone(), data.to_vec());
                true
            }
        };

        Ok(StoredArtifact {
            content_ref,
            checksum,
            size_bytes: data.len() as u64,
            newly_written,
        })
    }

    async fn get(&self, reference: &ContentRef) -> DbResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("Artifact {}", reference)))
    }

    async fn exists(&self, reference: &ContentRef) -> DbResult<bool> {
        Ok(self.objects.read().await.contains_key(reference))
    }

    async fn health_check(&self) -> DbResult<()> {
        Ok(())
    }
}
