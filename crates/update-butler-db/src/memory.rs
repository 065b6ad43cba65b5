//! In-memory release catalog
//!
//! Used for tests and for running the service without PostgreSQL. Each
//! channel has its own lock, so the uniqueness and ordering checks in
//! [`ReleaseCatalog::append`] are atomic with the insert while unrelated
//! channels proceed in parallel. The outer maps are only locked long enough
//! to look up or insert a handle.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use update_butler_core::{
    Channel, ChannelName, ChannelPolicy, Project, ProjectName, PublishMode, Release, ReleaseId,
    ReleaseVersion,
};

use crate::catalog::{ReleaseCatalog, ReleasePage, ReleaseQuery};
use crate::error::{DbError, DbResult};

type ChannelKey = (ProjectName, ChannelName);

#[derive(Debug)]
struct ChannelState {
    channel: Channel,
    releases: BTreeMap<ReleaseVersion, Release>,
}

/// Release catalog held entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryReleaseCatalog {
    projects: RwLock<HashMap<ProjectName, Project>>,
    channels: RwLock<HashMap<ChannelKey, Arc<RwLock<ChannelState>>>>,
    /// Download counter per committed release
    downloads: RwLock<HashMap<ReleaseId, Arc<AtomicU64>>>,
}

impl InMemoryReleaseCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of releases across all channels
    pub async fn release_count(&self) -> usize {
        self.downloads.read().await.len()
    }

    async fn channel_handle(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> Option<Arc<RwLock<ChannelState>>> {
        let key = (project.clone(), channel.clone());
        self.channels.read().await.get(&key).cloned()
    }

    async fn read_channel<T>(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        read: impl FnOnce(&ChannelState) -> T,
    ) -> Option<T> {
        let handle = self.channel_handle(project, channel).await?;
        let state = handle.read().await;
        Some(read(&state))
    }

    async fn counter(&self, release_id: &ReleaseId) -> DbResult<Arc<AtomicU64>> {
        self.downloads
            .read()
            .await
            .get(release_id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("Release {}", release_id)))
    }
}

fn coordinates(project: &ProjectName, channel: &ChannelName, version: &ReleaseVersion) -> String {
    format!("{}/{}@{}", project, channel, version)
}

#[async_trait]
impl ReleaseCatalog for InMemoryReleaseCatalog {
    #[instrument(skip(self, policy))]
    async fn ensure_channel(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        policy: ChannelPolicy,
    ) -> DbResult<Channel> {
        self.projects
            .write()
            .await
            .entry(project.clone())
            .or_insert_with(|| Project::new(project.clone()));

        let handle = self
            .channels
            .write()
            .await
            .entry((project.clone(), channel.clone()))
            .or_insert_with(|| {
                debug!(%project, %channel, "Creating channel");
                Arc::new(RwLock::new(ChannelState {
                    channel: Channel::new(project.clone(), channel.clone(), policy),
                    releases: BTreeMap::new(),
                }))
            })
            .clone();

        let state = handle.read().await;
        Ok(state.channel.clone())
    }

    async fn get_project(&self, project: &ProjectName) -> DbResult<Option<Project>> {
        Ok(self.projects.read().await.get(project).cloned())
    }

    async fn get_channel(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Channel>> {
        Ok(self
            .read_channel(project, channel, |c| c.channel.clone())
            .await)
    }

    async fn get_latest(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Release>> {
        Ok(self
            .read_channel(project, channel, |c| c.releases.values().next_back().cloned())
            .await
            .flatten())
    }

    async fn get_latest_active(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Release>> {
        let active = self
            .read_channel(project, channel, |c| {
                c.releases
                    .values()
                    .rev()
                    .find(|r| !r.deprecated)
                    .or_else(|| c.releases.values().next_back())
                    .cloned()
            })
            .await;

        Ok(active.flatten())
    }

    async fn get_by_version(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Option<Release>> {
        Ok(self
            .read_channel(project, channel, |c| c.releases.get(version).cloned())
            .await
            .flatten())
    }

    async fn list_since(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Vec<Release>> {
        use std::ops::Bound;

        let since = self
            .read_channel(project, channel, |c| {
                c.releases
                    .range((Bound::Excluded(version.clone()), Bound::Unbounded))
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .await;

        Ok(since.unwrap_or_default())
    }

    async fn list_releases(&self, query: &ReleaseQuery) -> DbResult<ReleasePage> {
        let ordered = self
            .read_channel(&query.project, &query.channel, |c| {
                c.releases.values().rev().cloned().collect()
            })
            .await
            .unwrap_or_default();

        Ok(query.paginate(ordered))
    }

    #[instrument(skip(self, release), fields(release = %release.coordinates(), mode = %mode))]
    async fn append(&self, release: Release, mode: PublishMode) -> DbResult<Release> {
        let handle = self
            .channel_handle(&release.project, &release.channel)
            .await
            .ok_or_else(|| {
                DbError::NotFound(format!("Channel {}/{}", release.project, release.channel))
            })?;
        let mut channel_state = handle.write().await;

        if channel_state.releases.contains_key(&release.version) {
            return Err(DbError::AlreadyExists(release.coordinates()));
        }

        if mode == PublishMode::Monotonic {
            if let Some(latest) = channel_state.releases.keys().next_back() {
                if release.version <= *latest {
                    return Err(DbError::OutOfOrder(format!(
                        "{} is not newer than latest {}",
                        release.version, latest
                    )));
                }
            }
        }

        // Register the counter before the release becomes visible
        self.downloads
            .write()
            .await
            .insert(release.id, Arc::new(AtomicU64::new(0)));
        channel_state
            .releases
            .insert(release.version.clone(), release.clone());

        debug!("Release appended");
        Ok(release)
    }

    #[instrument(skip(self))]
    async fn deprecate(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Release> {
        let missing = || DbError::NotFound(coordinates(project, channel, version));

        let handle = self.channel_handle(project, channel).await.ok_or_else(missing)?;
        let mut channel_state = handle.write().await;
        let release = channel_state.releases.get_mut(version).ok_or_else(missing)?;

        release.deprecated = true;
        Ok(release.clone())
    }

    async fn record_download(&self, release_id: &ReleaseId) -> DbResult<u64> {
        let counter = self.counter(release_id).await?;
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn download_count(&self, release_id: &ReleaseId) -> DbResult<u64> {
        let counter = self.counter(release_id).await?;
        Ok(counter.load(Ordering::SeqCst))
    }

    async fn health_check(&self) -> DbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use update_butler_core::Checksum;

    fn project() -> ProjectName {
        ProjectName::new("demo").unwrap()
    }

    fn stable() -> ChannelName {
        ChannelName::new("stable").unwrap()
    }

    fn version(v: &str) -> ReleaseVersion {
        ReleaseVersion::parse(v).unwrap()
    }

    fn release(v: &str) -> Release {
        Release::builder(project(), stable(), version(v), Checksum::compute(v.as_bytes()), 3)
            .build()
            .unwrap()
    }

    async fn catalog() -> InMemoryReleaseCatalog {
        let catalog = InMemoryReleaseCatalog::new();
        catalog
            .ensure_channel(&project(), &stable(), ChannelPolicy::default())
            .await
            .unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_empty_channel_has_no_latest() {
        let catalog = catalog().await;
        assert!(catalog.get_latest(&project(), &stable()).await.unwrap().is_none());
        assert!(catalog
            .list_since(&project(), &stable(), &version("0.0.0"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_ensure_channel_keeps_original_policy() {
        let catalog = catalog().await;
        let channel = catalog
            .ensure_channel(&project(), &stable(), ChannelPolicy::stable())
            .await
            .unwrap();
        assert_eq!(channel.policy, ChannelPolicy::default());
        assert!(catalog.get_project(&project()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latest_and_list_since() {
        let catalog = catalog().await;
        for v in ["1.0.0", "1.1.0-rc.1", "1.1.0", "1.2.0"] {
            catalog.append(release(v), PublishMode::Monotonic).await.unwrap();
        }

        let latest = catalog.get_latest(&project(), &stable()).await.unwrap().unwrap();
        assert_eq!(latest.version, version("1.2.0"));

        let since: Vec<String> = catalog
            .list_since(&project(), &stable(), &version("1.0.0"))
            .await
            .unwrap()
            .iter()
            .map(|r| r.version.to_string())
            .collect();
        assert_eq!(since, vec!["1.1.0-rc.1", "1.1.0", "1.2.0"]);
    }

    #[tokio::test]
    async fn test_duplicate_version_conflicts() {
        let catalog = catalog().await;
        catalog.append(release("1.0.0"), PublishMode::Backfill).await.unwrap();

        let err = catalog
            .append(release("1.0.0"), PublishMode::Backfill)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_monotonic_rejects_older_but_backfill_accepts() {
        let catalog = catalog().await;
        catalog.append(release("2.0.0"), PublishMode::Monotonic).await.unwrap();

        let err = catalog
            .append(release("1.5.0"), PublishMode::Monotonic)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::OutOfOrder(_)));

        catalog.append(release("1.5.0"), PublishMode::Backfill).await.unwrap();
        let latest = catalog.get_latest(&project(), &stable()).await.unwrap().unwrap();
        assert_eq!(latest.version, version("2.0.0"));
    }

    #[tokio::test]
    async fn test_append_requires_channel() {
        let catalog = InMemoryReleaseCatalog::new();
        let err = catalog
            .append(release("1.0.0"), PublishMode::Monotonic)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_deprecation_and_latest_active() {
        let catalog = catalog().await;
        catalog.append(release("1.0.0"), PublishMode::Monotonic).await.unwrap();
        catalog.append(release("1.1.0"), PublishMode::Monotonic).await.unwrap();

        let deprecated = catalog
            .deprecate(&project(), &stable(), &version("1.1.0"))
            .await
            .unwrap();
        assert!(deprecated.deprecated);

        let active = catalog.get_latest_active(&project(), &stable()).await.unwrap().unwrap();
        assert_eq!(active.version, version("1.0.0"));

        let latest = catalog.get_latest(&project(), &stable()).await.unwrap().unwrap();
        assert_eq!(latest.version, version("1.1.0"));

        catalog.deprecate(&project(), &stable(), &version("1.0.0")).await.unwrap();
        let active = catalog.get_latest_active(&project(), &stable()).await.unwrap().unwrap();
        assert_eq!(active.version, version("1.1.0"));
    }

    #[tokio::test]
    async fn test_download_counter() {
        let catalog = catalog().await;
        let stored = catalog.append(release("1.0.0"), PublishMode::Monotonic).await.unwrap();

        assert_eq!(catalog.download_count(&stored.id).await.unwrap(), 0);
        assert_eq!(catalog.record_download(&stored.id).await.unwrap(), 1);
        assert_eq!(catalog.record_download(&stored.id).await.unwrap(), 2);
        assert!(catalog.record_download(&ReleaseId::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_appends_single_winner() {
        let catalog = Arc::new(catalog().await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let catalog = Arc::clone(&catalog);
            handles.push(tokio::spawn(async move {
                catalog.append(release("3.0.0"), PublishMode::Backfill).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(catalog.release_count().await, 1);
    }

    #[tokio::test]
    async fn test_busy_channel_does_not_block_other_channels() {
        let catalog = catalog().await;
        let beta = ChannelName::new("beta").unwrap();
        catalog
            .ensure_channel(&project(), &beta, ChannelPolicy::default())
            .await
            .unwrap();

        let stable_handle = catalog.channel_handle(&project(), &stable()).await.unwrap();
        let _busy = stable_handle.write().await;

        let beta_release =
            Release::builder(project(), beta.clone(), version("1.0.0"), Checksum::compute(b"b"), 1)
                .build()
                .unwrap();
        let appended = tokio::time::timeout(
            Duration::from_secs(1),
            catalog.append(beta_release, PublishMode::Monotonic),
        )
        .await
        .expect("append to beta waited on the stable channel lock")
        .unwrap();
        assert_eq!(appended.channel, beta);

        let checked = tokio::time::timeout(
            Duration::from_secs(1),
            catalog.record_download(&appended.id),
        )
        .await
        .expect("download counter waited on the stable channel lock")
        .unwrap();
        assert_eq!(checked, 1);
    }
}
