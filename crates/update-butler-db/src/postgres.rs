//! PostgreSQL implementation of ReleaseCatalog
//!
//! Versions are stored as text alongside their numeric components. SQL
//! narrows candidates on `(major, minor, patch)` and the final ordering,
//! including pre-release precedence, is decided by [`ReleaseVersion`]'s
//! `Ord` implementation so both catalog backends order identically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use update_butler_core::{
    Channel, ChannelName, ChannelPolicy, Checksum, ContentRef, Project, ProjectName, PublishMode,
    Release, ReleaseId, ReleaseVersion,
};

use crate::catalog::{ReleaseCatalog, ReleasePage, ReleaseQuery};
use crate::error::{DbError, DbResult};

const RELEASE_COLUMNS: &str = "id, project_name, channel_name, version, title, changelog, \
     checksum, content_ref, size_bytes, published_at, deprecated";

/// PostgreSQL implementation of ReleaseCatalog
#[derive(Debug, Clone)]
pub struct PostgresReleaseCatalog {
    pool: PgPool,
}

impl PostgresReleaseCatalog {
    /// Create a new PostgreSQL release catalog
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ReleaseCatalog for PostgresReleaseCatalog {
    #[instrument(skip(self, policy), fields(project = %project, channel = %channel))]
    async fn ensure_channel(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        policy: ChannelPolicy,
    ) -> DbResult<Channel> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO projects (name, created_at)
            VALUES ($1, NOW())
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(project.as_str())
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO channels (project_name, name, allow_prerelease, publish_mode, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (project_name, name) DO NOTHING
            "#,
        )
        .bind(project.as_str())
        .bind(channel.as_str())
        .bind(policy.allow_prerelease)
        .bind(policy.publish_mode.to_string())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() > 0 {
            debug!("Created channel");
        }

        let row = sqlx::query(
            r#"
            SELECT project_name, name, allow_prerelease, publish_mode, created_at
            FROM channels
            WHERE project_name = $1 AND name = $2
            "#,
        )
        .bind(project.as_str())
        .bind(channel.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        row_to_channel(row)
    }

    #[instrument(skip(self))]
    async fn get_project(&self, project: &ProjectName) -> DbResult<Option<Project>> {
        let row = sqlx::query("SELECT name, created_at FROM projects WHERE name = $1")
            .bind(project.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> DbResult<Project> {
            let name: String = row.get("name");
            Ok(Project {
                name: ProjectName::new(name)?,
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn get_channel(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Channel>> {
        let row = sqlx::query(
            r#"
            SELECT project_name, name, allow_prerelease, publish_mode, created_at
            FROM channels
            WHERE project_name = $1 AND name = $2
            "#,
        )
        .bind(project.as_str())
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_channel).transpose()
    }

    #[instrument(skip(self))]
    async fn get_latest(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Release>> {
        let mut conn = self.pool.acquire().await?;
        latest_in(&mut conn, project, channel, false).await
    }

    #[instrument(skip(self))]
    async fn get_latest_active(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
    ) -> DbResult<Option<Release>> {
        let mut conn = self.pool.acquire().await?;
        match latest_in(&mut conn, project, channel, true).await? {
            Some(release) => Ok(Some(release)),
            None => latest_in(&mut conn, project, channel, false).await,
        }
    }

    #[instrument(skip(self))]
    async fn get_by_version(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Option<Release>> {
        let sql = format!(
            "SELECT {} FROM releases \
             WHERE project_name = $1 AND channel_name = $2 AND version = $3",
            RELEASE_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(project.as_str())
            .bind(channel.as_str())
            .bind(version.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_release).transpose()
    }

    #[instrument(skip(self))]
    async fn list_since(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Vec<Release>> {
        let (major, minor, patch) = version_components(version)?;

        let sql = format!(
            r#"
            SELECT {} FROM releases
            WHERE project_name = $1 AND channel_name = $2
              AND (version_major, version_minor, version_patch) >= ($3, $4, $5)
            "#,
            RELEASE_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(project.as_str())
            .bind(channel.as_str())
            .bind(major)
            .bind(minor)
            .bind(patch)
            .fetch_all(&self.pool)
            .await?;

        let mut releases = rows
            .into_iter()
            .map(row_to_release)
            .collect::<DbResult<Vec<_>>>()?;

        releases.retain(|r| r.version > *version);
        releases.sort_by(|a, b| a.version.cmp(&b.version));

        debug!(count = releases.len(), "Listed newer releases");
        Ok(releases)
    }

    #[instrument(skip(self, query), fields(project = %query.project, channel = %query.channel))]
    async fn list_releases(&self, query: &ReleaseQuery) -> DbResult<ReleasePage> {
        let sql = format!(
            "SELECT {} FROM releases WHERE project_name = $1 AND channel_name = $2",
            RELEASE_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(query.project.as_str())
            .bind(query.channel.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut releases = rows
            .into_iter()
            .map(row_to_release)
            .collect::<DbResult<Vec<_>>>()?;
        releases.sort_by(|a, b| b.version.cmp(&a.version));

        Ok(query.paginate(releases))
    }

    #[instrument(skip(self, release), fields(release = %release.coordinates(), mode = %mode))]
    async fn append(&self, release: Release, mode: PublishMode) -> DbResult<Release> {
        debug!("Appending release to catalog");

        let mut tx = self.pool.begin().await?;

        // Serializes appends within one channel
        let locked = sqlx::query(
            "SELECT 1 FROM channels WHERE project_name = $1 AND name = $2 FOR UPDATE",
        )
        .bind(release.project.as_str())
        .bind(release.channel.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Err(DbError::NotFound(format!(
                "Channel {}/{}",
                release.project, release.channel
            )));
        }

        if mode == PublishMode::Monotonic {
            if let Some(latest) =
                latest_in(&mut tx, &release.project, &release.channel, false).await?
            {
                if release.version == latest.version {
                    return Err(DbError::AlreadyExists(release.coordinates()));
                }
                if release.version < latest.version {
                    return Err(DbError::OutOfOrder(format!(
                        "{} is not newer than latest {}",
                        release.version, latest.version
                    )));
                }
            }
        }

        let (major, minor, patch) = version_components(&release.version)?;
        let size_bytes = i64::try_from(release.size_bytes)
            .map_err(|_| DbError::InvalidData("Artifact size out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO releases (
                id, project_name, channel_name, version,
                version_major, version_minor, version_patch, version_pre,
                title, changelog, checksum, content_ref, size_bytes,
                published_at, deprecated
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7, $8,
                $9, $10, $11, $12, $13,
                $14, $15
            )
            "#,
        )
        .bind(release.id.to_string())
        .bind(release.project.as_str())
        .bind(release.channel.as_str())
        .bind(release.version.to_string())
        .bind(major)
        .bind(minor)
        .bind(patch)
        .bind(release.version.prerelease().unwrap_or_default())
        .bind(release.title.as_deref())
        .bind(&release.changelog)
        .bind(release.checksum.as_str())
        .bind(release.content_ref.as_str())
        .bind(size_bytes)
        .bind(release.published_at)
        .bind(release.deprecated)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation(_) => DbError::AlreadyExists(release.coordinates()),
            other => other,
        })?;

        tx.commit().await?;

        debug!("Release committed");
        Ok(release)
    }

    #[instrument(skip(self))]
    async fn deprecate(
        &self,
        project: &ProjectName,
        channel: &ChannelName,
        version: &ReleaseVersion,
    ) -> DbResult<Release> {
        let sql = format!(
            r#"
            UPDATE releases
            SET deprecated = TRUE, deprecated_at = COALESCE(deprecated_at, NOW())
            WHERE project_name = $1 AND channel_name = $2 AND version = $3
            RETURNING {}
            "#,
            RELEASE_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(project.as_str())
            .bind(channel.as_str())
            .bind(version.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                DbError::NotFound(format!("{}/{}@{}", project, channel, version))
            })?;

        row_to_release(row)
    }

    #[instrument(skip(self))]
    async fn record_download(&self, release_id: &ReleaseId) -> DbResult<u64> {
        let row = sqlx::query(
            r#"
            INSERT INTO release_downloads (release_id, downloads)
            VALUES ($1, 1)
            ON CONFLICT (release_id)
            DO UPDATE SET downloads = release_downloads.downloads + 1
            RETURNING downloads
            "#,
        )
        .bind(release_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::MissingReference(_) => {
                DbError::NotFound(format!("Release {}", release_id))
            }
            other => other,
        })?;

        count_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn download_count(&self, release_id: &ReleaseId) -> DbResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(d.downloads, 0) AS downloads
            FROM releases r
            LEFT JOIN release_downloads d ON d.release_id = r.id
            WHERE r.id = $1
            "#,
        )
        .bind(release_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("Release {}", release_id)))?;

        count_from_row(&row)
    }

    async fn health_check(&self) -> DbResult<()> {
        crate::pool::verify_pool_health(&self.pool).await
    }
}

/// Greatest version in a channel, optionally skipping deprecated releases
async fn latest_in(
    conn: &mut PgConnection,
    project: &ProjectName,
    channel: &ChannelName,
    active_only: bool,
) -> DbResult<Option<Release>> {
    let sql = format!(
        r#"
        SELECT {cols} FROM releases
        WHERE project_name = $1 AND channel_name = $2
          AND ($3 = FALSE OR deprecated = FALSE)
          AND (version_major, version_minor, version_patch) = (
              SELECT version_major, version_minor, version_patch
              FROM releases
              WHERE project_name = $1 AND channel_name = $2
                AND ($3 = FALSE OR deprecated = FALSE)
              ORDER BY version_major DESC, version_minor DESC, version_patch DESC
              LIMIT 1
          )
        "#,
        cols = RELEASE_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(project.as_str())
        .bind(channel.as_str())
        .bind(active_only)
        .fetch_all(&mut *conn)
        .await?;

    let mut latest: Option<Release> = None;
    for row in rows {
        let candidate = row_to_release(row)?;
        if latest.as_ref().map_or(true, |l| candidate.version > l.version) {
            latest = Some(candidate);
        }
    }

    Ok(latest)
}

fn version_components(version: &ReleaseVersion) -> DbResult<(i64, i64, i64)> {
    let v = version.as_semver();
    let convert = |n: u64| {
        i64::try_from(n).map_err(|_| {
            DbError::InvalidData(format!("Version component too large in {}", version))
        })
    };
    Ok((convert(v.major)?, convert(v.minor)?, convert(v.patch)?))
}

fn count_from_row(row: &PgRow) -> DbResult<u64> {
    let downloads: i64 = row.get("downloads");
    u64::try_from(downloads)
        .map_err(|_| DbError::InvalidData(format!("Negative download count: {}", downloads)))
}

fn row_to_channel(row: PgRow) -> DbResult<Channel> {
    let project: String = row.get("project_name");
    let name: String = row.get("name");
    let publish_mode: String = row.get("publish_mode");

    Ok(Channel {
        project: ProjectName::new(project)?,
        name: ChannelName::new(name)?,
        policy: ChannelPolicy {
            allow_prerelease: row.get("allow_prerelease"),
            publish_mode: publish_mode.parse::<PublishMode>()?,
        },
        created_at: row.get("created_at"),
    })
}

fn row_to_release(row: PgRow) -> DbResult<Release> {
    let id_str: String = row.get("id");
    let id = ReleaseId::from_string(&id_str)
        .map_err(|e| DbError::InvalidData(format!("Invalid release ID: {}", e)))?;

    let project: String = row.get("project_name");
    let channel: String = row.get("channel_name");

    let version_str: String = row.get("version");
    let version = ReleaseVersion::parse(&version_str)
        .map_err(|e| DbError::InvalidData(format!("Invalid version: {}", e)))?;

    let checksum_str: String = row.get("checksum");
    let checksum = Checksum::parse(&checksum_str)?;

    let content_ref_str: String = row.get("content_ref");
    let content_ref = ContentRef::parse(&content_ref_str)?;

    let size_bytes: i64 = row.get("size_bytes");
    let published_at: DateTime<Utc> = row.get("published_at");

    Ok(Release {
        id,
        project: ProjectName::new(project)?,
        channel: ChannelName::new(channel)?,
        version,
        title: row.get("title"),
        changelog: row.get("changelog"),
        checksum,
        content_ref,
        size_bytes: u64::try_from(size_bytes)
            .map_err(|_| DbError::InvalidData(format!("Negative artifact size: {}", size_bytes)))?,
        published_at,
        deprecated: row.get("deprecated"),
    })
}
