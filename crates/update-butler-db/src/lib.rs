//! Persistence layer for UpdateButler
//!
//! This crate provides the two stores behind the release service:
//! - A release catalog that is the source of truth for which releases exist,
//!   with PostgreSQL and in-memory implementations
//! - A content-addressed artifact store keyed by SHA-256, with filesystem
//!   and in-memory implementations
//! - Connection pool management and schema migrations
//!
//! # Example
//!
//! ```rust,no_run
//! use update_butler_db::{create_pool, FsArtifactStore, PoolConfig, PostgresReleaseCatalog};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PoolConfig::new("postgres://localhost/update_butler").max_connections(25);
//! let pool = create_pool(&config).await?;
//!
//! let catalog = PostgresReleaseCatalog::new(pool);
//! let artifacts = FsArtifactStore::open("/var/lib/update-butler/artifacts").await?;
//! # Ok(())
//! # }
//! ```

// Re-export core domain types for convenience
pub use update_butler_core;

pub mod artifact_store;
pub mod catalog;
pub mod error;
pub mod memory;
pub mod pool;
pub mod postgres;

pub use artifact_store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore, StoredArtifact};
#[cfg(any(test, feature = "mocks"))]
pub use catalog::MockReleaseCatalog;
pub use catalog::{ReleaseCatalog, ReleasePage, ReleaseQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use error::{DbError, DbResult};
pub use memory::InMemoryReleaseCatalog;
pub use pool::{create_pool, run_migrations, verify_pool_health, PoolConfig};
pub use postgres::PostgresReleaseCatalog;

// Re-export sqlx types that users may need
pub use sqlx::postgres::PgPool;

/// Persistence layer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default database URL environment variable name
pub const DEFAULT_DATABASE_URL_ENV: &str = "DATABASE_URL";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_trait_objects() {
        use std::sync::Arc;

        let _catalog: Arc<dyn ReleaseCatalog> = Arc::new(InMemoryReleaseCatalog::new());
        let _store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::new());
    }
}
