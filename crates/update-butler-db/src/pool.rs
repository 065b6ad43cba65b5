//! PostgreSQL pool for the release catalog

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

/// Pool settings, built from the `database` section of the server config
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// `postgres://` or `postgresql://` URL
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    /// How long to wait for a free connection
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Echo every statement through `tracing` at debug level
    pub log_statements: bool,
    /// Apply `migrations/` before handing out the pool
    pub run_migrations: bool,
}

impl PoolConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            min_connections: 1,
            max_connections: 25,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            log_statements: false,
            run_migrations: true,
        }
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Reject settings the pool could never satisfy
    pub fn validate(&self) -> DbResult<()> {
        let url = url::Url::parse(&self.database_url)?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(DbError::Configuration(format!(
                "catalog needs a postgres url, got scheme '{}'",
                url.scheme()
            )));
        }

        match (self.min_connections, self.max_connections) {
            (_, 0) => Err(DbError::Configuration("max_connections is 0".to_string())),
            (min, max) if min > max => Err(DbError::Configuration(format!(
                "min_connections {} exceeds max_connections {}",
                min, max
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new("postgres://localhost/update_butler")
    }
}

/// Connect, migrate and probe the catalog database
pub async fn create_pool(config: &PoolConfig) -> DbResult<PgPool> {
    config.validate()?;

    info!(
        database = %mask_password(&config.database_url),
        max_connections = config.max_connections,
        "Connecting release catalog"
    );

    let mut options = PgConnectOptions::from_str(&config.database_url)
        .map_err(|e| DbError::Configuration(e.to_string()))?;
    if !config.log_statements {
        options = options.disable_statement_logging();
    }

    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect_with(options)
        .await
        .map_err(|e| DbError::Connection(e.to_string()))?;

    if config.run_migrations {
        run_migrations(&pool).await?;
    }
    verify_pool_health(&pool).await?;

    Ok(pool)
}

/// Apply pending catalog migrations
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Catalog schema is up to date");
    Ok(())
}

/// Round-trip a trivial query
pub async fn verify_pool_health(pool: &PgPool) -> DbResult<()> {
    debug!("Probing catalog database");
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| DbError::Connection(e.to_string()))?;
    Ok(())
}

/// Hide the password of a database URL before it reaches the logs
pub(crate) fn mask_password(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}
