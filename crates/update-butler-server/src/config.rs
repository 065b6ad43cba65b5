//! Layered server settings
//!
//! `config/default.toml`, then `config/{environment}.toml`, then
//! `UPDATE_BUTLER__SECTION__KEY` variables. Command-line flags are applied
//! on top in `main`. Every section falls back to its `Default` when absent.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use update_butler_api::{CorsConfig, RateLimitConfig};
use update_butler_core::ChannelPolicyTable;
use update_butler_db::PoolConfig;
use update_butler_service::{
    DispatcherConfig, GitHubHook, RetryPolicy, DEFAULT_ASSET_FETCH_TIMEOUT,
    DEFAULT_MAX_PAYLOAD_BYTES,
};

const ENV_PREFIX: &str = "UPDATE_BUTLER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub channels: ChannelPolicyTable,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub notifications: NotificationConfig,
    pub webhooks: WebhookConfig,
    /// Applied to catalog and artifact store calls
    pub retry: RetryPolicy,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin placed in download links; derived from host and port when unset
    pub public_base_url: Option<String>,
    pub graceful_shutdown: bool,
    /// Grace period for queued notifications once the listener stops
    pub shutdown_timeout_seconds: u64,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 19050,
            public_base_url: None,
            graceful_shutdown: true,
            shutdown_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    /// Lost on restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Postgres,
            url: "postgresql://localhost/update_butler".to_string(),
            max_connections: 25,
            min_connections: 1,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            max_lifetime_seconds: 1800,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(&self.url)
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .connect_timeout(Duration::from_secs(self.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(self.max_lifetime_seconds))
            .run_migrations(self.run_migrations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Content-addressed files under `root_path`
    Filesystem,
    /// Lost on restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root_path: PathBuf,
    /// Uploads and fetched assets above this size are refused
    pub max_payload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Filesystem,
            root_path: PathBuf::from("data/artifacts"),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer tokens accepted on publish; none configured means no HTTP publishing
    pub publish_tokens: Vec<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("publish_tokens", &self.publish_tokens.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Discord-compatible endpoint; without one announcements are only logged
    pub webhook_url: Option<String>,
    pub username: Option<String>,
    pub timeout_seconds: u64,
    pub queue_capacity: usize,
    pub retry_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            username: None,
            timeout_seconds: 10,
            queue_capacity: 1024,
            retry_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl NotificationConfig {
    pub fn dispatcher(&self) -> DispatcherConfig {
        let retry = RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        );
        DispatcherConfig {
            queue_capacity: self.queue_capacity,
            retry,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// One entry per project accepting GitHub release events
    pub github: Vec<GitHubHook>,
    pub asset_fetch_timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            github: Vec::new(),
            asset_fetch_timeout_seconds: DEFAULT_ASSET_FETCH_TIMEOUT.as_secs(),
        }
    }
}

impl WebhookConfig {
    pub fn asset_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.asset_fetch_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,
    pub json_format: bool,
    pub include_thread_ids: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

impl ServerConfig {
    /// Merge the config directory and the environment; missing files are skipped
    pub fn load(config_dir: impl AsRef<Path>, environment: &str) -> Result<Self, ConfigError> {
        let dir = config_dir.as_ref();

        Config::builder()
            .add_source(File::from(dir.join("default.toml")).required(false))
            .add_source(File::from(dir.join(format!("{environment}.toml"))).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn public_base_url(&self) -> String {
        match &self.server.public_base_url {
            Some(url) => url.clone(),
            None => format!("http://{}", self.bind_address()),
        }
    }
}
