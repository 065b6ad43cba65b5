//! `update-butler-server`
//!
//! Wires the release catalog, artifact store and notification sink into a
//! `ServiceRegistry` and serves the HTTP API until SIGINT or SIGTERM.

mod config;
mod telemetry;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use update_butler_api::{build_api_server, AppState, MiddlewareConfig, PublishAuth, RouteConfig};
use update_butler_db::{
    create_pool, ArtifactStore, FsArtifactStore, InMemoryArtifactStore, InMemoryReleaseCatalog,
    PostgresReleaseCatalog, ReleaseCatalog,
};
use update_butler_service::{
    DownloadLinks, LogSink, NotificationSink, PublishLimits, ServiceRegistry,
    ServiceRegistryBuilder, WebhookSink,
};

use config::{DatabaseBackend, ServerConfig, StorageBackend};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: String,

    #[arg(short, long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

impl Args {
    /// Flags take precedence over every config source
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = ServerConfig::load(&args.config_dir, &args.environment)
        .with_context(|| format!("Failed to load configuration from {}", args.config_dir))?;
    args.apply(&mut config);

    telemetry::init(&config.logging);
    info!(
        environment = %args.environment,
        bind = %config.bind_address(),
        "Starting UpdateButler"
    );

    let services = build_services(&config).await?;

    let report = services.health_check().await;
    if !report.is_healthy() {
        bail!(
            "Backing stores are unhealthy (catalog: {:?}, artifacts: {:?})",
            report.catalog.message,
            report.artifacts.message
        );
    }

    if config.auth.publish_tokens.is_empty() {
        warn!("No publish tokens configured; publishing over HTTP is disabled");
    }

    let routes = RouteConfig::new()
        .with_auth(PublishAuth::new(&config.auth.publish_tokens))
        .with_rate_limit(config.rate_limit.clone())
        .with_max_payload_bytes(config.storage.max_payload_bytes);
    let middleware = MiddlewareConfig::new().with_cors(config.cors.clone());
    let app = build_api_server(AppState::new(services.clone()), routes, middleware);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .context("Invalid HTTP bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    // Peer addresses feed the download rate limiter
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let served = if config.server.graceful_shutdown {
        axum::serve(listener, make_service)
            .with_graceful_shutdown(shutdown_signal())
            .await
    } else {
        axum::serve(listener, make_service).await
    };
    served.context("HTTP server failed")?;

    let grace = Duration::from_secs(config.server.shutdown_timeout_seconds);
    info!(grace_seconds = grace.as_secs(), "Draining notification queue");
    if tokio::time::timeout(grace, services.shutdown()).await.is_err() {
        warn!("Notification queue still busy at shutdown deadline");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn open_catalog(config: &ServerConfig) -> Result<Arc<dyn ReleaseCatalog>> {
    match config.database.backend {
        DatabaseBackend::Postgres => {
            let pool_config = config
                .database
                .pool_config()
                .log_statements(config.logging.level == "trace");
            let pool = create_pool(&pool_config)
                .await
                .context("Failed to connect release catalog")?;
            Ok(Arc::new(PostgresReleaseCatalog::new(pool)))
        }
        DatabaseBackend::Memory => {
            warn!("Release catalog is in memory; releases are lost on restart");
            Ok(Arc::new(InMemoryReleaseCatalog::new()))
        }
    }
}

async fn open_artifacts(config: &ServerConfig) -> Result<Arc<dyn ArtifactStore>> {
    match config.storage.backend {
        StorageBackend::Filesystem => {
            let root = &config.storage.root_path;
            info!(root = %root.display(), "Opening artifact store");
            let store = FsArtifactStore::open(root)
                .await
                .context("Failed to open artifact store")?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("Artifact store is in memory; artifacts are lost on restart");
            Ok(Arc::new(InMemoryArtifactStore::new()))
        }
    }
}

fn notification_sink(
    config: &ServerConfig,
    links: &DownloadLinks,
) -> Result<Arc<dyn NotificationSink>> {
    let notifications = &config.notifications;
    let Some(url) = &notifications.webhook_url else {
        info!("No notification webhook; announcements are logged only");
        return Ok(Arc::new(LogSink));
    };

    let sink = WebhookSink::new(
        url.as_str(),
        notifications.username.clone(),
        links.clone(),
        notifications.timeout(),
    )
    .context("Invalid notification webhook")?;
    Ok(Arc::new(sink))
}

async fn build_services(config: &ServerConfig) -> Result<ServiceRegistry> {
    let links = DownloadLinks::new(config.public_base_url());

    let services = ServiceRegistryBuilder::new()
        .catalog(open_catalog(config).await?)
        .artifacts(open_artifacts(config).await?)
        .sink(notification_sink(config, &links)?)
        .policies(config.channels.clone())
        .limits(PublishLimits {
            max_payload_bytes: config.storage.max_payload_bytes,
        })
        .retry(config.retry.clone())
        .dispatcher(config.notifications.dispatcher())
        .links(links)
        .github_hooks(config.webhooks.github.clone())
        .asset_fetch_timeout(config.webhooks.asset_fetch_timeout())
        .build()
        .context("Failed to build services")?;

    info!(
        github_hooks = config.webhooks.github.len(),
        "Services ready"
    );
    Ok(services)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(signal = received, "Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.database.backend = DatabaseBackend::Memory;
        config.storage.backend = StorageBackend::Memory;
        config
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "update-butler-server",
            "--port",
            "9000",
            "--database-url",
            "postgres://db/butler",
        ]);
        let mut config = ServerConfig::default();
        args.apply(&mut config);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.url, "postgres://db/butler");
    }

    #[tokio::test]
    async fn test_build_services_in_memory() {
        let services = build_services(&memory_config()).await.unwrap();
        assert!(services.health_check().await.is_healthy());
        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_webhook_url_is_rejected() {
        let mut config = memory_config();
        config.notifications.webhook_url = Some("not a url".to_string());

        assert!(build_services(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_build_services_with_filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = memory_config();
        config.storage.backend = StorageBackend::Filesystem;
        config.storage.root_path = dir.path().join("artifacts");

        let services = build_services(&config).await.unwrap();
        assert!(services.health_check().await.is_healthy());
        services.shutdown().await;
    }
}
