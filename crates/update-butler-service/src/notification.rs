//! Release notifications
//!
//! Publishing hands events to a [`NotificationDispatcher`], which owns a
//! bounded queue drained by a single background task. The task delivers
//! each event to the configured [`NotificationSink`], retrying transient
//! failures with bounded backoff. Events that exhaust their attempts are
//! dropped and logged; they never surface to the publisher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use update_butler_core::{EventType, ReleaseEvent};
use url::Url;

use crate::dto::DownloadLinks;
use crate::metrics::ServiceMetrics;
use crate::retry::{retry_with_jitter, RetryPolicy};

/// Discord limits embed descriptions to 4096 characters
const MAX_EMBED_DESCRIPTION: usize = 4000;

/// Failure to deliver a notification
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The destination may accept the event later
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The destination rejected the event
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// Destination for release events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    /// Deliver one event
    async fn deliver(&self, event: &ReleaseEvent) -> Result<(), DeliveryError>;
}

/// Sink that only writes events to the log
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &ReleaseEvent) -> Result<(), DeliveryError> {
        let release = event.release();
        info!(
            event = event.event_name(),
            project = %release.project,
            channel = %release.channel,
            version = %release.version,
            checksum = %release.checksum,
            "Release notification"
        );
        Ok(())
    }
}

/// Sink posting Discord-compatible webhook embeds
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
    username: Option<String>,
    links: DownloadLinks,
}

impl WebhookSink {
    /// Create a webhook sink
    pub fn new(
        url: impl Into<String>,
        username: Option<String>,
        links: DownloadLinks,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let url: String = url.into();
        let url = Url::parse(&url).map_err(|e| {
            DeliveryError::Permanent(format!("Invalid webhook URL '{}': {}", url, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("update-butler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeliveryError::Permanent(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            username,
            links,
        })
    }

    /// JSON body for an event
    pub fn payload(&self, event: &ReleaseEvent) -> serde_json::Value {
        let release = event.release();
        let download_url = self.links.release_download(release);

        let (heading, color) = match &event.event_type {
            EventType::ReleasePublished { .. } => (
                format!("{}/{} {}", release.project, release.channel, release.version),
                0x2ecc71,
            ),
            EventType::ReleaseDeprecated { .. } => (
                format!(
                    "{}/{} {} deprecated",
                    release.project, release.channel, release.version
                ),
                0xe74c3c,
            ),
        };

        let description = if release.changelog.trim().is_empty() {
            "No patch notes provided.".to_string()
        } else {
            truncate_chars(&release.changelog, MAX_EMBED_DESCRIPTION)
        };

        let mut fields = Vec::new();
        if let Some(title) = &release.title {
            fields.push(json!({ "name": "Title", "value": title, "inline": false }));
        }
        fields.push(json!({
            "name": "Version",
            "value": release.version.to_string(),
            "inline": true,
        }));
        fields.push(json!({ "name": "Download", "value": download_url, "inline": false }));
        fields.push(json!({
            "name": "Checksum Sha256",
            "value": release.checksum.as_str(),
            "inline": false,
        }));

        let mut body = json!({
            "embeds": [{
                "title": heading,
                "url": download_url,
                "description": description,
                "color": color,
                "fields": fields,
                "timestamp": event.timestamp.to_rfc3339(),
            }]
        });

        if let Some(username) = &self.username {
            body["username"] = json!(username);
        }

        body
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &ReleaseEvent) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&self.payload(event))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(DeliveryError::Transient(format!("Webhook returned {}", status)))
        } else {
            Err(DeliveryError::Permanent(format!("Webhook returned {}", status)))
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum queued events before new ones are dropped
    pub queue_capacity: usize,

    /// Delivery retry policy
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            retry: RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Events accepted into the queue
    pub enqueued: u64,
    /// Events delivered
    pub delivered: u64,
    /// Events dropped after exhausting attempts
    pub failed: u64,
    /// Events rejected because the queue was full or closed
    pub dropped: u64,
}

/// Background notification dispatcher
pub struct NotificationDispatcher {
    sender: mpsc::Sender<ReleaseEvent>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    sink_name: String,
    metrics: ServiceMetrics,
}

impl NotificationDispatcher {
    /// Start the background worker on the current tokio runtime
    pub fn spawn(
        sink: Arc<dyn NotificationSink>,
        config: DispatcherConfig,
        metrics: ServiceMetrics,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());
        let sink_name = sink.name().to_string();

        let worker = tokio::spawn(run_worker(
            receiver,
            shutdown_rx,
            sink,
            config.retry,
            Arc::clone(&counters),
            metrics.clone(),
        ));

        info!(
            sink = %sink_name,
            capacity = config.queue_capacity,
            "Notification dispatcher started"
        );

        Self {
            sender,
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
            counters,
            sink_name,
            metrics,
        }
    }

    /// Queue an event for delivery without waiting
    pub fn notify(&self, event: ReleaseEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                self.metrics.notification_queue_depth.inc();
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_notification(&self.sink_name, "dropped");
                error!(event = %event, "Notification queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_notification(&self.sink_name, "dropped");
                warn!(event = %event, "Notification dispatcher stopped, dropping event");
            }
        }
    }

    /// Stop accepting events and wait until queued ones are processed
    pub async fn shutdown(&self) {
        if let Some(signal) = self.shutdown.lock().await.take() {
            let _ = signal.send(());
        }

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "Notification worker terminated abnormally");
            }
        }

        info!(stats = ?self.stats(), "Notification dispatcher stopped");
    }

    /// Current counters
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Name of the sink events are delivered to
    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("sink", &self.sink_name)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<ReleaseEvent>,
    mut shutdown: oneshot::Receiver<()>,
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
    counters: Arc<Counters>,
    metrics: ServiceMetrics,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                receiver.close();
                while let Some(event) = receiver.recv().await {
                    deliver(sink.as_ref(), &retry, &counters, &metrics, event).await;
                }
                break;
            }
            next = receiver.recv() => match next {
                Some(event) => deliver(sink.as_ref(), &retry, &counters, &metrics, event).await,
                None => break,
            },
        }
    }

    debug!("Notification worker exited");
}

async fn deliver(
    sink: &dyn NotificationSink,
    retry: &RetryPolicy,
    counters: &Counters,
    metrics: &ServiceMetrics,
    event: ReleaseEvent,
) {
    metrics.notification_queue_depth.dec();

    let result = retry_with_jitter(retry, "notification", DeliveryError::is_transient, || {
        sink.deliver(&event)
    })
    .await;

    match result {
        Ok(()) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
            metrics.record_notification(sink.name(), "delivered");
            info!(event = %event, sink = sink.name(), "Notification dispatched");
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            metrics.record_notification(sink.name(), "failed");
            error!(
                event = %event,
                sink = sink.name(),
                error = %e,
                "Notification delivery failed, dropping event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use update_butler_core::{ChannelName, Checksum, ProjectName, Release, ReleaseVersion};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event(version: &str) -> ReleaseEvent {
        let release = Release::builder(
            ProjectName::new("demo").unwrap(),
            ChannelName::new("stable").unwrap(),
            ReleaseVersion::parse(version).unwrap(),
            Checksum::compute(version.as_bytes()),
            4,
        )
        .title(Some("Spring update".to_string()))
        .changelog("Fixed things")
        .build()
        .unwrap();
        ReleaseEvent::published(release)
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: 16,
            retry: RetryPolicy::new(4, Duration::from_millis(1), Duration::from_millis(5)),
        }
    }

    fn spawn(sink: Arc<dyn NotificationSink>) -> NotificationDispatcher {
        NotificationDispatcher::spawn(sink, fast_config(), ServiceMetrics::new().unwrap())
    }

    /// Fails a fixed number of times, then records deliveries
    struct FlakySink {
        failures_left: AtomicU32,
        attempts: AtomicU32,
        delivered: std::sync::Mutex<Vec<String>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
                delivered: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, event: &ReleaseEvent) -> Result<(), DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(DeliveryError::Transient("unreachable".to_string()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push(event.release().version.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_two_failures_then_success_delivers_once() {
        let sink = Arc::new(FlakySink::new(2));
        let dispatcher = spawn(sink.clone());

        dispatcher.notify(event("1.0.0"));
        dispatcher.shutdown().await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["1.0.0".to_string()]);

        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_drop_event() {
        let sink = Arc::new(FlakySink::new(100));
        let dispatcher = spawn(sink.clone());

        dispatcher.notify(event("1.0.0"));
        dispatcher.shutdown().await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 4);
        assert!(sink.delivered.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_notify_after_shutdown_is_dropped() {
        let dispatcher = NotificationDispatcher::spawn(
            Arc::new(LogSink),
            fast_config(),
            ServiceMetrics::new().unwrap(),
        );
        dispatcher.shutdown().await;

        dispatcher.notify(event("1.0.0"));
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let sink = Arc::new(FlakySink::new(0));
        let dispatcher = spawn(sink.clone());

        for v in ["1.0.0", "1.1.0", "1.2.0"] {
            dispatcher.notify(event(v));
        }
        dispatcher.shutdown().await;

        let mut delivered = sink.delivered.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, vec!["1.0.0", "1.1.0", "1.2.0"]);
    }

    #[test]
    fn test_webhook_payload() {
        let sink = WebhookSink::new(
            "http://localhost/hook",
            Some("UpdateButler".to_string()),
            DownloadLinks::new("https://updates.example.com"),
            Duration::from_secs(5),
        )
        .unwrap();

        let event = event("1.0.0");
        let body = sink.payload(&event);
        let embed = &body["embeds"][0];

        assert_eq!(body["username"], "UpdateButler");
        assert_eq!(embed["title"], "demo/stable 1.0.0");
        assert_eq!(embed["description"], "Fixed things");
        let fields = embed["fields"].as_array().unwrap();
        let checksum = event.release().checksum.as_str();
        assert!(fields
            .iter()
            .any(|f| f["name"] == "Checksum Sha256" && f["value"] == checksum));
        let download = concat!(
            "https://updates.example.com",
            "/v1/projects/demo/channels/stable/releases/1.0.0/download"
        );
        assert!(fields.iter().any(|f| f["value"] == download));
    }

    #[tokio::test]
    async fn test_webhook_retries_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(
            format!("{}/hook", server.uri()),
            None,
            DownloadLinks::default(),
            Duration::from_secs(5),
        )
        .unwrap();

        let dispatcher = spawn(Arc::new(sink));
        dispatcher.notify(event("2.0.0"));
        dispatcher.shutdown().await;

        assert_eq!(dispatcher.stats().delivered, 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_webhook_client_error_is_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(
            server.uri(),
            None,
            DownloadLinks::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = sink.deliver(&event("1.0.0")).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 6), "abc...");
    }
}
