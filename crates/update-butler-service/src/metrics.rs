//! Prometheus metrics
//!
//! Every metric is registered on a registry owned by [`ServiceMetrics`]
//! rather than the process-global default, so independent service
//! instances (one per test, for example) never collide on registration.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::{ServiceError, ServiceResult};

/// Metric namespace prefix
pub const NAMESPACE: &str = "update_butler";

/// Service metrics collection
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,

    /// Publish attempts by outcome (`committed`, `rejected`, `failed`)
    pub publishes_total: IntCounterVec,

    /// Publish pipeline duration
    pub publish_duration: Histogram,

    /// Update checks by outcome (`update_available`, `up_to_date`, `not_found`, `failed`)
    pub resolutions_total: IntCounterVec,

    /// Artifact downloads by outcome (`served`, `corrupt`, `not_found`, `failed`)
    pub downloads_total: IntCounterVec,

    /// Notification deliveries by sink and outcome (`delivered`, `failed`, `dropped`)
    pub notifications_total: IntCounterVec,

    /// Events waiting in the notification queue
    pub notification_queue_depth: IntGauge,

    /// HTTP requests by method, route and status
    pub http_requests_total: IntCounterVec,

    /// HTTP request duration by method and route
    pub http_request_duration: HistogramVec,
}

impl ServiceMetrics {
    /// Create and register all metrics on a fresh registry
    pub fn new() -> ServiceResult<Self> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)
            .map_err(metrics_error)?;

        let publishes_total = IntCounterVec::new(
            Opts::new("publishes_total", "Publish attempts by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;

        let publish_duration = Histogram::with_opts(
            HistogramOpts::new("publish_duration_seconds", "Publish pipeline duration in seconds")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .map_err(metrics_error)?;

        let resolutions_total = IntCounterVec::new(
            Opts::new("resolutions_total", "Update checks by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;

        let downloads_total = IntCounterVec::new(
            Opts::new("downloads_total", "Artifact downloads by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notification deliveries by sink and outcome"),
            &["sink", "outcome"],
        )
        .map_err(metrics_error)?;

        let notification_queue_depth = IntGauge::new(
            "notification_queue_depth",
            "Events waiting in the notification queue",
        )
        .map_err(metrics_error)?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "route", "status"],
        )
        .map_err(metrics_error)?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["method", "route"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(publishes_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(publish_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(resolutions_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(downloads_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(notifications_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(notification_queue_depth.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(http_requests_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(http_request_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            publishes_total,
            publish_duration,
            resolutions_total,
            downloads_total,
            notifications_total,
            notification_queue_depth,
            http_requests_total,
            http_request_duration,
        })
    }

    /// The underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a publish outcome
    pub fn record_publish(&self, outcome: &str, seconds: f64) {
        self.publishes_total.with_label_values(&[outcome]).inc();
        self.publish_duration.observe(seconds);
    }

    /// Record an update check outcome
    pub fn record_resolution(&self, outcome: &str) {
        self.resolutions_total.with_label_values(&[outcome]).inc();
    }

    /// Record a download outcome
    pub fn record_download(&self, outcome: &str) {
        self.downloads_total.with_label_values(&[outcome]).inc();
    }

    /// Record a notification outcome
    pub fn record_notification(&self, sink: &str, outcome: &str) {
        self.notifications_total
            .with_label_values(&[sink, outcome])
            .inc();
    }

    /// Record a completed HTTP request
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, seconds: f64) {
        self.http_requests_total
            .with_label_values(&[method, route, &status.to_string()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, route])
            .observe(seconds);
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> ServiceResult<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(metrics_error)?;

        String::from_utf8(buffer)
            .map_err(|e| ServiceError::Internal(format!("Metrics are not UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for ServiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMetrics").finish_non_exhaustive()
    }
}

fn metrics_error(err: prometheus::Error) -> ServiceError {
    ServiceError::Internal(format!("Metrics error: {}", err))
}
