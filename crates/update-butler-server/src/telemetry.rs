//! Log output for the server binary

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// `RUST_LOG` wins over the configured level
fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

/// Install the global subscriber; JSON lines in production, plain text otherwise
pub fn init(logging: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(logging));

    let layer = fmt::layer()
        .with_timer(fmt::time::SystemTime)
        .with_target(logging.include_target)
        .with_thread_ids(logging.include_thread_ids);

    if logging.json_format {
        registry
            .with(layer.json().with_current_span(true).with_span_list(false))
            .init();
    } else {
        registry.with(layer).init();
    }
}
