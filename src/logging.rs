//! Tracing subscriber setup

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once is harmless; later calls keep the first subscriber.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.json {
        fmt().json().with_env_filter(filter).with_target(true).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };

    if result.is_ok() {
        tracing::debug!("Tracing initialized (level={}, json={})", config.level, config.json);
    }
}
