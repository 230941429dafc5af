//! Logging initialization.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Initialize the tracing subscriber from the logging config.
///
/// `RUST_LOG` overrides the configured level. An unrecognized format name
/// falls back to the human-readable default and is reported once the
/// subscriber is up.
pub fn init(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = fmt().with_env_filter(filter);

    match config.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        "pretty" => builder.init(),
        other => {
            builder.init();
            tracing::warn!(format = other, "unknown log format, using pretty");
        }
    }
}
