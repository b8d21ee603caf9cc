//! Tracing/logging initialization

use anyhow::{anyhow, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber based on configuration.
///
/// Worker threads are named, so the thread name identifies the event loop
/// (and therefore the connection manager) a line came from.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("Invalid log level {:?}: {}", config.level, e))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match config.format.as_str() {
        "json" => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE);
            subscriber.with(fmt_layer).try_init()
        }
        _ => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_span_events(FmtSpan::CLOSE);
            subscriber.with(fmt_layer).try_init()
        }
    };

    result.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
