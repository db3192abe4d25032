use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogFormat;

/// Initialize the global tracing subscriber. Called once from each binary's
/// `main`: builds the filter from `RUST_LOG` (default `info`) and switches
/// the formatter layer on `LOG_FORMAT`.
pub fn init(format: LogFormat, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(!no_color))
                .init();
        }
    }
}
