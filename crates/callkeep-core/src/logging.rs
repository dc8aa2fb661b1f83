//! Tracing subscriber setup for hosts embedding the call layer
//!
//! The `[logging]` section of [`CallKeepConfig`](crate::config::CallKeepConfig)
//! selects the default level and output format. `RUST_LOG` directives still
//! apply on top, so a host can turn up a single module without a config change.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{CallKeepError, Result};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// `[logging]` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for every target, e.g. `"info"`
    pub level: String,
    pub format: LogFormat,
    /// Also log span enter and exit
    pub spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            spans: false,
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails if the level does not parse or a subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let span_events = if config.spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| CallKeepError::config(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(
        "callkeep-core v{} logging at {} ({:?})",
        env!("CARGO_PKG_VERSION"),
        level,
        config.format
    );
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| CallKeepError::config(format!("Invalid log level: {}", level)))
}
