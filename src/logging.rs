//! Logging configuration and initialization.
//!
//! Every record the controller emits goes through `tracing`; this module only
//! decides the filter and the output format, once, at startup.

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Output format of log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per record, span close events included.
    Json,
}

/// The `[log]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// error, warn, info, debug or trace. Anything else reads as info.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::new(parse_level(&self.level).as_str())
    }
}

/// Installs the global subscriber.
///
/// Priority for the filter:
/// 1. RUST_LOG environment variable (if set)
/// 2. the `[log] level` of `config` (if provided)
/// 3. info
///
/// The format comes from `config`, pretty when absent. Only the first call
/// in a process takes effect.
pub fn init_logging(config: Option<&LogConfig>) {
    let env_filter = match config {
        _ if std::env::var("RUST_LOG").is_ok() => EnvFilter::from_default_env(),
        Some(cfg) => cfg.filter(),
        None => EnvFilter::new("info"),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    // Err only when a subscriber is already installed.
    let _ = match config.map(|c| c.format).unwrap_or_default() {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE),
            ),
        ),
        LogFormat::Compact => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().compact()),
        ),
        LogFormat::Pretty => {
            tracing::subscriber::set_global_default(registry.with(tracing_subscriber::fmt::layer()))
        }
    };
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}
