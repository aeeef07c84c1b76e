//! Logging initialization for suites driving the lifecycle controller
//!
//! Provides a single entry point that installs a `tracing` subscriber with an
//! `EnvFilter` (honouring `RUST_LOG`) and either JSON structured output for CI
//! log collection or compact human-readable output for local runs.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,keel=debug";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log filter directive could not be parsed
    #[error("invalid log filter {filter:?}: {message}")]
    InvalidFilter {
        /// The offending directive
        filter: String,
        /// Parser error
        message: String,
    },

    /// A global subscriber was already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format for log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Compact single-line text
    Compact,
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// Human-readable output, for local runs
    pub fn compact() -> Self {
        Self {
            format: LogFormat::Compact,
            ..Default::default()
        }
    }

    /// Build the filter, preferring `RUST_LOG` over the configured default
    pub fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.default_filter).map_err(|e| TelemetryError::InvalidFilter {
            filter: self.default_filter.clone(),
            message: e.to_string(),
        })
    }
}

/// Install the global tracing subscriber
///
/// Fails with [`TelemetryError::SubscriberInit`] if a subscriber is already
/// installed, so test binaries that initialize more than once can ignore the
/// error.
pub fn init_logging(config: LogConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;

    let (json_layer, compact_layer) = match config.format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        ),
        LogFormat::Compact => (
            None,
            Some(tracing_subscriber::fmt::layer().compact().with_target(false)),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    Ok(())
}
