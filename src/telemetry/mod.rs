//! Tracing subscriber setup.
//!
//! | Setting | Description | Default |
//! |---------|-------------|---------|
//! | `RUST_LOG` | Filter directives, wins over `logging.level` | unset |
//! | `LOGGING__LEVEL` | Fallback filter | `info` |
//! | `LOGGING__FORMAT` | `text` or `json` | `text` |

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Telemetry-specific error type
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),
    #[error("Unknown log format '{0}' (expected 'text' or 'json')")]
    UnknownFormat(String),
    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> TelemetryResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

fn build_filter(config: &LoggingConfig) -> TelemetryResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| TelemetryError::InvalidFilter(config.level.clone(), e.to_string())),
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(config: &LoggingConfig) -> TelemetryResult<()> {
    let format = LogFormat::parse(&config.format)?;
    let env_filter = build_filter(config)?;

    let result = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(format = ?format, "Tracing initialized");
    Ok(())
}
