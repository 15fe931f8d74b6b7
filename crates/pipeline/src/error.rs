//! Pipeline error type
//!
//! [`PipelineError`] covers construction and lifecycle failures of the
//! delivery stages. Per-event failures are [`SinkError`]s. Both convert into
//! [`RelayError`] so callers can use `?` throughout.

use relaylog_core::error::{ConfigError, RelayError, SinkError};

/// Construction and lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid construction parameter
    #[error("config error: {field}: {reason}")]
    Config {
        /// Parameter name
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// A worker thread could not be spawned
    #[error("failed to spawn worker '{name}': {source}")]
    Spawn {
        /// Thread name
        name: String,
        /// OS error
        source: std::io::Error,
    },

    /// The health monitor loop is already running
    #[error("health monitor already running")]
    AlreadyRunning,

    /// No async runtime to run the health monitor on
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Delivery error surfaced during setup or shutdown
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::Config`].
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidValue { field, reason } => Self::Config { field, reason },
            other => Self::config("config", other.to_string()),
        }
    }
}

impl From<PipelineError> for RelayError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Config { field, reason } => {
                RelayError::Config(ConfigError::InvalidValue { field, reason })
            }
            PipelineError::Sink(e) => RelayError::Sink(e),
            PipelineError::Io(e) => RelayError::Io(e),
            other => RelayError::Pipeline(other.to_string()),
        }
    }
}
