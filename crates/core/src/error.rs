//! Error types, one enum per domain.
//!
//! [`SinkError`] is the outcome type of every [`Sink`](crate::sink::Sink)
//! delivery. [`RelayError`] is the top-level error that every crate in the
//! workspace converts into with `?`.

/// Top-level relaylog error.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Delivery error from a sink
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Pipeline construction or lifecycle error
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Default logger error
    #[error("logger error: {0}")]
    Logger(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Config file could not be parsed
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A config value is out of range or unknown
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Outcome of a failed delivery.
///
/// Wrapper sinks propagate the inner sink's error unchanged. The only error
/// a wrapper produces on its own is [`SinkError::Unavailable`] (circuit
/// breaker open) and [`SinkError::Closed`] (use after close).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The downstream endpoint rejected the event
    #[error("delivery failed on sink '{sink}': {reason}")]
    Delivery { sink: String, reason: String },

    /// Fast-fail rejection, the wrapped sink was not invoked
    #[error("sink '{sink}' is unavailable: circuit breaker open")]
    Unavailable { sink: String },

    /// The sink has been closed or shut down
    #[error("sink '{sink}' is closed")]
    Closed { sink: String },

    /// The formatter could not render the event
    #[error("format error: {0}")]
    Format(String),

    /// I/O error while writing or rotating
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Shorthand for a [`SinkError::Delivery`].
    pub fn delivery(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Delivery {
            sink: sink.into(),
            reason: reason.into(),
        }
    }

    /// `true` for a breaker fast-fail, as opposed to a real delivery failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// `true` when the sink refused because it was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(err.to_string())
    }
}
