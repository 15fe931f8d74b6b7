//! CLI error type and exit code mapping.

use relaylog_core::error::RelayError;
use relaylog_pipeline::PipelineError;

/// Errors surfaced by the `relaylog` binary.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Stack construction or lifecycle failure.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Logger construction failure.
    #[error("{0}")]
    Relay(RelayError),

    /// Producer or monitor task failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// JSON serialisation failed during report rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RelayError> for CliError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Config(e) => Self::Config(e.to_string()),
            other => Self::Relay(other),
        }
    }
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                      |
    /// |------|------------------------------|
    /// | 0    | Success                      |
    /// | 1    | Pipeline or runtime error    |
    /// | 2    | Configuration error          |
    /// | 10   | IO error                     |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Pipeline(PipelineError::Config { .. }) => 2,
            Self::Io(_) => 10,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaylog_core::error::ConfigError;

    #[test]
    fn config_errors_exit_with_2() {
        let err: CliError = RelayError::from(ConfigError::InvalidValue {
            field: "dispatcher.workers".to_owned(),
            reason: "must be 1-256".to_owned(),
        })
        .into();
        assert!(matches!(err, CliError::Config(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("dispatcher.workers"));

        let err = CliError::from(PipelineError::config("rate", "must be within 0.0-1.0"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn other_errors() {
        assert_eq!(CliError::Runtime("join".to_owned()).exit_code(), 1);
        assert_eq!(
            CliError::Relay(RelayError::Logger("no sink".to_owned())).exit_code(),
            1
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert_eq!(CliError::from(io).exit_code(), 10);
    }
}
