#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod event;
pub mod format;
pub mod logger;
pub mod metrics;
pub mod pool;
pub mod sink;

// --- re-exports ---

// errors
pub use error::{ConfigError, RelayError, SinkError};

// config
pub use config::RelayConfig;

// events
pub use event::{Fields, Level, LogEvent, TraceContext};

// delivery
pub use format::{Formatter, JsonFormatter, TextFormatter};
pub use sink::{SharedSink, Sink};

// pools
pub use pool::{BufferPool, EventPool, PoolStats};

// logger
pub use logger::{Logger, LoggerBuilder, default_logger, init_default};
