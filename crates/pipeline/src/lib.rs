#![doc = include_str!("../README.md")]
//!
//! # Modules
//!
//! - [`writer`], [`file`]: console/writer and append-only file endpoints
//! - [`rotating`]: size-based rotating file endpoint
//! - [`multi`]: fan-out to several sinks
//! - [`dispatcher`]: bounded queue + worker threads with synchronous fallback
//! - [`breaker`]: closed/open/half-open circuit breaker and its sink wrapper
//! - [`sampling`]: deterministic counter-based sampling
//! - [`health`]: periodic health monitor and stock checks
//! - [`stack`]: builds a composed stack from `RelayConfig`
//! - [`error`]: construction and lifecycle errors
//!
//! # Architecture
//!
//! ```text
//! Logger -> SamplingSink -> BreakerSink -> AsyncDispatcher -> RotatingFileSink
//!                                              |  workers
//!                                          EventPool (pooled copies)
//! HealthMonitor --probes--> sink / breaker / dispatcher
//! ```

pub mod breaker;
pub mod dispatcher;
pub mod error;
pub mod file;
pub mod health;
pub mod multi;
pub mod rotating;
pub mod sampling;
pub mod stack;
pub mod writer;

// --- re-exports ---

// errors
pub use error::PipelineError;

// endpoints
pub use file::FileSink;
pub use multi::MultiSink;
pub use rotating::{RotatingFileSink, RotationPolicy};
pub use writer::WriterSink;

// wrappers
pub use breaker::{BreakerConfig, BreakerSink, CircuitBreaker, CircuitState};
pub use dispatcher::{AsyncDispatcher, DispatcherConfig, DispatcherStats};
pub use sampling::SamplingSink;

// health
pub use health::{
    BreakerHealthCheck, CheckOutcome, DispatcherHealthCheck, HealthCheck, HealthMonitor,
    HealthMonitorConfig, HealthReport, HealthResult, HealthStatus, SinkHealthCheck,
};

// assembly
pub use stack::{BaseSink, SinkStack, SinkStackBuilder};
