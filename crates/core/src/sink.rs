//! Sink trait, the single capability every delivery stage implements.
//!
//! Endpoints (console, file) and policy wrappers (dispatcher, breaker,
//! sampling, rotation) all implement [`Sink`]. Wrappers hold one inner
//! `Arc<dyn Sink>` and add one policy, so stacks are built by composition:
//!
//! ```text
//! SamplingSink -> BreakerSink -> AsyncDispatcher -> RotatingFileSink
//! ```

use std::sync::Arc;

use crate::error::SinkError;
use crate::event::LogEvent;

/// A delivery endpoint or delivery-policy wrapper.
///
/// `deliver` borrows the event; a sink that needs to keep it past the call
/// (the async dispatcher) copies it into storage it owns.
pub trait Sink: Send + Sync {
    /// Sink name used in errors, logs and health reports.
    fn name(&self) -> &str;

    /// Delivers one event.
    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        (**self).deliver(event)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        (**self).deliver(event)
    }
}

/// Shared, type-erased sink handle.
pub type SharedSink = Arc<dyn Sink>;
