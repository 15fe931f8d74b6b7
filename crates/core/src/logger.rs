//! Logger handle.
//!
//! A [`Logger`] stamps events with level, time, default fields, trace
//! linkage and (optionally) the call site, then hands them to one sink.
//! Events come from an [`EventPool`] and go back to it once the sink returns.
//!
//! There is no implicit process-wide logger. A binary that wants one installs
//! it once with [`init_default`] and reads it with [`default_logger`].
//!
//! # Example
//! ```ignore
//! let logger = LoggerBuilder::new()
//!     .level(Level::Debug)
//!     .sink(stack.sink())
//!     .default_field("service", "checkout")
//!     .build()?;
//!
//! logger.with_field("order", 42).info("order placed")?;
//! ```

use std::panic::Location;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use serde_json::Value;

use crate::config::LoggerConfig;
use crate::error::{RelayError, SinkError};
use crate::event::{Fields, Level, LogEvent, TraceContext};
use crate::pool::EventPool;
use crate::sink::SharedSink;

/// Runs on every event before delivery.
pub type Hook = Arc<dyn Fn(&mut LogEvent) + Send + Sync>;

static DEFAULT_LOGGER: OnceLock<Logger> = OnceLock::new();

/// Installs the process default logger. Fails if one is already installed.
pub fn init_default(logger: Logger) -> Result<(), RelayError> {
    DEFAULT_LOGGER
        .set(logger)
        .map_err(|_| RelayError::Logger("default logger already initialized".to_owned()))
}

/// The logger installed by [`init_default`], if any.
pub fn default_logger() -> Option<&'static Logger> {
    DEFAULT_LOGGER.get()
}

struct Shared {
    level: AtomicU8,
    sink: SharedSink,
    pool: Arc<EventPool>,
    include_caller: bool,
    hooks: Vec<Hook>,
}

/// Cheap-to-clone logging handle.
///
/// Children created with [`with_fields`](Self::with_fields) or
/// [`with_trace`](Self::with_trace) share the sink, pool, hooks and level of
/// their parent.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    fields: Arc<Fields>,
    trace: Option<TraceContext>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("sink", &self.shared.sink.name())
            .field("fields", &self.fields)
            .field("trace", &self.trace)
            .finish()
    }
}

impl Logger {
    /// Starts a builder.
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    /// Current minimum level.
    pub fn level(&self) -> Level {
        level_from_u8(self.shared.level.load(Ordering::Relaxed))
    }

    /// Changes the minimum level for this logger and every child.
    pub fn set_level(&self, level: Level) {
        self.shared.level.store(level as u8, Ordering::Relaxed);
    }

    /// Whether an event at `level` would be delivered.
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.level()
    }

    /// Child logger carrying `fields` on top of the current ones.
    pub fn with_fields<I, K, V>(&self, fields: I) -> Logger
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut merged = (*self.fields).clone();
        for (key, value) in fields {
            merged.insert(key.into(), value.into());
        }
        Logger {
            shared: Arc::clone(&self.shared),
            fields: Arc::new(merged),
            trace: self.trace.clone(),
        }
    }

    /// Child logger with one extra field.
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Logger {
        self.with_fields([(key.into(), value.into())])
    }

    /// Child logger attaching `trace` to every event.
    pub fn with_trace(&self, trace: TraceContext) -> Logger {
        Logger {
            shared: Arc::clone(&self.shared),
            fields: Arc::clone(&self.fields),
            trace: Some(trace),
        }
    }

    /// Fields carried by this logger.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Logs `message` at `level` and returns the sink's outcome.
    #[track_caller]
    pub fn log(&self, level: Level, message: impl AsRef<str>) -> Result<(), SinkError> {
        self.emit(level, message.as_ref(), None, Location::caller())
    }

    /// Logs with per-call fields that override the logger's own.
    #[track_caller]
    pub fn log_with(
        &self,
        level: Level,
        message: impl AsRef<str>,
        fields: &Fields,
    ) -> Result<(), SinkError> {
        self.emit(level, message.as_ref(), Some(fields), Location::caller())
    }

    #[track_caller]
    pub fn debug(&self, message: impl AsRef<str>) -> Result<(), SinkError> {
        self.emit(Level::Debug, message.as_ref(), None, Location::caller())
    }

    #[track_caller]
    pub fn info(&self, message: impl AsRef<str>) -> Result<(), SinkError> {
        self.emit(Level::Info, message.as_ref(), None, Location::caller())
    }

    #[track_caller]
    pub fn warn(&self, message: impl AsRef<str>) -> Result<(), SinkError> {
        self.emit(Level::Warn, message.as_ref(), None, Location::caller())
    }

    #[track_caller]
    pub fn error(&self, message: impl AsRef<str>) -> Result<(), SinkError> {
        self.emit(Level::Error, message.as_ref(), None, Location::caller())
    }

    /// Logs at `Fatal`. Does not terminate the process.
    #[track_caller]
    pub fn fatal(&self, message: impl AsRef<str>) -> Result<(), SinkError> {
        self.emit(Level::Fatal, message.as_ref(), None, Location::caller())
    }

    /// Logs at `Panic`. Does not unwind.
    #[track_caller]
    pub fn panic_level(&self, message: impl AsRef<str>) -> Result<(), SinkError> {
        self.emit(Level::Panic, message.as_ref(), None, Location::caller())
    }

    fn emit(
        &self,
        level: Level,
        message: &str,
        extra: Option<&Fields>,
        location: &'static Location<'static>,
    ) -> Result<(), SinkError> {
        if !self.enabled(level) {
            return Ok(());
        }

        let shared = &self.shared;
        let mut event = shared.pool.acquire();
        event.level = level;
        event.message.push_str(message);
        event.timestamp = SystemTime::now();
        event.merge_fields(self.fields.iter());
        if let Some(extra) = extra {
            event.merge_fields(extra);
        }
        event.trace.clone_from(&self.trace);
        if shared.include_caller {
            event.caller = Some(format!("{}:{}", location.file(), location.line()));
        }
        for hook in &shared.hooks {
            hook(&mut event);
        }

        let result = shared.sink.deliver(&event);
        shared.pool.release(event);
        result
    }
}

fn level_from_u8(raw: u8) -> Level {
    Level::ALL
        .get(raw as usize)
        .copied()
        .unwrap_or(Level::Panic)
}

/// Builder for [`Logger`].
#[derive(Default)]
pub struct LoggerBuilder {
    level: Level,
    sink: Option<SharedSink>,
    pool: Option<Arc<EventPool>>,
    default_fields: Fields,
    include_caller: bool,
    hooks: Vec<Hook>,
}

impl LoggerBuilder {
    /// Empty builder: level `Info`, no caller capture, no sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the `[logger]` config section (level, caller, default fields).
    pub fn config(mut self, config: &LoggerConfig) -> Self {
        self.level = config.min_level();
        self.include_caller = config.include_caller;
        for (key, value) in &config.default_fields {
            self.default_fields
                .insert(key.clone(), Value::String(value.clone()));
        }
        self
    }

    /// Minimum level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Destination sink. Required.
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Event pool. A default-sized pool is created when unset.
    pub fn pool(mut self, pool: Arc<EventPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Adds a field to every event.
    pub fn default_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_fields.insert(key.into(), value.into());
        self
    }

    /// Replaces the default fields.
    pub fn default_fields(mut self, fields: Fields) -> Self {
        self.default_fields = fields;
        self
    }

    /// Records `file:line` of each call site.
    pub fn include_caller(mut self, enabled: bool) -> Self {
        self.include_caller = enabled;
        self
    }

    /// Adds a hook run on every event before delivery, in insertion order.
    pub fn hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut LogEvent) + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Builds the logger.
    pub fn build(self) -> Result<Logger, RelayError> {
        let sink = self
            .sink
            .ok_or_else(|| RelayError::Logger("logger requires a sink".to_owned()))?;
        let pool = self.pool.unwrap_or_default();
        Ok(Logger {
            shared: Arc::new(Shared {
                level: AtomicU8::new(self.level as u8),
                sink,
                pool,
                include_caller: self.include_caller,
                hooks: self.hooks,
            }),
            fields: Arc::new(self.default_fields),
            trace: None,
        })
    }
}
