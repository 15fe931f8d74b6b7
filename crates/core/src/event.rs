//! Log event model.
//!
//! [`LogEvent`] is the unit every [`Sink`](crate::sink::Sink) delivers. Events
//! are normally borrowed from an [`EventPool`](crate::pool::EventPool), filled
//! by the producer and released once the outermost sink returns, so the type
//! exposes [`LogEvent::reset`] and [`LogEvent::copy_from`] which keep the
//! allocated capacity of the message and field map.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Structured fields attached to an event. Keys are unique.
pub type Fields = HashMap<String, serde_json::Value>;

/// Ordered severity.
///
/// `Ord` follows severity: `Debug < Info < Warn < Error < Fatal < Panic`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl Level {
    /// All levels, lowest first.
    pub const ALL: [Level; 6] = [
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Fatal,
        Level::Panic,
    ];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Panic => "panic",
        }
    }

    /// Parses a level name, case-insensitive. `warning` is accepted for `warn`.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "fatal" => Some(Self::Fatal),
            "panic" => Some(Self::Panic),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trace/span linkage carried by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace ID shared by every event of one flow
    pub trace_id: String,
    /// Span ID of the operation that emitted the event
    pub span_id: String,
}

impl TraceContext {
    /// Starts a new trace with fresh UUID v4 trace and span IDs.
    pub fn new_root() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
        }
    }

    /// Keeps the trace ID and opens a new span.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
        }
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace={} span={}", self.trace_id, self.span_id)
    }
}

fn new_span_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..16].to_owned()
}

/// A single structured log event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    /// Severity
    pub level: Level,
    /// Message text
    pub message: String,
    /// Structured fields
    pub fields: Fields,
    /// Time the event was created
    pub timestamp: SystemTime,
    /// `file:line` of the call site, when caller capture is enabled
    pub caller: Option<String>,
    /// Trace linkage
    pub trace: Option<TraceContext>,
}

impl Default for LogEvent {
    fn default() -> Self {
        Self {
            level: Level::Info,
            message: String::new(),
            fields: Fields::new(),
            timestamp: SystemTime::UNIX_EPOCH,
            caller: None,
            trace: None,
        }
    }
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: SystemTime::now(),
            ..Self::default()
        }
    }

    /// Adds a field, replacing any previous value under the same key.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Merges `fields` into the event. Later values win.
    pub fn merge_fields<'a, I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (&'a String, &'a serde_json::Value)>,
    {
        for (key, value) in fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Restores the zero value while keeping allocated capacity.
    pub fn reset(&mut self) {
        self.level = Level::Info;
        self.message.clear();
        self.fields.clear();
        self.timestamp = SystemTime::UNIX_EPOCH;
        self.caller = None;
        self.trace = None;
    }

    /// Overwrites `self` with a copy of `other`, reusing `self`'s buffers.
    pub fn copy_from(&mut self, other: &LogEvent) {
        self.level = other.level;
        self.message.clone_from(&other.message);
        self.fields.clone_from(&other.fields);
        self.timestamp = other.timestamp;
        self.caller.clone_from(&other.caller);
        self.trace.clone_from(&other.trace);
    }

    /// `true` when the event holds no data (as returned by a pool).
    pub fn is_zero(&self) -> bool {
        self.message.is_empty()
            && self.fields.is_empty()
            && self.level == Level::Info
            && self.timestamp == SystemTime::UNIX_EPOCH
            && self.caller.is_none()
            && self.trace.is_none()
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_follows_severity() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Error < Level::Fatal);
        assert_eq!(Level::ALL.iter().max(), Some(&Level::Panic));
    }

    #[test]
    fn level_parses_loosely() {
        assert_eq!(Level::from_str_loose("WARNING"), Some(Level::Warn));
        assert_eq!(Level::from_str_loose("Error"), Some(Level::Error));
        assert_eq!(Level::from_str_loose("verbose"), None);
    }

    #[test]
    fn merge_fields_is_last_write_wins() {
        let mut event = LogEvent::new(Level::Info, "request").with_field("user", "alice");
        let mut extra = Fields::new();
        extra.insert("user".to_owned(), "bob".into());
        extra.insert("status".to_owned(), 200.into());
        event.merge_fields(&extra);

        assert_eq!(event.fields.len(), 2);
        assert_eq!(event.fields["user"], "bob");
        assert_eq!(event.fields["status"], 200);
    }

    #[test]
    fn reset_clears_everything() {
        let mut event = LogEvent::new(Level::Error, "boom").with_field("k", "v");
        event.caller = Some("main.rs:10".to_owned());
        event.trace = Some(TraceContext::new_root());
        event.reset();
        assert!(event.is_zero());
        assert_eq!(event, LogEvent::default());
    }

    #[test]
    fn copy_from_produces_equal_event() {
        let source = LogEvent::new(Level::Warn, "disk almost full")
            .with_field("mount", "/var")
            .with_field("used_pct", 93);
        let mut target = LogEvent::new(Level::Debug, "stale").with_field("old", true);
        target.copy_from(&source);
        assert_eq!(target, source);
    }

    #[test]
    fn child_trace_keeps_trace_id() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(root.trace_id, child.trace_id);
        assert_ne!(root.span_id, child.span_id);
        assert_eq!(child.span_id.len(), 16);
    }
}
