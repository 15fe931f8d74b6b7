//! Formatter trait and the two stock renderers.
//!
//! Sinks that write bytes (`WriterSink`, `FileSink` and `RotatingFileSink` in
//! `relaylog-pipeline`) render each event into a pooled buffer through a
//! [`Formatter`]. The record separator (`'\n'`) is appended by the sink, not
//! by the formatter.

use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::SinkError;
use crate::event::LogEvent;

/// Default timestamp pattern of [`TextFormatter`].
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Renders one event into bytes.
pub trait Formatter: Send + Sync {
    /// Appends the rendered event to `out`.
    fn format(&self, event: &LogEvent, out: &mut BytesMut) -> Result<(), SinkError>;
}

/// Human-readable single-line renderer.
///
/// ```text
/// 2025-01-15 12:00:00 [WARN ] disk almost full {mount=/var, used_pct=93} (src/main.rs:42)
/// ```
#[derive(Debug, Clone)]
pub struct TextFormatter {
    timestamp: bool,
    timestamp_format: String,
    level_padding: usize,
    field_order: Vec<String>,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            timestamp: true,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_owned(),
            level_padding: 5,
            field_order: Vec::new(),
        }
    }
}

impl TextFormatter {
    /// Text formatter with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the leading timestamp.
    pub fn timestamp(mut self, enabled: bool) -> Self {
        self.timestamp = enabled;
        self
    }

    /// Sets the `chrono` strftime pattern for the timestamp.
    pub fn timestamp_format(mut self, pattern: impl Into<String>) -> Self {
        self.timestamp_format = pattern.into();
        self
    }

    /// Pads the level name to `width` characters.
    pub fn level_padding(mut self, width: usize) -> Self {
        self.level_padding = width;
        self
    }

    /// Renders these keys first, in order; remaining keys follow sorted.
    pub fn field_order(mut self, order: Vec<String>) -> Self {
        self.field_order = order;
        self
    }

    fn write_fields(&self, event: &LogEvent, out: &mut BytesMut) -> std::fmt::Result {
        let mut keys: Vec<&String> = self
            .field_order
            .iter()
            .filter(|k| event.fields.contains_key(*k))
            .collect();
        let mut rest: Vec<&String> = event
            .fields
            .keys()
            .filter(|k| !self.field_order.contains(*k))
            .collect();
        rest.sort();
        keys.extend(rest);

        out.write_str(" {")?;
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            match &event.fields[*key] {
                Value::String(s) => write!(out, "{key}={s}")?,
                other => write!(out, "{key}={other}")?,
            }
        }
        out.write_str("}")
    }
}

impl Formatter for TextFormatter {
    fn format(&self, event: &LogEvent, out: &mut BytesMut) -> Result<(), SinkError> {
        let render = |out: &mut BytesMut| -> std::fmt::Result {
            if self.timestamp {
                let local: DateTime<Local> = event.timestamp.into();
                write!(out, "{} ", local.format(&self.timestamp_format))?;
            }
            let level = event.level.as_str().to_ascii_uppercase();
            write!(out, "[{level:<width$}] ", width = self.level_padding)?;
            out.write_str(&event.message)?;
            if !event.fields.is_empty() {
                self.write_fields(event, out)?;
            }
            if let Some(trace) = &event.trace {
                write!(out, " [{trace}]")?;
            }
            if let Some(caller) = &event.caller {
                write!(out, " ({caller})")?;
            }
            Ok(())
        };
        render(out).map_err(|e| SinkError::Format(e.to_string()))
    }
}

/// One JSON object per event.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    /// Compact JSON formatter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables indented output.
    pub fn pretty(mut self, enabled: bool) -> Self {
        self.pretty = enabled;
        self
    }
}

impl Formatter for JsonFormatter {
    fn format(&self, event: &LogEvent, out: &mut BytesMut) -> Result<(), SinkError> {
        let mut object = Map::with_capacity(event.fields.len() + 6);
        for (key, value) in &event.fields {
            object.insert(key.clone(), value.clone());
        }
        object.insert("level".to_owned(), Value::from(event.level.as_str()));
        object.insert("message".to_owned(), Value::from(event.message.as_str()));
        let time: DateTime<Utc> = event.timestamp.into();
        object.insert(
            "time".to_owned(),
            Value::from(time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        if let Some(caller) = &event.caller {
            object.insert("caller".to_owned(), Value::from(caller.as_str()));
        }
        if let Some(trace) = &event.trace {
            object.insert("trace_id".to_owned(), Value::from(trace.trace_id.as_str()));
            object.insert("span_id".to_owned(), Value::from(trace.span_id.as_str()));
        }

        let writer = (&mut *out).writer();
        if self.pretty {
            serde_json::to_writer_pretty(writer, &object)?;
        } else {
            serde_json::to_writer(writer, &object)?;
        }
        Ok(())
    }
}
