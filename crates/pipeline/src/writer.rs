//! Sink over any `std::io::Write` (stdout, stderr, in-memory buffers).

use std::io::Write;
use std::sync::{Arc, Mutex};

use bytes::{BufMut, BytesMut};

use relaylog_core::error::SinkError;
use relaylog_core::event::LogEvent;
use relaylog_core::format::{Formatter, TextFormatter};
use relaylog_core::pool::BufferPool;
use relaylog_core::sink::Sink;

/// Renders `event` plus the trailing newline into a pooled buffer.
///
/// On error the buffer has already been returned to `buffers`.
pub(crate) fn render_line(
    formatter: &dyn Formatter,
    buffers: &BufferPool,
    event: &LogEvent,
) -> Result<BytesMut, SinkError> {
    let mut buf = buffers.acquire();
    if let Err(e) = formatter.format(event, &mut buf) {
        buffers.release(buf);
        return Err(e);
    }
    buf.put_u8(b'\n');
    Ok(buf)
}

/// Writes one rendered line per event to a writer.
pub struct WriterSink<W> {
    name: String,
    writer: Mutex<W>,
    formatter: Box<dyn Formatter>,
    buffers: Arc<BufferPool>,
}

impl<W: Write + Send> WriterSink<W> {
    /// Creates a sink writing to `writer` with the given formatter.
    pub fn new(name: impl Into<String>, writer: W, formatter: Box<dyn Formatter>) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
            formatter,
            buffers: Arc::new(BufferPool::with_defaults()),
        }
    }

    /// Shares a buffer pool with other sinks.
    pub fn with_buffer_pool(mut self, buffers: Arc<BufferPool>) -> Self {
        self.buffers = buffers;
        self
    }

    /// Flushes the underlying writer.
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().map_err(|_| poisoned(&self.name))?;
        writer.flush()?;
        Ok(())
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl WriterSink<std::io::Stdout> {
    /// Console sink on stdout.
    pub fn stdout(formatter: Box<dyn Formatter>) -> Self {
        Self::new("console", std::io::stdout(), formatter)
    }
}

impl WriterSink<std::io::Stderr> {
    /// Console sink on stderr.
    pub fn stderr(formatter: Box<dyn Formatter>) -> Self {
        Self::new("stderr", std::io::stderr(), formatter)
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        let line = render_line(self.formatter.as_ref(), &self.buffers, event)?;
        let result = match self.writer.lock() {
            Ok(mut writer) => writer.write_all(&line).map_err(SinkError::from),
            Err(_) => Err(poisoned(&self.name)),
        };
        self.buffers.release(line);
        result
    }
}

impl Default for WriterSink<std::io::Stdout> {
    fn default() -> Self {
        Self::stdout(Box::new(TextFormatter::new()))
    }
}

pub(crate) fn poisoned(sink: &str) -> SinkError {
    SinkError::delivery(sink, "lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaylog_core::event::Level;
    use relaylog_core::format::JsonFormatter;

    #[test]
    fn writes_one_line_per_event() {
        let sink = WriterSink::new(
            "mem",
            Vec::new(),
            Box::new(TextFormatter::new().timestamp(false)),
        );
        sink.deliver(&LogEvent::new(Level::Info, "first")).unwrap();
        sink.deliver(&LogEvent::new(Level::Error, "second")).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "[INFO ] first\n[ERROR] second\n");
    }

    #[test]
    fn json_lines_parse() {
        let sink = WriterSink::new("mem", Vec::new(), Box::new(JsonFormatter::new()));
        sink.deliver(&LogEvent::new(Level::Warn, "slow").with_field("ms", 812))
            .unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(parsed["ms"], 812);
    }

    #[test]
    fn buffers_are_returned_to_the_pool() {
        let buffers = Arc::new(BufferPool::new(4, 64, 4096).unwrap());
        let sink = WriterSink::new("mem", Vec::new(), Box::new(TextFormatter::new()))
            .with_buffer_pool(buffers.clone());
        for _ in 0..3 {
            sink.deliver(&LogEvent::new(Level::Info, "tick")).unwrap();
        }
        let stats = buffers.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(buffers.available(), 1);
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("device gone"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_is_reported() {
        let sink = WriterSink::new("broken", BrokenWriter, Box::new(TextFormatter::new()));
        let err = sink.deliver(&LogEvent::new(Level::Info, "lost")).unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
