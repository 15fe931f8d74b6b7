//! Append-only file sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use relaylog_core::error::SinkError;
use relaylog_core::event::LogEvent;
use relaylog_core::format::{Formatter, TextFormatter};
use relaylog_core::pool::BufferPool;
use relaylog_core::sink::Sink;

use crate::writer::{poisoned, render_line};

/// Opens `path` for appending, creating it and its parent directories.
pub(crate) fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Appends one rendered line per event to a single file.
pub struct FileSink {
    name: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
    formatter: Box<dyn Formatter>,
    buffers: Arc<BufferPool>,
}

impl FileSink {
    /// Opens (or creates) `path` in append mode with a text formatter.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Self::with_formatter(path, Box::new(TextFormatter::new()))
    }

    /// Opens `path` with the given formatter.
    pub fn with_formatter(
        path: impl AsRef<Path>,
        formatter: Box<dyn Formatter>,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        Ok(Self {
            name: "file".to_owned(),
            path,
            file: Mutex::new(Some(file)),
            formatter,
            buffers: Arc::new(BufferPool::with_defaults()),
        })
    }

    /// Shares a buffer pool with other sinks.
    pub fn with_buffer_pool(mut self, buffers: Arc<BufferPool>) -> Self {
        self.buffers = buffers;
        self
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and closes the file. Later deliveries fail with `Closed`.
    pub fn close(&self) -> Result<(), SinkError> {
        let mut guard = self.file.lock().map_err(|_| poisoned(&self.name))?;
        if let Some(mut file) = guard.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        let line = render_line(self.formatter.as_ref(), &self.buffers, event)?;
        let result = match self.file.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(file) => file.write_all(&line).map_err(SinkError::from),
                None => Err(SinkError::Closed {
                    sink: self.name.clone(),
                }),
            },
            Err(_) => Err(poisoned(&self.name)),
        };
        self.buffers.release(line);
        result
    }
}
