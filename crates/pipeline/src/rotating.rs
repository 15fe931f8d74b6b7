//! Size-based rotating file sink.
//!
//! Writes go to `path`. When the next line would push the active file past
//! `max_size`, the file is rotated:
//!
//! ```text
//! path.N        removed
//! path.(i)   -> path.(i+1)   for i = N-1 .. 1
//! path       -> path.1
//! path          reopened empty
//! ```
//!
//! so at most `max_files` rotated files exist next to the active one.
//!
//! An empty active file is never rotated, even when a single line is larger
//! than `max_size`. Such a line is written whole into the empty file and the
//! next write rotates it away, so no rotated file is ever empty.
//! Format, rotation and write all happen under one lock, so lines from
//! concurrent producers never interleave and follow lock order.

use std::ffi::OsString;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::counter;
use tracing::{debug, info, warn};

use relaylog_core::config::FileConfig;
use relaylog_core::error::SinkError;
use relaylog_core::event::LogEvent;
use relaylog_core::format::Formatter;
use relaylog_core::metrics::{LABEL_SINK, ROTATION_FAILURES_TOTAL, ROTATION_TOTAL};
use relaylog_core::pool::BufferPool;
use relaylog_core::sink::Sink;

use crate::error::PipelineError;
use crate::file::open_append;
use crate::writer::{poisoned, render_line};

/// Rotation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate before a write would take the active file past this many bytes
    pub max_size: u64,
    /// Rotated files kept (`path.1` .. `path.max_files`)
    pub max_files: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_size: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

impl From<&FileConfig> for RotationPolicy {
    fn from(config: &FileConfig) -> Self {
        Self {
            max_size: config.max_size,
            max_files: config.max_files,
        }
    }
}

impl RotationPolicy {
    /// Rejects zero limits.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_size == 0 {
            return Err(PipelineError::config("max_size", "must be greater than 0"));
        }
        if self.max_files == 0 {
            return Err(PipelineError::config("max_files", "must be greater than 0"));
        }
        Ok(())
    }
}

struct ActiveFile {
    file: Option<File>,
    size: u64,
    closed: bool,
}

/// File sink that rotates by size.
pub struct RotatingFileSink {
    name: String,
    path: PathBuf,
    policy: RotationPolicy,
    state: Mutex<ActiveFile>,
    formatter: Box<dyn Formatter>,
    buffers: Arc<BufferPool>,
    rotations: AtomicU64,
}

impl RotatingFileSink {
    /// Opens `path` for appending. An existing file keeps its content and
    /// its length counts toward `max_size`.
    pub fn open(
        path: impl AsRef<Path>,
        policy: RotationPolicy,
        formatter: Box<dyn Formatter>,
        buffers: Arc<BufferPool>,
    ) -> Result<Self, PipelineError> {
        policy.validate()?;
        let path = path.as_ref().to_path_buf();
        let (file, size) = open_with_size(&path)?;

        debug!(
            path = %path.display(),
            size,
            max_size = policy.max_size,
            max_files = policy.max_files,
            "rotating file sink opened"
        );

        Ok(Self {
            name: "rotating".to_owned(),
            path,
            policy,
            state: Mutex::new(ActiveFile {
                file: Some(file),
                size,
                closed: false,
            }),
            formatter,
            buffers,
            rotations: AtomicU64::new(0),
        })
    }

    /// Active file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the `index`-th rotated file (`path.index`).
    pub fn rotated_path(&self, index: usize) -> PathBuf {
        rotated_path(&self.path, index)
    }

    /// Rotation limits.
    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Bytes written to the active file, including what it held at open.
    pub fn current_size(&self) -> u64 {
        match self.state.lock() {
            Ok(state) => state.size,
            Err(poisoned) => poisoned.into_inner().size,
        }
    }

    /// Completed rotations since open.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Flushes the active file.
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().map_err(|_| poisoned(&self.name))?;
        if let Some(file) = state.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    /// Flushes and closes. Later deliveries fail with `Closed`.
    pub fn close(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().map_err(|_| poisoned(&self.name))?;
        state.closed = true;
        if let Some(mut file) = state.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    fn write_line(&self, state: &mut ActiveFile, line: &[u8]) -> Result<(), SinkError> {
        if state.closed {
            return Err(SinkError::Closed {
                sink: self.name.clone(),
            });
        }

        if state.file.is_none() {
            // a previous rotation could not reopen the active file
            let (file, size) = open_with_size(&self.path)?;
            state.file = Some(file);
            state.size = size;
        }

        let len = line.len() as u64;
        if state.size > 0 && state.size + len > self.policy.max_size {
            if let Err(e) = self.rotate(state) {
                counter!(ROTATION_FAILURES_TOTAL, LABEL_SINK => self.name.clone()).increment(1);
                warn!(path = %self.path.display(), error = %e, "log rotation failed");
                return Err(e.into());
            }
        }

        let file = state.file.as_mut().ok_or_else(|| SinkError::Closed {
            sink: self.name.clone(),
        })?;
        file.write_all(line)?;
        state.size += len;
        Ok(())
    }

    fn rotate(&self, state: &mut ActiveFile) -> std::io::Result<()> {
        if let Some(mut file) = state.file.take() {
            file.flush()?;
        }

        ignore_missing(std::fs::remove_file(rotated_path(
            &self.path,
            self.policy.max_files,
        )))?;
        for i in (1..self.policy.max_files).rev() {
            ignore_missing(std::fs::rename(
                rotated_path(&self.path, i),
                rotated_path(&self.path, i + 1),
            ))?;
        }
        ignore_missing(std::fs::rename(&self.path, rotated_path(&self.path, 1)))?;

        let (file, size) = open_with_size(&self.path)?;
        state.file = Some(file);
        state.size = size;

        let total = self.rotations.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(ROTATION_TOTAL, LABEL_SINK => self.name.clone()).increment(1);
        info!(path = %self.path.display(), rotations = total, "log file rotated");
        Ok(())
    }
}

impl Sink for RotatingFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        let line = render_line(self.formatter.as_ref(), &self.buffers, event)?;
        let result = match self.state.lock() {
            Ok(mut state) => self.write_line(&mut state, &line),
            Err(_) => Err(poisoned(&self.name)),
        };
        self.buffers.release(line);
        result
    }
}

fn rotated_path(path: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn open_with_size(path: &Path) -> std::io::Result<(File, u64)> {
    let file = open_append(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

fn ignore_missing(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaylog_core::event::Level;
    use relaylog_core::format::TextFormatter;

    // "[INFO ] " + 40 chars + '\n'
    const LINE_LEN: u64 = 49;

    fn event() -> LogEvent {
        LogEvent::new(Level::Info, "a".repeat(40))
    }

    fn sink(path: &Path, max_size: u64, max_files: usize) -> RotatingFileSink {
        RotatingFileSink::open(
            path,
            RotationPolicy {
                max_size,
                max_files,
            },
            Box::new(TextFormatter::new().timestamp(false)),
            Arc::new(BufferPool::with_defaults()),
        )
        .unwrap()
    }

    #[test]
    fn zero_limits_fail() {
        let dir = tempfile::tempdir().unwrap();
        for (max_size, max_files) in [(0, 3), (100, 0)] {
            let result = RotatingFileSink::open(
                dir.path().join("app.log"),
                RotationPolicy {
                    max_size,
                    max_files,
                },
                Box::new(TextFormatter::new()),
                Arc::new(BufferPool::with_defaults()),
            );
            assert!(matches!(result, Err(PipelineError::Config { .. })));
        }
    }

    #[test]
    fn rotates_when_next_line_would_exceed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let s = sink(&path, 2 * LINE_LEN, 3);

        s.deliver(&event()).unwrap();
        s.deliver(&event()).unwrap();
        assert_eq!(s.current_size(), 2 * LINE_LEN);
        assert_eq!(s.rotations(), 0);

        s.deliver(&event()).unwrap();
        assert_eq!(s.rotations(), 1);
        assert_eq!(s.current_size(), LINE_LEN);
        assert_eq!(
            std::fs::metadata(s.rotated_path(1)).unwrap().len(),
            2 * LINE_LEN
        );
    }

    #[test]
    fn keeps_at_most_max_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let s = sink(&path, 2 * LINE_LEN, 3);

        for _ in 0..20 {
            s.deliver(&event()).unwrap();
        }

        assert_eq!(s.rotations(), 9);
        assert!(path.exists());
        for i in 1..=3 {
            assert!(s.rotated_path(i).exists(), "missing {i}");
        }
        assert!(!s.rotated_path(4).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);
    }

    #[test]
    fn oversized_event_is_still_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let s = sink(&path, 10, 2);

        s.deliver(&event()).unwrap();
        // empty file is never rotated
        assert_eq!(s.rotations(), 0);
        assert_eq!(s.current_size(), LINE_LEN);

        s.deliver(&event()).unwrap();
        assert_eq!(s.rotations(), 1);
    }

    #[test]
    fn existing_file_seeds_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, vec![b'x'; 90]).unwrap();

        let s = sink(&path, 100, 2);
        assert_eq!(s.current_size(), 90);
        s.deliver(&event()).unwrap();
        assert_eq!(s.rotations(), 1);
        assert_eq!(std::fs::metadata(s.rotated_path(1)).unwrap().len(), 90);
    }

    #[test]
    fn rotation_failure_is_reported_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let s = sink(&path, LINE_LEN, 1);
        s.deliver(&event()).unwrap();

        // app.log.1 as a non-empty directory cannot be removed as a file
        let blocker = s.rotated_path(1);
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let err = s.deliver(&event()).unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
        assert_eq!(s.rotations(), 0);

        std::fs::remove_dir_all(&blocker).unwrap();
        s.deliver(&event()).unwrap();
        assert_eq!(s.rotations(), 1);
        assert_eq!(s.current_size(), LINE_LEN);
        assert_eq!(std::fs::metadata(&blocker).unwrap().len(), LINE_LEN);
    }

    #[test]
    fn deliver_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let s = sink(&dir.path().join("app.log"), 1024, 2);
        s.deliver(&event()).unwrap();
        s.close().unwrap();
        let err = s.deliver(&event()).unwrap_err();
        assert!(err.is_closed());
    }
}
