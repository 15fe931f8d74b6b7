//! Assembles a delivery stack from [`RelayConfig`].
//!
//! ```text
//! SamplingSink -> BreakerSink -> AsyncDispatcher -> base (console | file | rotating)
//!   [sampling]      [breaker]      [dispatcher]        [logger.output]
//! ```
//!
//! Each wrapper is optional and enabled by its config section. The
//! outermost sink is what producers (usually a `Logger`) deliver to.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use relaylog_core::config::{OutputFormat, OutputKind, RelayConfig};
use relaylog_core::error::RelayError;
use relaylog_core::format::{Formatter, JsonFormatter, TextFormatter};
use relaylog_core::logger::{Logger, LoggerBuilder};
use relaylog_core::pool::{BufferPool, EventPool};
use relaylog_core::sink::{SharedSink, Sink};

use crate::breaker::{BreakerSink, CircuitBreaker};
use crate::dispatcher::AsyncDispatcher;
use crate::error::PipelineError;
use crate::file::FileSink;
use crate::health::{
    BreakerHealthCheck, DispatcherHealthCheck, HealthMonitor, SinkHealthCheck,
};
use crate::rotating::RotatingFileSink;
use crate::sampling::SamplingSink;
use crate::writer::WriterSink;

/// Base sink of a stack, kept typed for flush/close on shutdown.
pub enum BaseSink {
    Console(Arc<WriterSink<std::io::Stdout>>),
    File(Arc<FileSink>),
    Rotating(Arc<RotatingFileSink>),
    Custom(SharedSink),
}

impl BaseSink {
    /// Type-erased handle.
    pub fn shared(&self) -> SharedSink {
        match self {
            Self::Console(s) => s.clone() as SharedSink,
            Self::File(s) => s.clone() as SharedSink,
            Self::Rotating(s) => s.clone() as SharedSink,
            Self::Custom(s) => Arc::clone(s),
        }
    }

    fn close(&self) -> Result<(), PipelineError> {
        match self {
            Self::Console(s) => s.flush()?,
            Self::File(s) => s.close()?,
            Self::Rotating(s) => s.close()?,
            Self::Custom(_) => {}
        }
        Ok(())
    }
}

/// Builder for [`SinkStack`].
pub struct SinkStackBuilder {
    config: RelayConfig,
    base: Option<SharedSink>,
    formatter: Option<Box<dyn Formatter>>,
}

impl SinkStackBuilder {
    /// Starts from a validated config.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            base: None,
            formatter: None,
        }
    }

    /// Uses `sink` as the base instead of the one `logger.output` names.
    pub fn base_sink(mut self, sink: SharedSink) -> Self {
        self.base = Some(sink);
        self
    }

    /// Overrides the formatter chosen by `logger.format`.
    pub fn formatter(mut self, formatter: Box<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Opens the base sink and wraps it.
    pub fn build(self) -> Result<SinkStack, PipelineError> {
        let config = self.config;
        config.validate().map_err(|e| match e {
            RelayError::Config(c) => PipelineError::from(c),
            other => PipelineError::config("config", other.to_string()),
        })?;

        let event_pool = Arc::new(EventPool::new(config.pool.event_retain)?);
        let buffer_pool = Arc::new(BufferPool::new(
            config.pool.buffer_retain,
            config.pool.buffer_capacity,
            config.pool.buffer_max_capacity,
        )?);

        let formatter = match self.formatter {
            Some(f) => f,
            None => formatter_for(&config.logger.format)?,
        };

        let base = match self.base {
            Some(custom) => BaseSink::Custom(custom),
            None => open_base(&config, formatter, &buffer_pool)?,
        };

        let mut sink = base.shared();

        let dispatcher = if config.dispatcher.enabled {
            let d = Arc::new(AsyncDispatcher::new(
                sink,
                Arc::clone(&event_pool),
                (&config.dispatcher).into(),
            )?);
            sink = d.clone();
            Some(d)
        } else {
            None
        };

        let breaker = if config.breaker.enabled {
            let b = BreakerSink::new(sink, (&config.breaker).into())?;
            let handle = Arc::clone(b.breaker());
            sink = Arc::new(b);
            Some(handle)
        } else {
            None
        };

        let sampling = if config.sampling.enabled {
            let s = Arc::new(SamplingSink::new(sink, config.sampling.rate)?);
            sink = s.clone();
            Some(s)
        } else {
            None
        };

        info!(
            sink = sink.name(),
            dispatcher = dispatcher.is_some(),
            breaker = breaker.is_some(),
            sampling = sampling.is_some(),
            "sink stack built"
        );

        Ok(SinkStack {
            sink,
            base,
            dispatcher,
            breaker,
            sampling,
            event_pool,
            buffer_pool,
            slow_threshold: config.health.slow_threshold(),
            config,
        })
    }
}

fn formatter_for(format: &str) -> Result<Box<dyn Formatter>, PipelineError> {
    match OutputFormat::from_name(format) {
        Some(OutputFormat::Text) => Ok(Box::new(TextFormatter::new())),
        Some(OutputFormat::Json) => Ok(Box::new(JsonFormatter::new())),
        None => Err(PipelineError::config(
            "logger.format",
            format!("unknown format '{format}'"),
        )),
    }
}

fn open_base(
    config: &RelayConfig,
    formatter: Box<dyn Formatter>,
    buffers: &Arc<BufferPool>,
) -> Result<BaseSink, PipelineError> {
    let kind = OutputKind::from_name(&config.logger.output).ok_or_else(|| {
        PipelineError::config(
            "logger.output",
            format!("unknown output '{}'", config.logger.output),
        )
    })?;
    let base = match kind {
        OutputKind::Console => BaseSink::Console(Arc::new(
            WriterSink::stdout(formatter).with_buffer_pool(Arc::clone(buffers)),
        )),
        OutputKind::File => BaseSink::File(Arc::new(
            FileSink::with_formatter(&config.file.path, formatter)?
                .with_buffer_pool(Arc::clone(buffers)),
        )),
        OutputKind::Rotating => BaseSink::Rotating(Arc::new(RotatingFileSink::open(
            &config.file.path,
            (&config.file).into(),
            formatter,
            Arc::clone(buffers),
        )?)),
    };
    Ok(base)
}

/// A composed delivery stack.
pub struct SinkStack {
    sink: SharedSink,
    base: BaseSink,
    dispatcher: Option<Arc<AsyncDispatcher>>,
    breaker: Option<Arc<CircuitBreaker>>,
    sampling: Option<Arc<SamplingSink>>,
    event_pool: Arc<EventPool>,
    buffer_pool: Arc<BufferPool>,
    slow_threshold: Duration,
    config: RelayConfig,
}

impl SinkStack {
    /// Outermost sink.
    pub fn sink(&self) -> SharedSink {
        Arc::clone(&self.sink)
    }

    /// Innermost sink the stack writes to.
    pub fn base(&self) -> &BaseSink {
        &self.base
    }

    /// Async dispatcher, when `[dispatcher]` is enabled.
    pub fn dispatcher(&self) -> Option<&Arc<AsyncDispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Circuit breaker, when `[breaker]` is enabled.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Sampling filter, when `[sampling]` is enabled.
    pub fn sampling(&self) -> Option<&Arc<SamplingSink>> {
        self.sampling.as_ref()
    }

    /// Pool shared by the dispatcher and the logger.
    pub fn event_pool(&self) -> &Arc<EventPool> {
        &self.event_pool
    }

    /// Pool of formatting buffers.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    /// Logger delivering to the outermost sink, configured by `[logger]`.
    pub fn logger(&self) -> Result<Logger, RelayError> {
        LoggerBuilder::new()
            .config(&self.config.logger)
            .sink(self.sink())
            .pool(Arc::clone(&self.event_pool))
            .build()
    }

    /// Registers one check per stage: `sink`, `dispatcher`, `breaker`.
    pub fn register_health_checks(&self, monitor: &HealthMonitor) {
        monitor.add_check(
            "sink",
            SinkHealthCheck::new(self.base.shared()).slow_threshold(self.slow_threshold),
        );
        if let Some(d) = &self.dispatcher {
            monitor.add_check("dispatcher", DispatcherHealthCheck::new(Arc::clone(d)));
        }
        if let Some(b) = &self.breaker {
            monitor.add_check("breaker", BreakerHealthCheck::new(Arc::clone(b)));
        }
    }

    /// Drains the dispatcher, then flushes and closes the base sink.
    pub fn shutdown(&self) -> Result<(), PipelineError> {
        if let Some(d) = &self.dispatcher {
            d.shutdown();
        }
        self.base.close()?;
        info!("sink stack shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaylog_core::error::SinkError;
    use relaylog_core::event::{Level, LogEvent};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        events: Mutex<Vec<String>>,
    }

    impl Sink for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
            self.events.lock().unwrap().push(event.message.clone());
            Ok(())
        }
    }

    #[test]
    fn wraps_in_documented_order() {
        let mut config = RelayConfig::default();
        config.breaker.enabled = true;
        config.sampling.enabled = true;
        config.sampling.rate = 0.5;

        let stack = SinkStackBuilder::new(config)
            .base_sink(Arc::new(Collect::default()))
            .build()
            .unwrap();

        assert_eq!(
            stack.sink().name(),
            "sampling(breaker(async(collect)))"
        );
        assert!(stack.dispatcher().is_some());
        assert!(stack.breaker().is_some());
        stack.shutdown().unwrap();
    }

    #[test]
    fn disabled_stages_are_skipped() {
        let mut config = RelayConfig::default();
        config.dispatcher.enabled = false;
        let collect = Arc::new(Collect::default());
        let stack = SinkStackBuilder::new(config)
            .base_sink(collect.clone())
            .build()
            .unwrap();

        assert_eq!(stack.sink().name(), "collect");
        stack
            .sink()
            .deliver(&LogEvent::new(Level::Info, "direct"))
            .unwrap();
        assert_eq!(collect.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = RelayConfig::default();
        config.dispatcher.workers = 0;
        let result = SinkStackBuilder::new(config).build();
        assert!(matches!(result, Err(PipelineError::Config { .. })));
    }

    #[test]
    fn rotating_output_writes_through_logger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut config = RelayConfig::default();
        config.logger.output = "rotating".to_owned();
        config.logger.format = "json".to_owned();
        config.file.path = path.display().to_string();

        let stack = SinkStackBuilder::new(config).build().unwrap();
        let logger = stack.logger().unwrap();
        for i in 0..10 {
            logger.with_field("i", i).info("written").unwrap();
        }
        stack.shutdown().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 10);
        for line in content.lines() {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["message"], "written");
        }
    }
}
