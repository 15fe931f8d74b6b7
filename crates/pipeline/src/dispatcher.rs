//! Async dispatcher: bounded queue + worker threads in front of a sink.
//!
//! [`AsyncDispatcher::deliver`] copies the event into a pooled [`LogEvent`]
//! and offers it to a bounded `crossbeam` channel. Worker threads drain the
//! channel into the inner sink and return each event to the pool.
//!
//! # Backpressure
//! When the queue is full the event is delivered synchronously on the
//! caller's thread and the inner sink's real outcome is returned. Producers
//! are never blocked on the queue and events are never dropped.
//!
//! Once queued, delivery is best effort: failures are logged and counted
//! but not reported to the producer.
//!
//! # Shutdown
//! [`AsyncDispatcher::shutdown`] closes the queue, lets the workers drain
//! every queued event and joins them. `deliver` after shutdown goes straight
//! to the inner sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use relaylog_core::config::DispatcherSection;
use relaylog_core::error::SinkError;
use relaylog_core::event::LogEvent;
use relaylog_core::metrics::{
    DISPATCHER_DELIVERY_FAILURES_TOTAL, DISPATCHER_ENQUEUED_TOTAL, DISPATCHER_QUEUE_DEPTH,
    DISPATCHER_SYNC_FALLBACK_TOTAL, LABEL_SINK,
};
use relaylog_core::pool::EventPool;
use relaylog_core::sink::{SharedSink, Sink};

use crate::error::PipelineError;

/// Dispatcher sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Bounded queue capacity
    pub queue_capacity: usize,
    /// Worker thread count
    pub workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            workers: 4,
        }
    }
}

impl From<&DispatcherSection> for DispatcherConfig {
    fn from(section: &DispatcherSection) -> Self {
        Self {
            queue_capacity: section.queue_capacity,
            workers: section.workers,
        }
    }
}

impl DispatcherConfig {
    /// Rejects zero capacity or zero workers.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::config(
                "queue_capacity",
                "must be greater than 0",
            ));
        }
        if self.workers == 0 {
            return Err(PipelineError::config("workers", "must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    sync_fallbacks: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Events accepted into the queue
    pub enqueued: u64,
    /// Events delivered on the caller thread (queue full or shut down)
    pub sync_fallbacks: u64,
    /// Queued events the inner sink accepted
    pub delivered: u64,
    /// Queued events the inner sink rejected
    pub failed: u64,
}

/// Sink wrapper that delivers through a bounded queue and worker threads.
pub struct AsyncDispatcher {
    name: String,
    inner: SharedSink,
    pool: Arc<EventPool>,
    sender: RwLock<Option<Sender<LogEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queue_capacity: usize,
    counters: Arc<Counters>,
}

impl AsyncDispatcher {
    /// Starts `config.workers` threads draining a queue of
    /// `config.queue_capacity` events into `inner`.
    pub fn new(
        inner: SharedSink,
        pool: Arc<EventPool>,
        config: DispatcherConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let (tx, rx) = crossbeam::channel::bounded::<LogEvent>(config.queue_capacity);
        let counters = Arc::new(Counters::default());
        let name = format!("async({})", inner.name());

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let thread_name = format!("relaylog-dispatch-{id}");
            let worker = Worker {
                rx: rx.clone(),
                inner: Arc::clone(&inner),
                pool: Arc::clone(&pool),
                counters: Arc::clone(&counters),
                sink_name: inner.name().to_owned(),
            };
            let handle = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker.run())
                .map_err(|source| PipelineError::Spawn {
                    name: thread_name,
                    source,
                })?;
            workers.push(handle);
        }

        info!(
            sink = inner.name(),
            queue_capacity = config.queue_capacity,
            workers = config.workers,
            "async dispatcher started"
        );

        Ok(Self {
            name,
            inner,
            pool,
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            queue_capacity: config.queue_capacity,
            counters,
        })
    }

    /// Events waiting in the queue.
    pub fn queued(&self) -> usize {
        match self.sender.read() {
            Ok(guard) => guard.as_ref().map_or(0, Sender::len),
            Err(poisoned) => poisoned.into_inner().as_ref().map_or(0, Sender::len),
        }
    }

    /// Queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Queue fill ratio in `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        self.queued() as f64 / self.queue_capacity as f64
    }

    /// `true` after [`shutdown`](Self::shutdown).
    pub fn is_shut_down(&self) -> bool {
        match self.sender.read() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            sync_fallbacks: self.counters.sync_fallbacks.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Closes the queue, drains it and joins the workers. Idempotent.
    pub fn shutdown(&self) {
        let sender = match self.sender.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        // dropping the only sender disconnects the workers once the queue is empty
        drop(sender);

        let handles = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if handles.is_empty() {
            return;
        }

        let count = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                warn!(sink = self.inner.name(), "dispatcher worker panicked");
            }
        }
        gauge!(DISPATCHER_QUEUE_DEPTH, LABEL_SINK => self.inner.name().to_owned()).set(0.0);

        let stats = self.stats();
        info!(
            sink = self.inner.name(),
            workers = count,
            delivered = stats.delivered,
            failed = stats.failed,
            sync_fallbacks = stats.sync_fallbacks,
            "async dispatcher stopped"
        );
    }

    fn deliver_sync(&self, event: &LogEvent) -> Result<(), SinkError> {
        self.counters.sync_fallbacks.fetch_add(1, Ordering::Relaxed);
        counter!(DISPATCHER_SYNC_FALLBACK_TOTAL, LABEL_SINK => self.inner.name().to_owned())
            .increment(1);
        self.inner.deliver(event)
    }
}

impl Sink for AsyncDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        // held across try_send so shutdown cannot close the queue mid-offer
        let guard = match self.sender.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            drop(guard);
            debug!(sink = self.inner.name(), "dispatcher shut down, delivering synchronously");
            return self.deliver_sync(event);
        };

        let mut copy = self.pool.acquire();
        copy.copy_from(event);

        match tx.try_send(copy) {
            Ok(()) => {
                let depth = tx.len();
                drop(guard);
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                counter!(DISPATCHER_ENQUEUED_TOTAL, LABEL_SINK => self.inner.name().to_owned())
                    .increment(1);
                gauge!(DISPATCHER_QUEUE_DEPTH, LABEL_SINK => self.inner.name().to_owned())
                    .set(depth as f64);
                Ok(())
            }
            Err(TrySendError::Full(copy)) | Err(TrySendError::Disconnected(copy)) => {
                drop(guard);
                self.pool.release(copy);
                self.deliver_sync(event)
            }
        }
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    rx: Receiver<LogEvent>,
    inner: SharedSink,
    pool: Arc<EventPool>,
    counters: Arc<Counters>,
    sink_name: String,
}

impl Worker {
    fn run(self) {
        // ends once every sender is gone and the queue is empty
        for event in self.rx.iter() {
            match self.inner.deliver(&event) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    counter!(DISPATCHER_DELIVERY_FAILURES_TOTAL, LABEL_SINK => self.sink_name.clone())
                        .increment(1);
                    warn!(sink = %self.sink_name, error = %e, "queued delivery failed");
                }
            }
            self.pool.release(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaylog_core::event::Level;
    use std::sync::Condvar;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    /// Records messages; blocks on "block" until opened; fails on "fail".
    #[derive(Default)]
    struct GatedSink {
        open: Mutex<bool>,
        cond: Condvar,
        entered: AtomicUsize,
        delivered: Mutex<Vec<String>>,
    }

    impl GatedSink {
        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.cond.notify_all();
        }

        fn wait_entered(&self, n: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.entered.load(Ordering::SeqCst) < n {
                assert!(Instant::now() < deadline, "worker never picked up the event");
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        fn messages(&self) -> Vec<String> {
            let mut msgs = self.delivered.lock().unwrap().clone();
            msgs.sort();
            msgs
        }
    }

    impl Sink for GatedSink {
        fn name(&self) -> &str {
            "gated"
        }

        fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
            if event.message == "fail" {
                return Err(SinkError::delivery("gated", "rejected"));
            }
            if event.message == "block" {
                self.entered.fetch_add(1, Ordering::SeqCst);
                let mut open = self.open.lock().unwrap();
                while !*open {
                    open = self.cond.wait(open).unwrap();
                }
            }
            self.delivered.lock().unwrap().push(event.message.clone());
            Ok(())
        }
    }

    fn dispatcher(inner: Arc<GatedSink>, queue_capacity: usize, workers: usize) -> AsyncDispatcher {
        AsyncDispatcher::new(
            inner,
            Arc::new(EventPool::new(64).unwrap()),
            DispatcherConfig {
                queue_capacity,
                workers,
            },
        )
        .unwrap()
    }

    #[test]
    fn zero_capacity_or_workers_fails() {
        let inner: SharedSink = Arc::new(GatedSink::default());
        let pool = Arc::new(EventPool::new(4).unwrap());
        for (queue_capacity, workers) in [(0, 1), (1, 0)] {
            let result = AsyncDispatcher::new(
                inner.clone(),
                pool.clone(),
                DispatcherConfig {
                    queue_capacity,
                    workers,
                },
            );
            assert!(matches!(result, Err(PipelineError::Config { .. })));
        }
    }

    #[test]
    fn every_event_delivered_once_after_shutdown() {
        let inner = Arc::new(GatedSink::default());
        let d = dispatcher(inner.clone(), 256, 4);

        for i in 0..100 {
            d.deliver(&LogEvent::new(Level::Info, format!("e{i:03}")))
                .unwrap();
        }
        d.shutdown();

        let msgs = inner.messages();
        let expected: Vec<String> = (0..100).map(|i| format!("e{i:03}")).collect();
        assert_eq!(msgs, expected);
        assert_eq!(d.stats().delivered, 100);
        assert_eq!(d.stats().sync_fallbacks, 0);
    }

    #[test]
    fn full_queue_delivers_synchronously_with_real_outcome() {
        let inner = Arc::new(GatedSink::default());
        let d = dispatcher(inner.clone(), 1, 1);

        // worker holds "block"
        d.deliver(&LogEvent::new(Level::Info, "block")).unwrap();
        inner.wait_entered(1);
        // fills the queue
        d.deliver(&LogEvent::new(Level::Info, "queued")).unwrap();
        assert_eq!(d.queued(), 1);
        assert_eq!(d.utilization(), 1.0);

        // no room: caller thread gets the inner sink's answer
        let err = d.deliver(&LogEvent::new(Level::Info, "fail")).unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert_eq!(d.stats().sync_fallbacks, 1);

        inner.open();
        d.shutdown();
        assert_eq!(inner.messages(), vec!["block", "queued"]);
    }

    #[test]
    fn deliver_after_shutdown_goes_to_inner() {
        let inner = Arc::new(GatedSink::default());
        let d = dispatcher(inner.clone(), 8, 2);
        d.shutdown();
        d.shutdown();
        assert!(d.is_shut_down());

        d.deliver(&LogEvent::new(Level::Info, "late")).unwrap();
        assert_eq!(inner.messages(), vec!["late"]);
        assert_eq!(d.queued(), 0);
    }

    #[test]
    fn queued_failures_are_counted_not_returned() {
        let inner = Arc::new(GatedSink::default());
        let d = dispatcher(inner, 8, 1);
        d.deliver(&LogEvent::new(Level::Info, "fail")).unwrap();
        d.shutdown();
        assert_eq!(d.stats().failed, 1);
    }

    #[test]
    fn pooled_copies_are_released() {
        let inner = Arc::new(GatedSink::default());
        let pool = Arc::new(EventPool::new(64).unwrap());
        let d = AsyncDispatcher::new(inner, pool.clone(), DispatcherConfig::default()).unwrap();
        for _ in 0..10 {
            d.deliver(&LogEvent::new(Level::Info, "x")).unwrap();
        }
        d.shutdown();
        let stats = pool.stats();
        assert_eq!(stats.hits + stats.misses, 10);
        assert_eq!(stats.returns, 10);
    }

    #[test]
    fn drop_drains_the_queue() {
        let inner = Arc::new(GatedSink::default());
        {
            let d = dispatcher(inner.clone(), 64, 2);
            for i in 0..20 {
                d.deliver(&LogEvent::new(Level::Info, format!("{i:02}")))
                    .unwrap();
            }
        }
        assert_eq!(inner.messages().len(), 20);
    }
}
