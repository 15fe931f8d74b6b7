//! Deterministic sampling filter.
//!
//! Call `c` (1-based, per instance) is forwarded iff `(c % 100) < rate * 100`.
//! The same rate on a fresh instance always forwards the same indices.
//! Suppressed events count as successful deliveries.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

use relaylog_core::error::SinkError;
use relaylog_core::event::LogEvent;
use relaylog_core::metrics::{LABEL_SINK, SAMPLING_SUPPRESSED_TOTAL};
use relaylog_core::sink::{SharedSink, Sink};

use crate::error::PipelineError;

/// Sink wrapper forwarding a fixed fraction of events.
pub struct SamplingSink {
    name: String,
    inner: SharedSink,
    rate: f64,
    threshold: f64,
    calls: AtomicU64,
    forwarded: AtomicU64,
    suppressed: AtomicU64,
}

impl SamplingSink {
    /// Forwards `rate` (in `0.0..=1.0`) of the events to `inner`.
    pub fn new(inner: SharedSink, rate: f64) -> Result<Self, PipelineError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(PipelineError::config("rate", "must be within 0.0-1.0"));
        }
        Ok(Self {
            name: format!("sampling({})", inner.name()),
            inner,
            rate,
            threshold: rate * 100.0,
            calls: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        })
    }

    /// Configured rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Events passed to the inner sink.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Events dropped by sampling.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    fn admits(&self, call: u64) -> bool {
        ((call % 100) as f64) < self.threshold
    }
}

impl Sink for SamplingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.admits(call) {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            counter!(SAMPLING_SUPPRESSED_TOTAL, LABEL_SINK => self.inner.name().to_owned())
                .increment(1);
            return Ok(());
        }
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.inner.deliver(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use relaylog_core::event::Level;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    impl Sink for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
            let idx = event.fields["idx"].as_u64().unwrap_or_default();
            self.seen.lock().unwrap().push(idx);
            Ok(())
        }
    }

    fn run(rate: f64, calls: u64) -> Vec<u64> {
        let recorder = Arc::new(Recorder::default());
        let sink = SamplingSink::new(recorder.clone(), rate).unwrap();
        for idx in 1..=calls {
            sink.deliver(&LogEvent::new(Level::Info, "s").with_field("idx", idx))
                .unwrap();
        }
        let seen = recorder.seen.lock().unwrap().clone();
        seen
    }

    #[test]
    fn rate_out_of_range_fails() {
        for rate in [-0.1, 1.01, f64::NAN] {
            let inner: SharedSink = Arc::new(Recorder::default());
            assert!(SamplingSink::new(inner, rate).is_err(), "{rate}");
        }
    }

    #[test]
    fn fifth_of_hundred_calls() {
        let seen = run(0.2, 100);
        assert_eq!(seen.len(), 20);
        let mut expected: Vec<u64> = (1..20).collect();
        expected.push(100);
        assert_eq!(seen, expected);
    }

    #[test]
    fn full_and_zero_rate() {
        assert_eq!(run(1.0, 250).len(), 250);
        assert!(run(0.0, 250).is_empty());
    }

    #[test]
    fn counters_track_decisions() {
        let inner: SharedSink = Arc::new(Recorder::default());
        let sink = SamplingSink::new(inner, 0.5).unwrap();
        for _ in 0..100 {
            sink.deliver(&LogEvent::new(Level::Debug, "x").with_field("idx", 0))
                .unwrap();
        }
        assert_eq!(sink.forwarded(), 50);
        assert_eq!(sink.suppressed(), 50);
    }

    #[test]
    fn stats_readable_while_delivering_concurrently() {
        let inner: SharedSink = Arc::new(Recorder::default());
        let sink = Arc::new(SamplingSink::new(inner, 1.0).unwrap());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..20_000 {
                        sink.deliver(&LogEvent::new(Level::Info, "c").with_field("idx", 0))
                            .unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..100_000 {
            assert_eq!(sink.suppressed(), 0);
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(sink.forwarded(), 80_000);
        assert_eq!(sink.suppressed(), 0);
    }

    proptest! {
        #[test]
        fn fresh_instances_pick_same_indices(percent in 0u32..=100, calls in 1u64..400) {
            let rate = f64::from(percent) / 100.0;
            prop_assert_eq!(run(rate, calls), run(rate, calls));
        }

        #[test]
        fn forwards_rate_share_of_each_hundred(percent in 0u32..=100) {
            let rate = f64::from(percent) / 100.0;
            let forwarded = run(rate, 100).len() as f64;
            prop_assert!((forwarded - rate * 100.0).abs() <= 1.0);
        }
    }
}
