//! Fan-out sink.

use std::sync::RwLock;

use relaylog_core::error::SinkError;
use relaylog_core::event::LogEvent;
use relaylog_core::sink::{SharedSink, Sink};

/// Delivers every event to each child sink in order.
///
/// Every child is attempted even when an earlier one fails; the last error
/// is returned.
pub struct MultiSink {
    name: String,
    sinks: RwLock<Vec<SharedSink>>,
}

impl MultiSink {
    /// Fan-out over `sinks`.
    pub fn new(sinks: Vec<SharedSink>) -> Self {
        Self {
            name: "multi".to_owned(),
            sinks: RwLock::new(sinks),
        }
    }

    /// Appends a child.
    pub fn add_sink(&self, sink: SharedSink) {
        match self.sinks.write() {
            Ok(mut sinks) => sinks.push(sink),
            Err(poisoned) => poisoned.into_inner().push(sink),
        }
    }

    /// Removes every child named `name`. Returns how many were removed.
    pub fn remove_sink(&self, name: &str) -> usize {
        let mut sinks = match self.sinks.write() {
            Ok(sinks) => sinks,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = sinks.len();
        sinks.retain(|s| s.name() != name);
        before - sinks.len()
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        match self.sinks.read() {
            Ok(sinks) => sinks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// `true` with no children.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for MultiSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        let sinks = match self.sinks.read() {
            Ok(sinks) => sinks,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut last_err = None;
        for sink in sinks.iter() {
            if let Err(e) = sink.deliver(event) {
                tracing::debug!(sink = sink.name(), error = %e, "fan-out delivery failed");
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaylog_core::event::Level;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        name: &'static str,
        fail: bool,
        count: AtomicUsize,
    }

    impl Counter {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                count: AtomicUsize::new(0),
            })
        }
    }

    impl Sink for Counter {
        fn name(&self) -> &str {
            self.name
        }

        fn deliver(&self, _event: &LogEvent) -> Result<(), SinkError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SinkError::delivery(self.name, "refused"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn failure_does_not_stop_later_sinks() {
        let a = Counter::new("a", true);
        let b = Counter::new("b", false);
        let multi = MultiSink::new(vec![a.clone() as SharedSink, b.clone()]);

        let err = multi.deliver(&LogEvent::new(Level::Info, "x")).unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert_eq!(a.count.load(Ordering::SeqCst), 1);
        assert_eq!(b.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_and_remove() {
        let multi = MultiSink::new(Vec::new());
        assert!(multi.is_empty());
        multi.add_sink(Counter::new("a", false));
        multi.add_sink(Counter::new("b", false));
        assert_eq!(multi.remove_sink("a"), 1);
        assert_eq!(multi.len(), 1);
        multi.deliver(&LogEvent::new(Level::Info, "x")).unwrap();
    }
}
