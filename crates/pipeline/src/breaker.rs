//! Circuit breaker and the sink wrapper built on it.
//!
//! ```text
//!            failures >= threshold            cooldown elapsed (next call)
//!  Closed ------------------------> Open ------------------------------> HalfOpen
//!    ^                               ^                                      |
//!    |          trial succeeds       |        trial fails                   |
//!    +-------------------------------+--------------------------------------+
//! ```
//!
//! The open -> half-open transition is checked lazily when a call arrives;
//! there is no timer. Exactly one trial call runs in half-open; concurrent
//! callers are rejected like in open.
//!
//! The breaker's lock is never held while the protected operation runs, and
//! state-change callbacks fire after the lock is released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use metrics::counter;
use serde::Serialize;
use tracing::warn;

use relaylog_core::config::BreakerSection;
use relaylog_core::error::SinkError;
use relaylog_core::event::LogEvent;
use relaylog_core::metrics::{
    BREAKER_REJECTIONS_TOTAL, BREAKER_TRANSITIONS_TOTAL, LABEL_SINK, LABEL_STATE,
};
use relaylog_core::sink::{SharedSink, Sink};

use crate::error::PipelineError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without running
    Open,
    /// One trial call decides between closed and open
    HalfOpen,
}

impl CircuitState {
    /// `closed`, `open` or `half-open`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl From<&BreakerSection> for BreakerConfig {
    fn from(section: &BreakerSection) -> Self {
        Self {
            failure_threshold: section.failure_threshold,
            cooldown: section.cooldown(),
        }
    }
}

/// Called with `(from, to)` on every transition.
pub type StateChangeCallback = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

type Transition = (CircuitState, CircuitState);

struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Closed / open / half-open circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    callbacks: RwLock<Vec<StateChangeCallback>>,
}

impl CircuitBreaker {
    /// Creates a closed breaker. `name` labels errors and metrics.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, PipelineError> {
        if config.failure_threshold == 0 {
            return Err(PipelineError::config(
                "failure_threshold",
                "must be greater than 0",
            ));
        }
        Ok(Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
            callbacks: RwLock::new(Vec::new()),
        })
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tuning given at construction.
    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Current state. An open breaker whose cooldown has elapsed still
    /// reports `Open` until the next call.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures counted since the last success.
    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    /// Registers a transition callback.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        match self.callbacks.write() {
            Ok(mut callbacks) => callbacks.push(Arc::new(callback)),
            Err(poisoned) => poisoned.into_inner().push(Arc::new(callback)),
        }
    }

    /// Forces the breaker closed and clears the failure count.
    pub fn reset(&self) {
        let transition = {
            let mut s = self.lock();
            let from = s.state;
            s.state = CircuitState::Closed;
            s.failures = 0;
            s.last_failure = None;
            s.trial_in_flight = false;
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        self.notify(transition);
    }

    /// Runs `op` under breaker protection.
    ///
    /// Returns [`SinkError::Unavailable`] without calling `op` while open
    /// (or while a half-open trial is in flight); otherwise returns `op`'s
    /// own result.
    pub fn execute<T, F>(&self, op: F) -> Result<T, SinkError>
    where
        F: FnOnce() -> Result<T, SinkError>,
    {
        let (is_trial, admitted) = self.admit()?;
        self.notify(admitted);

        let result = op();

        let transition = self.record(is_trial, result.is_ok());
        self.notify(transition);
        result
    }

    fn admit(&self) -> Result<(bool, Option<Transition>), SinkError> {
        let mut s = self.lock();
        let current = s.state;
        match current {
            CircuitState::Closed => Ok((false, None)),
            CircuitState::Open => {
                let cooled = s
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.cooldown);
                if cooled {
                    s.state = CircuitState::HalfOpen;
                    s.trial_in_flight = true;
                    Ok((true, Some((CircuitState::Open, CircuitState::HalfOpen))))
                } else {
                    drop(s);
                    Err(self.reject())
                }
            }
            CircuitState::HalfOpen => {
                if s.trial_in_flight {
                    drop(s);
                    Err(self.reject())
                } else {
                    s.trial_in_flight = true;
                    Ok((true, None))
                }
            }
        }
    }

    fn record(&self, is_trial: bool, success: bool) -> Option<Transition> {
        let mut s = self.lock();
        let from = s.state;

        if is_trial {
            s.trial_in_flight = false;
        }

        if success {
            s.failures = 0;
            if is_trial && s.state == CircuitState::HalfOpen {
                s.state = CircuitState::Closed;
            }
        } else {
            s.failures = s.failures.saturating_add(1);
            s.last_failure = Some(Instant::now());
            match s.state {
                CircuitState::HalfOpen if is_trial => s.state = CircuitState::Open,
                CircuitState::Closed if s.failures >= self.config.failure_threshold => {
                    s.state = CircuitState::Open;
                }
                _ => {}
            }
        }

        (s.state != from).then_some((from, s.state))
    }

    fn reject(&self) -> SinkError {
        counter!(BREAKER_REJECTIONS_TOTAL, LABEL_SINK => self.name.clone()).increment(1);
        SinkError::Unavailable {
            sink: self.name.clone(),
        }
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        counter!(
            BREAKER_TRANSITIONS_TOTAL,
            LABEL_SINK => self.name.clone(),
            LABEL_STATE => to.as_str()
        )
        .increment(1);

        let callbacks = match self.callbacks.read() {
            Ok(callbacks) => callbacks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for callback in callbacks {
            callback(from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &s.state)
            .field("failures", &s.failures)
            .field("config", &self.config)
            .finish()
    }
}

/// Sink wrapper that routes every delivery through a [`CircuitBreaker`].
pub struct BreakerSink {
    name: String,
    inner: SharedSink,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerSink {
    /// Wraps `inner` in a new breaker that logs its transitions.
    pub fn new(inner: SharedSink, config: BreakerConfig) -> Result<Self, PipelineError> {
        let breaker = Arc::new(CircuitBreaker::new(inner.name(), config)?);
        let sink = inner.name().to_owned();
        breaker.on_state_change(move |from, to| {
            warn!(
                sink = %sink,
                from_state = %from,
                to_state = %to,
                "circuit breaker state changed"
            );
        });
        Ok(Self::with_breaker(inner, breaker))
    }

    /// Wraps `inner` in an existing breaker.
    pub fn with_breaker(inner: SharedSink, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            name: format!("breaker({})", inner.name()),
            inner,
            breaker,
        }
    }

    /// The breaker, for state queries and health checks.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl Sink for BreakerSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &LogEvent) -> Result<(), SinkError> {
        self.breaker.execute(|| self.inner.deliver(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                cooldown,
            },
        )
        .unwrap()
    }

    fn fail() -> Result<(), SinkError> {
        Err(SinkError::delivery("test", "boom"))
    }

    #[test]
    fn zero_threshold_fails() {
        let result = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 0,
                cooldown: Duration::from_secs(1),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn opens_after_threshold_and_rejects_without_calling() {
        let cb = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            let err = cb.execute(fail).unwrap_err();
            assert!(!err.is_unavailable());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let calls = AtomicUsize::new(0);
        let err = cb
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.execute(fail).unwrap_err();
        cb.execute(fail).unwrap_err();
        cb.execute(|| Ok(())).unwrap();
        assert_eq!(cb.failures(), 0);
        cb.execute(fail).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_trial_success_closes() {
        let cb = breaker(1, Duration::ZERO);
        cb.execute(fail).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        assert_eq!(cb.execute(|| Ok(7)).unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_trial_failure_reopens() {
        let cb = breaker(1, Duration::ZERO);
        cb.execute(fail).unwrap_err();
        let err = cb.execute(fail).unwrap_err();
        assert!(!err.is_unavailable());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn concurrent_call_during_trial_is_rejected() {
        let cb = breaker(1, Duration::ZERO);
        cb.execute(fail).unwrap_err();

        let inner_result = cb.execute(|| {
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            // second caller while the trial runs
            Ok(cb.execute(|| Ok(())))
        });
        let nested = inner_result.unwrap();
        assert!(nested.unwrap_err().is_unavailable());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn callbacks_see_every_transition() {
        let cb = breaker(1, Duration::ZERO);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cb.on_state_change(move |from, to| sink.lock().unwrap().push((from, to)));

        cb.execute(fail).unwrap_err();
        cb.execute(|| Ok(())).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn callback_may_query_state() {
        let cb = Arc::new(breaker(1, Duration::from_secs(60)));
        let observed = Arc::new(Mutex::new(None));
        let (cb2, obs) = (cb.clone(), observed.clone());
        cb.on_state_change(move |_, _| *obs.lock().unwrap() = Some(cb2.state()));

        cb.execute(fail).unwrap_err();
        assert_eq!(*observed.lock().unwrap(), Some(CircuitState::Open));
    }

    #[test]
    fn reset_forces_closed() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.execute(fail).unwrap_err();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
        cb.execute(|| Ok(())).unwrap();
    }

    #[test]
    fn state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"half-open\""
        );
    }
}
