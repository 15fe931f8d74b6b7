//! Health monitor and stock health checks.
//!
//! [`HealthMonitor`] runs every registered [`HealthCheck`] on a fixed
//! interval, each under its own timeout, and keeps the latest
//! [`HealthResult`] per check. The overall status is the worst recorded
//! status, and `Unhealthy` while nothing has been recorded.
//!
//! # Aggregation Rule
//!
//! - no results -> Unhealthy
//! - all Healthy -> Healthy
//! - any Degraded, none Unhealthy -> Degraded
//! - any Unhealthy -> Unhealthy
//!
//! A probe that exceeds its timeout is recorded as `Unhealthy`. The probe
//! future is dropped at that point; blocking work it started keeps running
//! to completion on its own thread.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaylog_core::config::HealthSection;
use relaylog_core::event::{Level, LogEvent};
use relaylog_core::metrics::{
    HEALTH_CHECK_TIMEOUTS_TOTAL, HEALTH_CHECKS_TOTAL, LABEL_CHECK, LABEL_STATUS,
};
use relaylog_core::sink::SharedSink;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::dispatcher::AsyncDispatcher;
use crate::error::PipelineError;

/// Boxed future returned by [`HealthCheck::check`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Component health, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Lowercase name used in logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// `true` only for `Healthy`.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single probe reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: HealthStatus,
    /// Human-readable summary
    pub message: String,
    /// Underlying error text, if any
    pub error: Option<String>,
}

impl CheckOutcome {
    /// Healthy outcome.
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    /// Working, but impaired.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, message)
    }

    /// Not working.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }

    /// Attaches the underlying error text.
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
        }
    }
}

/// Latest recorded result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Probe wall time in milliseconds
    pub duration_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl HealthResult {
    fn from_outcome(outcome: CheckOutcome, elapsed: Duration) -> Self {
        Self {
            status: outcome.status,
            message: outcome.message,
            error: outcome.error,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            checked_at: Utc::now(),
        }
    }

    /// Probe wall time.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Serializable snapshot of the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, HealthResult>,
}

/// A health probe.
///
/// Implemented for async closures returning [`CheckOutcome`]:
///
/// ```ignore
/// monitor.add_check("disk", || async { CheckOutcome::healthy("ok") });
/// ```
pub trait HealthCheck: Send + Sync {
    /// Runs the probe once.
    fn check(&self) -> BoxFuture<'_, CheckOutcome>;
}

impl<F, Fut> HealthCheck for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = CheckOutcome> + Send + 'static,
{
    fn check(&self) -> BoxFuture<'_, CheckOutcome> {
        Box::pin(self())
    }
}

/// Monitor timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitorConfig {
    /// Time between probe rounds
    pub interval: Duration,
    /// Per-probe timeout
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&HealthSection> for HealthMonitorConfig {
    fn from(section: &HealthSection) -> Self {
        Self {
            interval: section.interval(),
            probe_timeout: section.probe_timeout(),
        }
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic health prober.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    checks: RwLock<HashMap<String, Arc<dyn HealthCheck>>>,
    results: RwLock<HashMap<String, HealthResult>>,
    task: Mutex<Option<MonitorTask>>,
}

impl HealthMonitor {
    /// Creates a stopped monitor. A zero interval or timeout is rejected.
    pub fn new(config: HealthMonitorConfig) -> Result<Self, PipelineError> {
        if config.interval.is_zero() {
            return Err(PipelineError::config("interval", "must be greater than 0"));
        }
        if config.probe_timeout.is_zero() {
            return Err(PipelineError::config(
                "probe_timeout",
                "must be greater than 0",
            ));
        }
        Ok(Self {
            config,
            checks: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            task: Mutex::new(None),
        })
    }

    /// Registers `check` under `name`, replacing a check of the same name.
    pub fn add_check(&self, name: impl Into<String>, check: impl HealthCheck + 'static) {
        self.add_shared_check(name, Arc::new(check));
    }

    /// Registers an already shared check.
    pub fn add_shared_check(&self, name: impl Into<String>, check: Arc<dyn HealthCheck>) {
        let name = name.into();
        debug!(check = %name, "health check registered");
        write(&self.checks).insert(name, check);
    }

    /// Unregisters `name` and forgets its last result.
    pub fn remove_check(&self, name: &str) -> bool {
        let removed = write(&self.checks).remove(name).is_some();
        write(&self.results).remove(name);
        removed
    }

    /// Registered check names, sorted.
    pub fn check_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.checks).keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts the probe loop on the current tokio runtime.
    ///
    /// The first round runs one `interval` after start.
    pub fn start(self: &Arc<Self>) -> Result<(), PipelineError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::Runtime(e.to_string()))?;

        let mut task = lock(&self.task);
        if task.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let monitor = Arc::downgrade(self);
        let interval = self.config.interval;
        let handle = runtime.spawn(run_loop(monitor, interval, token));

        info!(
            interval_ms = interval.as_millis() as u64,
            probe_timeout_ms = self.config.probe_timeout.as_millis() as u64,
            "health monitor started"
        );
        *task = Some(MonitorTask { cancel, handle });
        Ok(())
    }

    /// `true` between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        lock(&self.task).is_some()
    }

    /// Cancels the probe loop and waits for it to exit. Probes still in
    /// flight run to completion but their results are discarded.
    pub async fn stop(&self) {
        let task = lock(&self.task).take();
        let Some(task) = task else {
            return;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(error = %e, "health monitor loop ended abnormally");
        }
        info!("health monitor stopped");
    }

    /// Runs one round of every registered check concurrently.
    pub async fn run_checks(&self) {
        self.run_round(None).await;
    }

    /// Results arriving after `cancel` fires are discarded.
    async fn run_round(&self, cancel: Option<&CancellationToken>) {
        let checks: Vec<(String, Arc<dyn HealthCheck>)> = read(&self.checks)
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();
        if checks.is_empty() {
            return;
        }

        let timeout = self.config.probe_timeout;
        let mut probes = JoinSet::new();
        for (name, check) in checks {
            probes.spawn(async move {
                let started = Instant::now();
                let probe = tokio::time::timeout(timeout, check.check()).await;
                let outcome = match probe {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        counter!(HEALTH_CHECK_TIMEOUTS_TOTAL, LABEL_CHECK => name.clone())
                            .increment(1);
                        CheckOutcome::unhealthy(format!(
                            "check timed out after {}ms",
                            timeout.as_millis()
                        ))
                    }
                };
                let result = HealthResult::from_outcome(outcome, started.elapsed());
                (name, check, result)
            });
        }

        while let Some(joined) = probes.join_next().await {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                continue;
            }
            match joined {
                Ok((name, check, result)) => self.record(name, &check, result),
                Err(e) => warn!(error = %e, "health probe task failed"),
            }
        }
    }

    fn record(&self, name: String, check: &Arc<dyn HealthCheck>, result: HealthResult) {
        // held until the result is stored so a concurrent remove cannot interleave
        let checks = read(&self.checks);
        // removed or replaced while the probe ran
        if !checks
            .get(&name)
            .is_some_and(|current| Arc::ptr_eq(current, check))
        {
            return;
        }
        counter!(
            HEALTH_CHECKS_TOTAL,
            LABEL_CHECK => name.clone(),
            LABEL_STATUS => result.status.as_str()
        )
        .increment(1);
        if result.status.is_healthy() {
            debug!(check = %name, duration_ms = result.duration_ms, "health check passed");
        } else {
            warn!(
                check = %name,
                status = %result.status,
                message = %result.message,
                error = result.error.as_deref().unwrap_or(""),
                "health check not healthy"
            );
        }
        write(&self.results).insert(name, result);
    }

    /// Latest result per check.
    pub fn health(&self) -> HashMap<String, HealthResult> {
        read(&self.results).clone()
    }

    /// Worst recorded status; `Unhealthy` when nothing is recorded.
    pub fn overall_status(&self) -> HealthStatus {
        read(&self.results)
            .values()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Unhealthy)
    }

    /// Snapshot suitable for JSON output.
    pub fn report(&self) -> HealthReport {
        let checks: BTreeMap<String, HealthResult> = read(&self.results)
            .iter()
            .map(|(name, result)| (name.clone(), result.clone()))
            .collect();
        let status = checks
            .values()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Unhealthy);
        HealthReport {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.cancel.cancel();
        }
    }
}

async fn run_loop(monitor: Weak<HealthMonitor>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(monitor) = monitor.upgrade() else {
            break;
        };
        // on stop the round is detached: probes finish, results are dropped
        let token = cancel.clone();
        let mut round = tokio::spawn(async move { monitor.run_round(Some(&token)).await });
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut round => {}
        }
    }
    debug!("health monitor loop exited");
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ─── Stock checks ───────────────────────────────────────────────────

/// Default slow-probe threshold of [`SinkHealthCheck`].
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(5);

/// Delivers a probe event through a sink.
///
/// Failure is unhealthy; a delivery slower than the threshold is degraded.
/// The delivery runs on the blocking pool.
pub struct SinkHealthCheck {
    sink: SharedSink,
    slow_threshold: Duration,
}

impl SinkHealthCheck {
    /// Probes `sink` with the default slow threshold.
    pub fn new(sink: SharedSink) -> Self {
        Self {
            sink,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }

    /// Deliveries slower than `threshold` report degraded.
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }
}

impl HealthCheck for SinkHealthCheck {
    fn check(&self) -> BoxFuture<'_, CheckOutcome> {
        let sink = Arc::clone(&self.sink);
        let slow_threshold = self.slow_threshold;
        Box::pin(async move {
            let probe = tokio::task::spawn_blocking(move || {
                let event = LogEvent::new(Level::Info, "health check probe")
                    .with_field("health_check", true);
                let started = Instant::now();
                let result = sink.deliver(&event);
                (result, started.elapsed())
            })
            .await;

            match probe {
                Ok((Ok(()), elapsed)) if elapsed > slow_threshold => CheckOutcome::degraded(
                    format!("sink responded slowly ({}ms)", elapsed.as_millis()),
                ),
                Ok((Ok(()), _)) => CheckOutcome::healthy("sink accepted probe event"),
                Ok((Err(e), _)) => CheckOutcome::unhealthy("sink rejected probe event").with_error(e),
                Err(e) => CheckOutcome::unhealthy("sink probe panicked").with_error(e),
            }
        })
    }
}

/// Maps breaker state to health: closed, half-open, open.
pub struct BreakerHealthCheck {
    breaker: Arc<CircuitBreaker>,
}

impl BreakerHealthCheck {
    /// Watches `breaker`.
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl HealthCheck for BreakerHealthCheck {
    fn check(&self) -> BoxFuture<'_, CheckOutcome> {
        let outcome = match self.breaker.state() {
            CircuitState::Closed => CheckOutcome::healthy("circuit closed"),
            CircuitState::HalfOpen => CheckOutcome::degraded("circuit half-open, probing"),
            CircuitState::Open => CheckOutcome::unhealthy(format!(
                "circuit open after {} failures",
                self.breaker.failures()
            )),
        };
        Box::pin(std::future::ready(outcome))
    }
}

/// Queue utilization above this is degraded.
pub const DISPATCHER_DEGRADED_UTILIZATION: f64 = 0.9;

/// Reports dispatcher queue pressure.
pub struct DispatcherHealthCheck {
    dispatcher: Arc<AsyncDispatcher>,
}

impl DispatcherHealthCheck {
    /// Watches `dispatcher`.
    pub fn new(dispatcher: Arc<AsyncDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl HealthCheck for DispatcherHealthCheck {
    fn check(&self) -> BoxFuture<'_, CheckOutcome> {
        let outcome = if self.dispatcher.is_shut_down() {
            CheckOutcome::unhealthy("dispatcher shut down")
        } else {
            let utilization = self.dispatcher.utilization();
            if utilization > DISPATCHER_DEGRADED_UTILIZATION {
                CheckOutcome::degraded(format!(
                    "queue utilization high: {:.1}%",
                    utilization * 100.0
                ))
            } else {
                CheckOutcome::healthy(format!(
                    "queue {}/{}",
                    self.dispatcher.queued(),
                    self.dispatcher.queue_capacity()
                ))
            }
        };
        Box::pin(std::future::ready(outcome))
    }
}
