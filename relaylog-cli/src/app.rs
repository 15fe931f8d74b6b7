//! The demo run: config, stack, producers, health report, shutdown.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use relaylog_core::config::RelayConfig;
use relaylog_core::error::{ConfigError, RelayError};
use relaylog_core::event::Level;
use relaylog_core::logger::Logger;
use relaylog_pipeline::{HealthMonitor, HealthReport, SinkStackBuilder};

use crate::cli::Cli;
use crate::error::CliError;

/// Level cycle used by producers.
const LEVELS: [Level; 5] = [
    Level::Debug,
    Level::Info,
    Level::Info,
    Level::Warn,
    Level::Error,
];

/// Outcome of a run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Events the stack accepted
    pub emitted: u64,
    /// Events whose delivery returned an error
    pub failed: u64,
    /// Producers were stopped by Ctrl-C
    pub interrupted: bool,
    /// Health after the producers finished
    pub report: HealthReport,
}

/// Loads the config named by `cli`, then applies the diagnostics overrides.
///
/// A missing file falls back to defaults (plus env overrides) only with
/// `--allow-missing-config`.
pub async fn load_config(cli: &Cli) -> Result<RelayConfig, CliError> {
    let mut config = match RelayConfig::load(&cli.config).await {
        Ok(config) => config,
        Err(RelayError::Config(ConfigError::FileNotFound { path }))
            if cli.allow_missing_config =>
        {
            warn!(path = %path, "config file not found, using defaults");
            let mut config = RelayConfig::default();
            config.apply_env_overrides();
            config
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Builds the stack, runs the producers and returns the final health.
pub async fn run(cli: &Cli, config: RelayConfig) -> Result<RunSummary, CliError> {
    relaylog_core::metrics::describe_all();

    let stack = SinkStackBuilder::new(config.clone()).build()?;
    let logger = stack.logger()?;

    let monitor = Arc::new(HealthMonitor::new((&config.health).into())?);
    stack.register_health_checks(&monitor);
    monitor.start()?;

    info!(
        events = cli.events,
        producers = cli.producers,
        sink = stack.sink().name(),
        "producers starting"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let mut producers = {
        let logger = logger.clone();
        let stop = Arc::clone(&stop);
        let (events, count) = (cli.events, cli.producers);
        tokio::task::spawn_blocking(move || produce(&logger, events, count, &stop))
    };

    let (emitted, failed, interrupted) = tokio::select! {
        joined = &mut producers => {
            let (emitted, failed) = joined.map_err(|e| CliError::Runtime(e.to_string()))?;
            (emitted, failed, false)
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, stopping producers");
            stop.store(true, Ordering::Relaxed);
            let (emitted, failed) = producers
                .await
                .map_err(|e| CliError::Runtime(e.to_string()))?;
            (emitted, failed, true)
        }
    };

    monitor.run_checks().await;
    let report = monitor.report();
    monitor.stop().await;

    let pool_stats = stack.event_pool().stats();
    debug!(
        hits = pool_stats.hits,
        misses = pool_stats.misses,
        hit_rate = pool_stats.hit_rate(),
        "event pool usage"
    );
    stack.shutdown()?;

    info!(emitted, failed, interrupted, status = %report.status.as_str(), "run finished");
    Ok(RunSummary {
        emitted,
        failed,
        interrupted,
        report,
    })
}

/// Events producer `index` of `producers` emits.
pub fn share_of(events: u64, producers: u32, index: u32) -> u64 {
    let producers = u64::from(producers.max(1));
    let index = u64::from(index);
    events / producers + u64::from(index < events % producers)
}

fn produce(logger: &Logger, events: u64, producers: u32, stop: &AtomicBool) -> (u64, u64) {
    let emitted = AtomicU64::new(0);
    let failed = AtomicU64::new(0);

    thread::scope(|scope| {
        for index in 0..producers {
            let share = share_of(events, producers, index);
            let logger = logger.with_field("producer", index);
            let (emitted, failed) = (&emitted, &failed);
            scope.spawn(move || {
                for seq in 0..share {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let level = LEVELS[(seq % LEVELS.len() as u64) as usize];
                    match logger.with_field("seq", seq).log(level, "demo event") {
                        Ok(()) => {
                            emitted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            debug!(producer = index, error = %e, "delivery failed");
                        }
                    }
                }
            });
        }
    });

    (emitted.into_inner(), failed.into_inner())
}

/// Writes the summary: JSON health report, or a short text table.
pub fn print_summary(
    summary: &RunSummary,
    json: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if json {
        serde_json::to_writer_pretty(&mut *out, &summary.report)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(
        out,
        "emitted: {}  failed: {}{}",
        summary.emitted,
        summary.failed,
        if summary.interrupted { "  (interrupted)" } else { "" }
    )?;
    writeln!(out, "health: {}", summary.report.status.as_str())?;
    for (name, result) in &summary.report.checks {
        writeln!(
            out,
            "  {:<12} {:<10} {}",
            name,
            result.status.as_str(),
            result.message
        )?;
    }
    Ok(())
}
