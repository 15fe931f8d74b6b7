//! Configuration: `relaylog.toml` parsing and environment overrides.
//!
//! [`RelayConfig`] holds every construction parameter of the pipeline
//! (queue capacity, worker count, rotation limits, breaker threshold and
//! cooldown, sampling rate, monitor interval). Each component reads only its
//! own section.
//!
//! # Precedence
//! 1. CLI arguments (applied by the binary)
//! 2. Environment variables (`RELAYLOG_DISPATCHER_WORKERS=8`)
//! 3. Config file (`relaylog.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), relaylog_core::error::RelayError> {
//! use relaylog_core::config::RelayConfig;
//!
//! // file + env overrides + validation
//! let config = RelayConfig::load("relaylog.toml").await?;
//!
//! // straight from a TOML string
//! let config = RelayConfig::parse("[sampling]\nenabled = true\nrate = 0.25")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, RelayError};
use crate::event::Level;
use crate::pool::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_BUFFER_MAX_CAPACITY, DEFAULT_BUFFER_RETAIN,
    DEFAULT_EVENT_RETAIN,
};

/// Upper bound on dispatcher worker threads.
pub const MAX_WORKERS: usize = 256;
/// Upper bound on the dispatcher queue.
pub const MAX_QUEUE_CAPACITY: usize = 10_000_000;

/// Root of `relaylog.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Internal diagnostics
    #[serde(default)]
    pub general: GeneralConfig,
    /// Logger handle settings
    #[serde(default)]
    pub logger: LoggerConfig,
    /// File and rotation settings
    #[serde(default)]
    pub file: FileConfig,
    /// Async dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    /// Circuit breaker settings
    #[serde(default)]
    pub breaker: BreakerSection,
    /// Sampling filter settings
    #[serde(default)]
    pub sampling: SamplingSection,
    /// Health monitor settings
    #[serde(default)]
    pub health: HealthSection,
    /// Pool sizes
    #[serde(default)]
    pub pool: PoolSection,
}

impl RelayConfig {
    /// Loads a TOML file, applies env overrides and validates.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file without env overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                RelayError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string. Missing sections take their defaults.
    pub fn parse(toml_str: &str) -> Result<Self, RelayError> {
        toml::from_str(toml_str).map_err(|e| {
            RelayError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies `RELAYLOG_{SECTION}_{FIELD}` environment variables.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "RELAYLOG_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "RELAYLOG_GENERAL_LOG_FORMAT");

        // Logger
        override_string(&mut self.logger.level, "RELAYLOG_LOGGER_LEVEL");
        override_string(&mut self.logger.format, "RELAYLOG_LOGGER_FORMAT");
        override_string(&mut self.logger.output, "RELAYLOG_LOGGER_OUTPUT");
        override_bool(
            &mut self.logger.include_caller,
            "RELAYLOG_LOGGER_INCLUDE_CALLER",
        );

        // File
        override_string(&mut self.file.path, "RELAYLOG_FILE_PATH");
        override_u64(&mut self.file.max_size, "RELAYLOG_FILE_MAX_SIZE");
        override_usize(&mut self.file.max_files, "RELAYLOG_FILE_MAX_FILES");

        // Dispatcher
        override_bool(&mut self.dispatcher.enabled, "RELAYLOG_DISPATCHER_ENABLED");
        override_usize(
            &mut self.dispatcher.queue_capacity,
            "RELAYLOG_DISPATCHER_QUEUE_CAPACITY",
        );
        override_usize(&mut self.dispatcher.workers, "RELAYLOG_DISPATCHER_WORKERS");

        // Breaker
        override_bool(&mut self.breaker.enabled, "RELAYLOG_BREAKER_ENABLED");
        override_u32(
            &mut self.breaker.failure_threshold,
            "RELAYLOG_BREAKER_FAILURE_THRESHOLD",
        );
        override_u64(&mut self.breaker.cooldown_ms, "RELAYLOG_BREAKER_COOLDOWN_MS");

        // Sampling
        override_bool(&mut self.sampling.enabled, "RELAYLOG_SAMPLING_ENABLED");
        override_f64(&mut self.sampling.rate, "RELAYLOG_SAMPLING_RATE");

        // Health
        override_u64(&mut self.health.interval_secs, "RELAYLOG_HEALTH_INTERVAL_SECS");
        override_u64(
            &mut self.health.probe_timeout_secs,
            "RELAYLOG_HEALTH_PROBE_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.health.slow_threshold_ms,
            "RELAYLOG_HEALTH_SLOW_THRESHOLD_MS",
        );

        // Pool
        override_usize(&mut self.pool.event_retain, "RELAYLOG_POOL_EVENT_RETAIN");
        override_usize(&mut self.pool.buffer_retain, "RELAYLOG_POOL_BUFFER_RETAIN");
        override_usize(
            &mut self.pool.buffer_capacity,
            "RELAYLOG_POOL_BUFFER_CAPACITY",
        );
        override_usize(
            &mut self.pool.buffer_max_capacity,
            "RELAYLOG_POOL_BUFFER_MAX_CAPACITY",
        );
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), RelayError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if Level::from_str_loose(&self.logger.level).is_none() {
            return Err(invalid(
                "logger.level",
                "must be one of: debug, info, warn, error, fatal, panic",
            ));
        }

        if OutputFormat::from_name(&self.logger.format).is_none() {
            return Err(invalid("logger.format", "must be one of: text, json"));
        }

        match OutputKind::from_name(&self.logger.output) {
            None => {
                return Err(invalid(
                    "logger.output",
                    "must be one of: console, file, rotating",
                ));
            }
            Some(OutputKind::File | OutputKind::Rotating) if self.file.path.is_empty() => {
                return Err(invalid(
                    "file.path",
                    "must not be empty when output is file or rotating",
                ));
            }
            Some(_) => {}
        }

        if self.file.max_size == 0 {
            return Err(invalid("file.max_size", "must be greater than 0"));
        }
        if self.file.max_files == 0 {
            return Err(invalid("file.max_files", "must be greater than 0"));
        }

        if self.dispatcher.workers == 0 || self.dispatcher.workers > MAX_WORKERS {
            return Err(invalid(
                "dispatcher.workers",
                format!("must be 1-{MAX_WORKERS}"),
            ));
        }
        if self.dispatcher.queue_capacity == 0 || self.dispatcher.queue_capacity > MAX_QUEUE_CAPACITY
        {
            return Err(invalid(
                "dispatcher.queue_capacity",
                format!("must be 1-{MAX_QUEUE_CAPACITY}"),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(invalid(
                "breaker.failure_threshold",
                "must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.sampling.rate) {
            return Err(invalid("sampling.rate", "must be within 0.0-1.0"));
        }

        if self.health.interval_secs == 0 {
            return Err(invalid("health.interval_secs", "must be greater than 0"));
        }
        if self.health.probe_timeout_secs == 0 {
            return Err(invalid(
                "health.probe_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.pool.event_retain == 0 || self.pool.buffer_retain == 0 {
            return Err(invalid("pool", "retain limits must be greater than 0"));
        }
        if self.pool.buffer_max_capacity < self.pool.buffer_capacity {
            return Err(invalid(
                "pool.buffer_max_capacity",
                "must be at least pool.buffer_capacity",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> RelayError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// Event rendering selected by `logger.format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// Parses `text` / `json`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Base sink selected by `logger.output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Console,
    File,
    Rotating,
}

impl OutputKind {
    /// Parses `console` / `file` / `rotating`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "console" | "stdout" => Some(Self::Console),
            "file" => Some(Self::File),
            "rotating" => Some(Self::Rotating),
            _ => None,
        }
    }
}

/// `[general]`: the pipeline's own tracing output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Diagnostic level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Diagnostic format (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// `[logger]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum event level
    pub level: String,
    /// Event rendering (text, json)
    pub format: String,
    /// Base sink (console, file, rotating)
    pub output: String,
    /// Record `file:line` of each call site
    pub include_caller: bool,
    /// Fields added to every event
    pub default_fields: BTreeMap<String, String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "text".to_owned(),
            output: "console".to_owned(),
            include_caller: false,
            default_fields: BTreeMap::new(),
        }
    }
}

impl LoggerConfig {
    /// Parsed minimum level, `Info` when unparseable.
    pub fn min_level(&self) -> Level {
        Level::from_str_loose(&self.level).unwrap_or_default()
    }
}

/// `[file]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Active log file path
    pub path: String,
    /// Rotation threshold in bytes
    pub max_size: u64,
    /// Number of rotated files kept (`path.1` .. `path.N`)
    pub max_files: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: "relaylog.log".to_owned(),
            max_size: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// `[dispatcher]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    /// Deliver through the async dispatcher
    pub enabled: bool,
    /// Bounded queue capacity
    pub queue_capacity: usize,
    /// Worker thread count
    pub workers: usize,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1000,
            workers: 4,
        }
    }
}

/// `[breaker]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    /// Wrap the stack in a circuit breaker
    pub enabled: bool,
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time the breaker stays open before a trial call (ms)
    pub cooldown_ms: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

impl BreakerSection {
    /// Cooldown as a `Duration`.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// `[sampling]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSection {
    /// Wrap the stack in a sampling filter
    pub enabled: bool,
    /// Fraction of events forwarded, `0.0..=1.0`
    pub rate: f64,
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: 1.0,
        }
    }
}

/// `[health]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// Seconds between probe rounds
    pub interval_secs: u64,
    /// Per-probe timeout (seconds)
    pub probe_timeout_secs: u64,
    /// Sink probes slower than this report degraded (ms)
    pub slow_threshold_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            probe_timeout_secs: 30,
            slow_threshold_ms: 5_000,
        }
    }
}

impl HealthSection {
    /// Probe interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Slow-probe threshold.
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

/// `[pool]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Retained events
    pub event_retain: usize,
    /// Retained buffers
    pub buffer_retain: usize,
    /// Initial buffer capacity (bytes)
    pub buffer_capacity: usize,
    /// Largest buffer kept for reuse (bytes)
    pub buffer_max_capacity: usize,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            event_retain: DEFAULT_EVENT_RETAIN,
            buffer_retain: DEFAULT_BUFFER_RETAIN,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            buffer_max_capacity: DEFAULT_BUFFER_MAX_CAPACITY,
        }
    }
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_f64(target: &mut f64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<f64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse f64 from env var, ignoring"
            ),
        }
    }
}
