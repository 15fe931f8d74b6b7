//! Diagnostics for the `relaylog` binary.
//!
//! Pipeline diagnostics go to stderr as `json` or `pretty` lines, leaving
//! stdout to the console sink and the run summary.

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use relaylog_core::config::GeneralConfig;

/// Installs the global subscriber for `[general]`. Fails if one is already set.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(diagnostics_filter(config));

    let installed = match config.log_format.as_str() {
        "json" => registry.with(layer.json().flatten_event(true)).try_init(),
        "pretty" => registry.with(layer.pretty()).try_init(),
        other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
    };
    installed.with_context(|| format!("cannot install {} diagnostics", config.log_format))
}

/// `RUST_LOG` when set and valid, `log_level` otherwise.
fn diagnostics_filter(config: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn general(level: &str, format: &str) -> GeneralConfig {
        GeneralConfig {
            log_level: level.to_owned(),
            log_format: format.to_owned(),
        }
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = init_tracing(&general("info", "xml")).unwrap_err();
        assert!(err.to_string().contains("unknown log format 'xml'"));
    }

    #[test]
    #[serial]
    fn rust_log_overrides_configured_level() {
        // SAFETY: tests touching the environment are serialized
        unsafe { std::env::set_var("RUST_LOG", "warn") };
        let filter = diagnostics_filter(&general("debug", "json"));
        unsafe { std::env::remove_var("RUST_LOG") };

        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    #[serial]
    fn configured_level_applies_without_rust_log() {
        // SAFETY: tests touching the environment are serialized
        unsafe { std::env::remove_var("RUST_LOG") };
        let filter = diagnostics_filter(&general("debug", "json"));
        assert_eq!(filter.to_string(), "debug");
    }
}
