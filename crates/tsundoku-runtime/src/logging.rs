//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured filter. Output goes to
//! stderr so stdout stays free for chat replies.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use tsundoku_core::{TsundokuError, TsundokuResult};

use crate::config::LogConfig;

/// Filter from `RUST_LOG`, else from the configured directives
pub fn build_filter(config: &LogConfig) -> TsundokuResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| TsundokuError::Config(format!("log filter {:?}: {}", config.filter, e))),
    }
}

/// Install the global subscriber
///
/// Fails if the filter is invalid or a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TsundokuResult<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| TsundokuError::Config(format!("logging already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_filter_parses() {
        let config = LogConfig {
            filter: "tsundoku_throttle=debug,warn".into(),
            json: false,
        };
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            filter: "tsundoku=notalevel".into(),
            json: false,
        };
        assert!(matches!(build_filter(&config), Err(TsundokuError::Config(_))));
    }
}
