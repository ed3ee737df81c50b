//! Service configuration from `TESTGRID_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const POLL_INTERVAL_SECS: &str = "TESTGRID_POLL_INTERVAL_SECS";
const ACTIVATION_TIMEOUT_SECS: &str = "TESTGRID_ACTIVATION_TIMEOUT_SECS";
const REPORT_DIR: &str = "TESTGRID_REPORT_DIR";
const PACKAGE_ROOT: &str = "TESTGRID_PACKAGE_ROOT";
const LOG_LEVEL: &str = "TESTGRID_LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Runtime configuration of the master service.
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the poll pass looks for inactive tests.
    pub poll_interval: Duration,

    /// Upper bound on one environment activation.
    pub activation_timeout: Duration,

    /// Directory finalized reports are published into.
    pub report_dir: PathBuf,

    /// Root that relative test package paths are resolved against.
    pub package_root: PathBuf,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            activation_timeout: Duration::from_secs(300),
            report_dir: PathBuf::from("/var/lib/testgrid/reports"),
            package_root: PathBuf::from("/var/lib/testgrid/packages"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: secs(&lookup, POLL_INTERVAL_SECS, defaults.poll_interval)?,
            activation_timeout: secs(&lookup, ACTIVATION_TIMEOUT_SECS, defaults.activation_timeout)?,
            report_dir: lookup(REPORT_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.report_dir),
            package_root: lookup(PACKAGE_ROOT)
                .map(PathBuf::from)
                .unwrap_or(defaults.package_root),
            log_level: lookup(LOG_LEVEL).unwrap_or(defaults.log_level),
        })
    }
}

fn secs(
    lookup: impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.activation_timeout, Duration::from_secs(300));
        assert_eq!(config.report_dir, PathBuf::from("/var/lib/testgrid/reports"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn variables_override_defaults() {
        let config = config_from(&[
            ("TESTGRID_POLL_INTERVAL_SECS", "1"),
            ("TESTGRID_ACTIVATION_TIMEOUT_SECS", "60"),
            ("TESTGRID_REPORT_DIR", "/tmp/reports"),
            ("TESTGRID_LOG_LEVEL", "debug"),
        ])
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.activation_timeout, Duration::from_secs(60));
        assert_eq!(config.report_dir, PathBuf::from("/tmp/reports"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn non_numeric_interval_is_an_error() {
        let err = config_from(&[("TESTGRID_POLL_INTERVAL_SECS", "soon")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "TESTGRID_POLL_INTERVAL_SECS",
                ..
            }
        ));
    }
}
