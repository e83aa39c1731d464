//! Operator settings loaded from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `ASSEMBLY_OPERATOR_NAMESPACE` | all namespaces |
//! | `ASSEMBLY_OPERATOR_LM_CONFIG` | `/var/assembly-operator/config.yaml` |
//! | `ASSEMBLY_OPERATOR_LOG_FORMAT` | `pretty` |
//! | `ASSEMBLY_OPERATOR_PROCESS_POLL_SECS` | `5` |
//! | `ASSEMBLY_OPERATOR_ERROR_REQUEUE_SECS` | `30` |
//! | `ASSEMBLY_OPERATOR_METRICS_ADDR` | `0.0.0.0:9090` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineSettings;
use crate::error::{Error, Result};
use crate::observability::LogFormat;

const DEFAULT_PROCESS_POLL_SECS: u64 = 5;
const DEFAULT_ERROR_REQUEUE_SECS: u64 = 30;
const DEFAULT_METRICS_PORT: u16 = 9090;

/// Operator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Path of the LM connection settings file.
    pub lm_config_path: PathBuf,
    /// Log output format.
    pub log_format: LogFormat,
    /// Delay before re-checking an in-flight LM process.
    pub process_poll_interval: Duration,
    /// Delay before retrying after a failed reconciliation.
    pub error_requeue_interval: Duration,
    /// Address the `/metrics` endpoint listens on.
    pub metrics_addr: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            lm_config_path: PathBuf::from(assembly_lm::config::DEFAULT_CONFIG_PATH),
            log_format: LogFormat::default(),
            process_poll_interval: Duration::from_secs(DEFAULT_PROCESS_POLL_SECS),
            error_requeue_interval: Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECS),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_METRICS_PORT)),
        }
    }
}

impl OperatorConfig {
    /// Loads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a value is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_env_values(env_string)
    }

    /// Loads settings through `lookup`, which returns the trimmed, non-empty
    /// value of a variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a value is malformed.
    pub fn from_env_values<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let log_format = match lookup("ASSEMBLY_OPERATOR_LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => defaults.log_format,
        };
        let metrics_addr = match lookup("ASSEMBLY_OPERATOR_METRICS_ADDR") {
            Some(raw) => raw.parse::<SocketAddr>().map_err(|_| {
                Error::Configuration(format!(
                    "ASSEMBLY_OPERATOR_METRICS_ADDR must be a socket address, got {raw}"
                ))
            })?,
            None => defaults.metrics_addr,
        };
        let config = Self {
            namespace: lookup("ASSEMBLY_OPERATOR_NAMESPACE"),
            lm_config_path: lookup("ASSEMBLY_OPERATOR_LM_CONFIG")
                .map_or(defaults.lm_config_path, PathBuf::from),
            log_format,
            process_poll_interval: Duration::from_secs(parse_u64(
                &lookup,
                "ASSEMBLY_OPERATOR_PROCESS_POLL_SECS",
                DEFAULT_PROCESS_POLL_SECS,
            )?),
            error_requeue_interval: Duration::from_secs(parse_u64(
                &lookup,
                "ASSEMBLY_OPERATOR_ERROR_REQUEUE_SECS",
                DEFAULT_ERROR_REQUEUE_SECS,
            )?),
            metrics_addr,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if an interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.process_poll_interval.is_zero() {
            return Err(Error::Configuration(
                "ASSEMBLY_OPERATOR_PROCESS_POLL_SECS must be greater than zero".into(),
            ));
        }
        if self.error_requeue_interval.is_zero() {
            return Err(Error::Configuration(
                "ASSEMBLY_OPERATOR_ERROR_REQUEUE_SECS must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Returns the engine settings derived from this configuration.
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            process_poll_interval: self.process_poll_interval,
            error_requeue_interval: self.error_requeue_interval,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|_| Error::Configuration(format!("{key} must be an unsigned integer")))
}
