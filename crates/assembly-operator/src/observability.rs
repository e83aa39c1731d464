//! Logging initialization and span helpers.

use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(Error::Configuration(format!(
                "unknown log format {other}, expected json or pretty"
            ))),
        }
    }
}

/// Filter used when `RUST_LOG` is unset. Operator and kube-rs events are kept
/// at `info`; the HTTP and TLS stacks beneath the LM and Kubernetes clients
/// are held to `warn` so connection chatter stays out of reconcile logs.
pub const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber. Only the first call has an effect.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter());
        match format {
            LogFormat::Json => registry.with(fmt::layer().json().with_current_span(true)).init(),
            LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
        }
    });
}

/// Creates the span wrapping one reconciliation pass.
#[must_use]
pub fn reconcile_span(namespace: &str, name: &str) -> Span {
    tracing::info_span!("reconcile", namespace = namespace, assembly = name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().expect("parse"), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().expect("parse"), LogFormat::Pretty);
        assert!("text".parse::<LogFormat>().is_err());
    }

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
        let span = reconcile_span("default", "svc-a");
        let _guard = span.enter();
        tracing::info!("inside reconcile span");
    }
}
