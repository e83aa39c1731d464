//! Reconciliation metrics.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `assembly_operator_passes_total` | Counter | `outcome` | Reconciliation passes by outcome |
//! | `assembly_operator_intents_total` | Counter | `intent`, `result` | Intents submitted to LM |
//! | `assembly_operator_pass_duration_seconds` | Histogram | - | Duration of a reconciliation pass |
//!
//! The binary installs a Prometheus recorder with [`init_metrics`] and serves
//! it on `/metrics`. Without an installed recorder every metric is a no-op.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::crd::IntentType;
use crate::error::{Error, Result};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder and returns its handle.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Configuration(format!("failed to install prometheus recorder: {e}")))?;

    describe_counter!(names::PASSES_TOTAL, "Reconciliation passes by outcome");
    describe_counter!(names::INTENTS_TOTAL, "Intents submitted to LM");
    describe_histogram!(
        names::PASS_DURATION_SECONDS,
        "Duration of a reconciliation pass in seconds"
    );
    tracing::info!("prometheus metrics recorder installed");

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Returns the installed Prometheus handle, if any.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Handler for `GET /metrics`.
pub async fn serve_metrics() -> impl IntoResponse {
    match prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; version=0.0.4")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Metric names.
pub mod names {
    /// Counter: reconciliation passes by outcome.
    pub const PASSES_TOTAL: &str = "assembly_operator_passes_total";
    /// Counter: intents submitted to LM.
    pub const INTENTS_TOTAL: &str = "assembly_operator_intents_total";
    /// Histogram: reconciliation pass duration in seconds.
    pub const PASS_DURATION_SECONDS: &str = "assembly_operator_pass_duration_seconds";
}

/// Label keys.
pub mod labels {
    /// Pass outcome (`converged`, `requeued`, `error`).
    pub const OUTCOME: &str = "outcome";
    /// Intent type.
    pub const INTENT: &str = "intent";
    /// Intent submission result (`accepted`, `rejected`).
    pub const RESULT: &str = "result";
}

/// Outcome of a reconciliation pass, as reported in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcomeLabel {
    /// Nothing left to do.
    Converged,
    /// The pass asked to run again.
    Requeued,
    /// The pass failed.
    Error,
}

impl PassOutcomeLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Requeued => "requeued",
            Self::Error => "error",
        }
    }
}

/// Records operator metrics.
#[derive(Debug, Clone, Default)]
pub struct OperatorMetrics;

impl OperatorMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts a finished reconciliation pass.
    pub fn record_pass(&self, outcome: PassOutcomeLabel) {
        counter!(names::PASSES_TOTAL, labels::OUTCOME => outcome.as_str()).increment(1);
    }

    /// Counts an intent submission.
    pub fn record_intent(&self, intent: IntentType, accepted: bool) {
        let result = if accepted { "accepted" } else { "rejected" };
        counter!(
            names::INTENTS_TOTAL,
            labels::INTENT => intent.as_str(),
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Records the duration of a reconciliation pass.
    pub fn observe_pass_duration(&self, duration: Duration) {
        histogram!(names::PASS_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Starts timing a pass; the duration is recorded when the guard drops.
    #[must_use]
    pub fn time_pass(&self) -> TimingGuard<impl FnOnce(Duration) + use<>> {
        let metrics = self.clone();
        TimingGuard::new(move |duration| metrics.observe_pass_duration(duration))
    }
}

/// RAII guard that reports the elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a guard that calls `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the time elapsed since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
