//! The synchronization engine.
//!
//! One [`SyncEngine::run`] call is one reconciliation pass over one Assembly:
//!
//! 1. Refresh the observed state from LM.
//! 2. Wait while a process is in flight.
//! 3. Create or delete the remote Assembly, guarded by the finalizer.
//! 4. Move the Assembly to its intended state.
//! 5. Correct descriptor and property drift.
//!
//! Steps run in [`SyncStep::ORDER`] until one halts. At most one intent is
//! submitted per pass. The pass then computes the sync state and persists
//! the resource.

pub mod steps;
pub mod sync_state;

use std::sync::Arc;
use std::time::Duration;

use assembly_lm::LmApi;

use crate::crd::{Assembly, IntentType};
use crate::error::Error;
use crate::metrics::{OperatorMetrics, PassOutcomeLabel};
use crate::store::{AssemblyStore, ObjectKey};

pub use steps::{Halt, StepOutcome, SyncStep, detect_drift};
pub use sync_state::next_sync_state;

/// Pacing of reconciliation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Delay before re-checking an in-flight LM process.
    pub process_poll_interval: Duration,
    /// Delay before retrying after a failed pass.
    pub error_requeue_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            process_poll_interval: Duration::from_secs(5),
            error_requeue_interval: Duration::from_secs(30),
        }
    }
}

/// When the resource should be reconciled again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequeueDirective {
    /// Whether another pass is needed without an external change.
    pub requeue: bool,
    /// Delay before the next pass.
    pub requeue_after: Option<Duration>,
}

impl RequeueDirective {
    /// No further pass is needed.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            requeue: false,
            requeue_after: None,
        }
    }

    /// Run again after `delay`.
    #[must_use]
    pub const fn after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(delay),
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct PassOutcome {
    /// When to run again.
    pub directive: RequeueDirective,
    /// The error that failed the pass, if any.
    pub error: Option<Error>,
}

impl PassOutcome {
    /// A converged pass.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            directive: RequeueDirective::done(),
            error: None,
        }
    }

    /// A failed pass retried after `delay`.
    #[must_use]
    pub const fn failed(error: Error, delay: Duration) -> Self {
        Self {
            directive: RequeueDirective::after(delay),
            error: Some(error),
        }
    }

    /// Returns true if the pass failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An intent submitted during the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedIntent {
    /// Kind of intent.
    pub intent_type: IntentType,
    /// Id of the LM process running it.
    pub process_id: String,
}

/// Working state of one pass. Never shared across passes.
#[derive(Debug)]
pub struct PassContext {
    assembly: Assembly,
    key: ObjectKey,
    errors: Vec<Error>,
    started: Option<StartedIntent>,
    finalizer_removed: bool,
    resource_gone: bool,
}

impl PassContext {
    /// Starts a pass over `assembly`.
    #[must_use]
    pub fn new(assembly: Assembly) -> Self {
        let key = ObjectKey::for_resource(&assembly);
        Self {
            assembly,
            key,
            errors: Vec::new(),
            started: None,
            finalizer_removed: false,
            resource_gone: false,
        }
    }

    /// The working copy of the resource.
    #[must_use]
    pub const fn assembly(&self) -> &Assembly {
        &self.assembly
    }

    /// The key of the resource.
    #[must_use]
    pub const fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Errors recorded so far, in order.
    #[must_use]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// The intent submitted in this pass, if any.
    #[must_use]
    pub const fn started(&self) -> Option<&StartedIntent> {
        self.started.as_ref()
    }

    /// Whether the finalizer was cleared in this pass.
    #[must_use]
    pub const fn finalizer_removed(&self) -> bool {
        self.finalizer_removed
    }

    /// Consumes the context, returning the working copy of the resource.
    #[must_use]
    pub fn into_assembly(self) -> Assembly {
        self.assembly
    }
}

/// Runs reconciliation passes against LM and the resource store.
#[derive(Clone)]
pub struct SyncEngine {
    lm: Arc<dyn LmApi>,
    store: Arc<dyn AssemblyStore>,
    settings: EngineSettings,
    metrics: OperatorMetrics,
}

impl SyncEngine {
    /// Creates an engine reporting through `metrics`.
    #[must_use]
    pub fn new(
        lm: Arc<dyn LmApi>,
        store: Arc<dyn AssemblyStore>,
        settings: EngineSettings,
        metrics: OperatorMetrics,
    ) -> Self {
        Self {
            lm,
            store,
            settings,
            metrics,
        }
    }

    /// The engine's pacing settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Runs one reconciliation pass over `assembly`.
    pub async fn run(&self, assembly: Assembly) -> PassOutcome {
        let _timer = self.metrics.time_pass();
        let mut ctx = PassContext::new(assembly);
        tracing::debug!(
            resource = %ctx.key,
            generation = ?ctx.assembly.metadata.generation,
            "starting reconciliation pass"
        );

        let halt = self.run_steps(&mut ctx).await;
        self.finalize(ctx, halt).await
    }

    /// Runs the steps in order and returns the halt that stopped them, if any.
    pub async fn run_steps(&self, ctx: &mut PassContext) -> Option<Halt> {
        for step in SyncStep::ORDER {
            match self.run_step(step, ctx).await {
                StepOutcome::Continue => {}
                StepOutcome::Halt(mut halt) => {
                    tracing::debug!(resource = %ctx.key, ?step, requeue = halt.requeue, "pass halted");
                    if let Some(err) = halt.error.take() {
                        tracing::warn!(resource = %ctx.key, ?step, error = %err, "step failed");
                        ctx.errors.push(err);
                    }
                    return Some(halt);
                }
            }
        }
        None
    }

    async fn finalize(&self, mut ctx: PassContext, halt: Option<Halt>) -> PassOutcome {
        if ctx.started.is_some() {
            if let StepOutcome::Halt(Halt {
                error: Some(err), ..
            }) = self.refresh_observed_state(&mut ctx).await
            {
                ctx.errors.push(err);
            }
        }

        let messages: Vec<String> = ctx.errors.iter().map(ToString::to_string).collect();
        let previous = ctx.assembly.status_or_default().sync_state;
        ctx.assembly.status_mut().sync_state = next_sync_state(&previous, &messages);

        let mut store_error = None;
        if !ctx.resource_gone {
            let write = if ctx.finalizer_removed {
                self.store.update(&ctx.assembly).await
            } else {
                self.store.update_status(&ctx.assembly).await
            };
            match write {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    tracing::debug!(resource = %ctx.key, "resource removed before status write");
                }
                Err(err) => {
                    tracing::error!(resource = %ctx.key, error = %err, "failed to persist resource");
                    store_error = Some(err);
                }
            }
        }
        if let Some(err) = store_error {
            ctx.errors.push(err);
        }

        let outcome = match ctx.errors.pop() {
            Some(err) => PassOutcome::failed(err, self.settings.error_requeue_interval),
            None => PassOutcome {
                directive: halt.map_or_else(RequeueDirective::done, |h| h.directive()),
                error: None,
            },
        };

        let label = if outcome.is_error() {
            PassOutcomeLabel::Error
        } else if outcome.directive.requeue {
            PassOutcomeLabel::Requeued
        } else {
            PassOutcomeLabel::Converged
        };
        self.metrics.record_pass(label);
        tracing::info!(
            resource = %ctx.key,
            outcome = ?label,
            requeue_after = ?outcome.directive.requeue_after,
            "reconciliation pass finished"
        );
        outcome
    }
}
