//! Entry point for reconciling one Assembly by key.

use std::sync::Arc;

use assembly_lm::LmApi;
use tracing::Instrument;

use crate::engine::{EngineSettings, PassOutcome, SyncEngine};
use crate::metrics::OperatorMetrics;
use crate::observability::reconcile_span;
use crate::store::{AssemblyStore, ObjectKey};

/// Loads an Assembly and runs a reconciliation pass over it.
///
/// Passes for the same key must not overlap. The caller's work queue is
/// expected to serialize them, as `kube::runtime::Controller` does.
#[derive(Clone)]
pub struct AssemblyReconciler {
    store: Arc<dyn AssemblyStore>,
    engine: SyncEngine,
}

impl AssemblyReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(lm: Arc<dyn LmApi>, store: Arc<dyn AssemblyStore>, settings: EngineSettings) -> Self {
        Self::with_metrics(lm, store, settings, OperatorMetrics::new())
    }

    /// Creates a reconciler whose passes report through `metrics`.
    #[must_use]
    pub fn with_metrics(
        lm: Arc<dyn LmApi>,
        store: Arc<dyn AssemblyStore>,
        settings: EngineSettings,
        metrics: OperatorMetrics,
    ) -> Self {
        Self {
            engine: SyncEngine::new(lm, Arc::clone(&store), settings, metrics),
            store,
        }
    }

    /// The pacing settings passes run with.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        self.engine.settings()
    }

    /// Reconciles the Assembly identified by `key`.
    ///
    /// A resource that no longer exists needs no work and yields
    /// [`PassOutcome::done`].
    pub async fn reconcile(&self, key: &ObjectKey) -> PassOutcome {
        let span = reconcile_span(&key.namespace, &key.name);
        async {
            match self.store.get(key).await {
                Ok(Some(assembly)) => self.engine.run(assembly).await,
                Ok(None) => {
                    tracing::debug!("assembly no longer exists");
                    PassOutcome::done()
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to load assembly");
                    PassOutcome::failed(err, self.settings().error_requeue_interval)
                }
            }
        }
        .instrument(span)
        .await
    }
}
