//! Prometheus export of reconciliation metrics.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use assembly_lm::LmApi;
use assembly_lm::memory::InMemoryLm;
use assembly_operator::crd::{Assembly, AssemblySpec, LifecycleState};
use assembly_operator::metrics::{OperatorMetrics, init_metrics, names, serve_metrics};
use assembly_operator::store::memory::InMemoryAssemblyStore;
use assembly_operator::{AssemblyReconciler, AssemblyStore, EngineSettings, ObjectKey};
use axum::http::StatusCode;
use axum::response::IntoResponse;

#[tokio::test]
async fn passes_and_intents_are_rendered() {
    let handle = init_metrics().expect("install recorder");
    init_metrics().expect("second call reuses the recorder");

    let store = Arc::new(InMemoryAssemblyStore::new());
    let mut resource = Assembly::new(
        "svc-a",
        AssemblySpec {
            descriptor_name: "assembly::svcA::1.0".to_string(),
            intended_state: LifecycleState::Active,
            properties: std::collections::BTreeMap::new(),
        },
    );
    resource.metadata.namespace = Some("default".to_string());
    store.insert(resource).expect("insert");

    let lm: Arc<dyn LmApi> = Arc::new(InMemoryLm::new());
    let store_api: Arc<dyn AssemblyStore> = store;
    let reconciler = AssemblyReconciler::with_metrics(
        lm,
        store_api,
        EngineSettings::default(),
        OperatorMetrics::new(),
    );
    reconciler.reconcile(&ObjectKey::new("default", "svc-a")).await;

    let rendered = handle.render();
    assert!(rendered.contains(names::PASSES_TOTAL));
    assert!(rendered.contains("outcome=\"requeued\""));
    assert!(rendered.contains(names::INTENTS_TOTAL));
    assert!(rendered.contains("intent=\"Create\""));
    assert!(rendered.contains(names::PASS_DURATION_SECONDS));

    let response = serve_metrics().await.into_response();
    assert_eq!(response.status(), StatusCode::OK);
}
