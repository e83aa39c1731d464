//! # assembly-operator
//!
//! Kubernetes operator that keeps `Assembly` resources in step with the
//! lifecycle manager (LM).
//!
//! Each reconciliation pass observes the remote Assembly, compares it with
//! the resource spec, submits at most one corrective intent to LM and
//! records what it saw in the resource status. Passes requeue themselves
//! while a process is running or after an error, and stop once the remote
//! Assembly matches the spec.
//!
//! ## Modules
//!
//! - [`crd`]: the `Assembly` custom resource and its vocabularies
//! - [`engine`]: the ordered reconciliation steps and sync bookkeeping
//! - [`reconciler`]: loads a resource by key and runs a pass
//! - [`store`]: resource persistence (Kubernetes API or in-memory)
//! - [`config`], [`observability`], [`metrics`]: operator plumbing

#![warn(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod crd;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod reconciler;
pub mod store;

pub use config::OperatorConfig;
pub use crd::{Assembly, AssemblySpec, AssemblyStatus, FINALIZER};
pub use engine::{EngineSettings, PassOutcome, RequeueDirective, SyncEngine};
pub use error::{Error, Result};
pub use reconciler::AssemblyReconciler;
pub use store::{AssemblyStore, ObjectKey};
