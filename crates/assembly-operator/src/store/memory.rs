//! In-memory store for testing.
//!
//! Emulates the parts of the API server the engine depends on:
//!
//! - every write bumps `metadata.resourceVersion`, and a write carrying a
//!   stale version is rejected as a conflict
//! - `update` ignores status and `update_status` ignores everything else
//! - a resource marked for deletion disappears once its last finalizer is
//!   removed

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use super::{AssemblyStore, ObjectKey};
use crate::crd::Assembly;
use crate::error::{Error, Result};

/// Store operations, used to script failures and inspect the write log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// [`AssemblyStore::get`]
    Get,
    /// [`AssemblyStore::update`]
    Update,
    /// [`AssemblyStore::update_status`]
    UpdateStatus,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Assembly>,
    writes: Vec<(StoreOperation, ObjectKey)>,
    failures: HashMap<StoreOperation, VecDeque<String>>,
    version: u64,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn check_failure(&mut self, op: StoreOperation) -> Result<()> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(message) => Err(Error::store(message)),
            None => Ok(()),
        }
    }

    fn current(&self, key: &ObjectKey, incoming: &Assembly) -> Result<&Assembly> {
        let stored = self.objects.get(key).ok_or_else(|| Error::ResourceNotFound {
            key: key.to_string(),
        })?;
        match (
            incoming.resource_version(),
            stored.resource_version(),
        ) {
            (Some(incoming), Some(stored)) if incoming != stored => Err(Error::Conflict {
                key: key.to_string(),
                message: format!(
                    "the object has been modified (version {incoming}, current {stored})"
                ),
            }),
            _ => Ok(stored),
        }
    }
}

/// Converts a lock poison error to a store error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::store("lock poisoned")
}

/// In-memory [`AssemblyStore`].
#[derive(Debug, Default)]
pub struct InMemoryAssemblyStore {
    inner: RwLock<Inner>,
}

impl InMemoryAssemblyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a resource as a user would, and returns it as stored.
    ///
    /// The status of an existing resource is kept.
    pub fn insert(&self, mut assembly: Assembly) -> Result<Assembly> {
        let key = ObjectKey::for_resource(&assembly);
        let mut inner = self.inner.write().map_err(poison_err)?;
        if assembly.metadata.namespace.is_none() {
            assembly.metadata.namespace = Some(key.namespace.clone());
        }
        if let Some(existing) = inner.objects.get(&key) {
            assembly.status.clone_from(&existing.status);
            assembly.metadata.deletion_timestamp.clone_from(&existing.metadata.deletion_timestamp);
        }
        assembly.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(key, assembly.clone());
        Ok(assembly)
    }

    /// Replaces the spec of a stored resource.
    pub fn set_spec(&self, key: &ObjectKey, spec: crate::crd::AssemblySpec) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let version = inner.next_version();
        let stored = inner
            .objects
            .get_mut(key)
            .ok_or_else(|| Error::ResourceNotFound {
                key: key.to_string(),
            })?;
        stored.spec = spec;
        stored.metadata.resource_version = Some(version);
        Ok(())
    }

    /// Marks a resource for deletion. Resources without finalizers are
    /// removed immediately.
    pub fn mark_deleted(&self, key: &ObjectKey) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let version = inner.next_version();
        let Some(stored) = inner.objects.get_mut(key) else {
            return Ok(());
        };
        if stored.finalizers().is_empty() {
            inner.objects.remove(key);
            return Ok(());
        }
        if stored.metadata.deletion_timestamp.is_none() {
            stored.metadata.deletion_timestamp = Some(Time(Utc::now()));
            stored.metadata.resource_version = Some(version);
        }
        Ok(())
    }

    /// Returns the stored copy of a resource.
    #[must_use]
    pub fn stored(&self, key: &ObjectKey) -> Option<Assembly> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.objects.get(key).cloned())
    }

    /// Returns every successful write in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(StoreOperation, ObjectKey)> {
        self.inner
            .read()
            .map(|inner| inner.writes.clone())
            .unwrap_or_default()
    }

    /// Makes the next call of `op` fail with a store error.
    pub fn fail_next(&self, op: StoreOperation, message: &str) -> Result<()> {
        self.inner
            .write()
            .map_err(poison_err)?
            .failures
            .entry(op)
            .or_default()
            .push_back(message.to_string());
        Ok(())
    }
}

#[async_trait]
impl AssemblyStore for InMemoryAssemblyStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Assembly>> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.check_failure(StoreOperation::Get)?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn update(&self, assembly: &Assembly) -> Result<Assembly> {
        let key = ObjectKey::for_resource(assembly);
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.check_failure(StoreOperation::Update)?;
        let stored = inner.current(&key, assembly)?;

        let mut next = assembly.clone();
        next.status.clone_from(&stored.status);
        next.metadata.deletion_timestamp.clone_from(&stored.metadata.deletion_timestamp);
        next.metadata.namespace = Some(key.namespace.clone());
        next.metadata.resource_version = Some(inner.next_version());

        inner.writes.push((StoreOperation::Update, key.clone()));
        if next.metadata.deletion_timestamp.is_some() && next.finalizers().is_empty() {
            inner.objects.remove(&key);
        } else {
            inner.objects.insert(key, next.clone());
        }
        Ok(next)
    }

    async fn update_status(&self, assembly: &Assembly) -> Result<Assembly> {
        let key = ObjectKey::for_resource(assembly);
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.check_failure(StoreOperation::UpdateStatus)?;
        let mut next = inner.current(&key, assembly)?.clone();

        next.status.clone_from(&assembly.status);
        next.metadata.resource_version = Some(inner.next_version());

        inner.writes.push((StoreOperation::UpdateStatus, key.clone()));
        inner.objects.insert(key, next.clone());
        Ok(next)
    }
}
