//! Persistence of Assembly resources.
//!
//! The engine reads and writes resources only through [`AssemblyStore`].
//! [`kube::KubeAssemblyStore`] talks to the Kubernetes API server;
//! [`memory::InMemoryAssemblyStore`] emulates it for tests.

pub mod kube;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use ::kube::ResourceExt;

use crate::crd::Assembly;
use crate::error::Result;

/// Identifies a namespaced Assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the resource.
    pub namespace: String,
    /// Name of the resource.
    pub name: String,
}

impl ObjectKey {
    /// Creates a key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the key of a resource. Resources without a namespace map to
    /// `default`.
    #[must_use]
    pub fn for_resource(assembly: &Assembly) -> Self {
        Self::new(
            assembly.namespace().unwrap_or_else(|| "default".to_string()),
            assembly.name_any(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reads and writes Assembly resources.
///
/// Writes return the object as persisted so callers can continue with the
/// new resource version.
#[async_trait]
pub trait AssemblyStore: Send + Sync {
    /// Fetches a resource. Absence is `Ok(None)`.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Assembly>>;

    /// Replaces metadata and spec. Status changes in `assembly` are ignored.
    ///
    /// Returns [`crate::Error::ResourceNotFound`] if the resource is gone.
    async fn update(&self, assembly: &Assembly) -> Result<Assembly>;

    /// Replaces the status subresource. Other changes in `assembly` are ignored.
    ///
    /// Returns [`crate::Error::ResourceNotFound`] if the resource is gone.
    async fn update_status(&self, assembly: &Assembly) -> Result<Assembly>;
}
