//! Kubernetes API server store.

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};

use super::{AssemblyStore, ObjectKey};
use crate::crd::Assembly;
use crate::error::{Error, Result};

/// [`AssemblyStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeAssemblyStore {
    client: Client,
}

impl KubeAssemblyStore {
    /// Creates a store using the given client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Assembly> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error(key: &ObjectKey, action: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::ResourceNotFound {
            key: key.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            key: key.to_string(),
            message: ae.message,
        },
        other => Error::store_with_source(format!("failed to {action} {key}"), other),
    }
}

#[async_trait]
impl AssemblyStore for KubeAssemblyStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Assembly>> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(key, "get", e))
    }

    async fn update(&self, assembly: &Assembly) -> Result<Assembly> {
        let key = ObjectKey::for_resource(assembly);
        tracing::debug!(resource = %key, finalizers = ?assembly.finalizers(), "updating resource");
        self.api(&key.namespace)
            .replace(&key.name, &PostParams::default(), assembly)
            .await
            .map_err(|e| map_kube_error(&key, "update", e))
    }

    async fn update_status(&self, assembly: &Assembly) -> Result<Assembly> {
        let key = ObjectKey::for_resource(assembly);
        let body = serde_json::to_vec(assembly)
            .map_err(|e| Error::store_with_source(format!("failed to encode {key}"), e))?;
        tracing::debug!(resource = %key, "updating status");
        self.api(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_kube_error(&key, "update status of", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn api_errors_map_to_store_errors() {
        let key = ObjectKey::new("default", "svc-a");
        assert!(map_kube_error(&key, "get", api_error(404)).is_not_found());
        assert!(matches!(
            map_kube_error(&key, "update", api_error(409)),
            Error::Conflict { .. }
        ));
        let err = map_kube_error(&key, "update", api_error(500));
        assert!(matches!(err, Error::Store { .. }));
        assert!(err.to_string().contains("default/svc-a"));
    }
}
