use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::DynamicObject;

use crate::crd::Cluster;
use crate::error::{ObjectKey, Result};

/// Everything the verifier, the mirror and the namespace helpers need from
/// one cluster.
///
/// Implementations classify API failures through
/// [`KuflexBackendError::from_kube`](crate::error::KuflexBackendError::from_kube),
/// so callers can tell "absent" from "could not check".
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Short human readable name used in logs and errors.
    fn label(&self) -> &str;

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret>;
    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;
    async fn delete_secret(&self, key: &ObjectKey) -> Result<()>;

    async fn get_cluster(&self, key: &ObjectKey) -> Result<Cluster>;
    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster>;
    async fn delete_cluster(&self, key: &ObjectKey) -> Result<()>;

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment>;
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;
    async fn create_namespace(&self, name: &str) -> Result<Namespace>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Creates an arbitrary object, resolving its kind first.
    async fn apply(&self, object: &DynamicObject) -> Result<DynamicObject>;
    /// Deletes an arbitrary object by kind and name.
    async fn remove(&self, object: &DynamicObject) -> Result<()>;
}
