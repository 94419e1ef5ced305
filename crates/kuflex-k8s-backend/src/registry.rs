use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use kube::api::DynamicObject;

use crate::api::ClusterApi;
use crate::client::{ClusterClient, ClusterIdentity};
use crate::deployments::{self, ReadinessProbe};
use crate::error::{KuflexBackendError, Result};
use crate::mirror::{self, MirrorConfig};
use crate::namespaces;
use crate::scheme::Scheme;

/// The clients taking part in one operation, plus the one unscoped calls go
/// to.
///
/// Attach and detach always treat client 0 as the active side and client 1
/// as the passive side, regardless of which client is active.
pub struct ClientRegistry<C = ClusterClient> {
    clients: Vec<C>,
    active: usize,
}

impl ClientRegistry<ClusterClient> {
    /// Connects to every cluster in order. Any failure drops the clients
    /// built so far; there is no partial registry.
    pub async fn create_clients(identities: &[ClusterIdentity]) -> Result<Self> {
        let scheme = Arc::new(Scheme::kuflex()?);

        let mut clients = Vec::with_capacity(identities.len());
        for (index, identity) in identities.iter().enumerate() {
            clients.push(ClusterClient::connect(index, identity.clone(), scheme.clone()).await?);
        }

        tracing::info!(count = clients.len(), "kubernetes clients created");
        Ok(Self::from_clients(clients))
    }
}

impl<C: ClusterApi> ClientRegistry<C> {
    pub fn from_clients(clients: Vec<C>) -> Self {
        Self { clients, active: 0 }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Points unscoped calls at another client.
    ///
    /// # Panics
    ///
    /// If `index` is out of bounds; callers only ever pass indexes of
    /// clients they created.
    pub fn set_active(&mut self, index: usize) {
        assert!(
            index < self.clients.len(),
            "client index {index} out of bounds, registry holds {}",
            self.clients.len()
        );
        self.active = index;
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> Result<&C> {
        self.get(self.active)
    }

    pub fn get(&self, index: usize) -> Result<&C> {
        self.clients.get(index).ok_or(KuflexBackendError::MissingClient {
            index,
            len: self.clients.len(),
        })
    }

    /// Drops every client. Anything cached by them (discovery results in
    /// particular) goes with them.
    pub fn remove_all(&mut self) {
        tracing::debug!(count = self.clients.len(), "dropping kubernetes clients");
        self.clients.clear();
        self.active = 0;
    }

    fn peers(&self) -> Result<(&C, &C)> {
        match self.clients.as_slice() {
            [active, passive, ..] => Ok((active, passive)),
            _ => Err(KuflexBackendError::MissingPeer(self.clients.len())),
        }
    }

    pub async fn is_namespace_exists(&self, name: &str) -> Result<bool> {
        namespaces::is_namespace_exists(self.active()?, name).await
    }

    pub async fn create_namespace(&self, name: &str) -> Result<Namespace> {
        namespaces::create_namespace(self.active()?, name).await
    }

    pub async fn ensure_namespace(&self, name: &str) -> Result<bool> {
        namespaces::ensure_namespace(self.active()?, name).await
    }

    pub async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        namespaces::get_namespace(self.active()?, name).await
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        namespaces::delete_namespace(self.active()?, name).await
    }

    pub async fn verify(&self, name: &str, namespace: &str, timeout: Duration, interval: Duration) -> Result<()> {
        deployments::verify(self.active()?, name, namespace, timeout, interval).await
    }

    pub async fn verify_with_progress<F>(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
        interval: Duration,
        progress: F,
    ) -> Result<()>
    where
        F: FnMut(&ReadinessProbe),
    {
        deployments::verify_with_progress(self.active()?, name, namespace, timeout, interval, progress).await
    }

    pub async fn get_deployment_name(&self, release_name: &str, namespace: &str) -> Result<String> {
        deployments::get_deployment_name(self.active()?, release_name, namespace).await
    }

    pub async fn apply(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let client = self.active()?;
        let created = client.apply(object).await?;
        tracing::info!(cluster = %client.label(), object = %created.name_any(), "resource applied");

        Ok(created)
    }

    pub async fn remove(&self, object: &DynamicObject) -> Result<()> {
        let client = self.active()?;
        client.remove(object).await?;
        tracing::info!(cluster = %client.label(), object = %object.name_any(), "resource removed");

        Ok(())
    }

    pub async fn attach(&self, active_ns: &str, passive_ns: &str, config: &MirrorConfig) -> Result<()> {
        let (active, passive) = self.peers()?;
        mirror::attach(active, passive, active_ns, passive_ns, config).await
    }

    pub async fn detach(&self, active_ns: &str, passive_ns: &str, config: &MirrorConfig) -> Result<()> {
        let (active, passive) = self.peers()?;
        mirror::detach(active, passive, active_ns, passive_ns, config).await
    }
}
