use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;

use crate::api::ClusterApi;
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct NamespaceData {
    pub names: Vec<String>,
}

impl NamespaceData {
    pub fn new() -> Self {
        NamespaceData { names: Vec::new() }
    }

    pub async fn update<C: ClusterApi + ?Sized>(&mut self, api: &C) -> Result<()> {
        self.names = api
            .list_namespaces()
            .await?
            .iter()
            .map(|ns| ns.name_any())
            .collect();

        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|ns| ns == name)
    }
}

pub async fn is_namespace_exists<C: ClusterApi + ?Sized>(api: &C, name: &str) -> Result<bool> {
    let mut namespaces = NamespaceData::new();
    namespaces.update(api).await?;

    Ok(namespaces.contains(name))
}

/// Fails with `AlreadyExists` when the API server reports a conflict.
pub async fn create_namespace<C: ClusterApi + ?Sized>(api: &C, name: &str) -> Result<Namespace> {
    let namespace = api.create_namespace(name).await?;
    tracing::info!(cluster = %api.label(), namespace = %name, "namespace created");

    Ok(namespace)
}

pub async fn get_namespace<C: ClusterApi + ?Sized>(api: &C, name: &str) -> Result<Namespace> {
    api.get_namespace(name).await
}

pub async fn delete_namespace<C: ClusterApi + ?Sized>(api: &C, name: &str) -> Result<()> {
    api.delete_namespace(name).await?;
    tracing::info!(cluster = %api.label(), namespace = %name, "namespace deleted");

    Ok(())
}

/// Existence check followed by create; returns whether it had to create.
pub async fn ensure_namespace<C: ClusterApi + ?Sized>(api: &C, name: &str) -> Result<bool> {
    if is_namespace_exists(api, name).await? {
        tracing::debug!(cluster = %api.label(), namespace = %name, "namespace already exists");
        return Ok(false);
    }

    match create_namespace(api, name).await {
        Ok(_) => Ok(true),
        // Lost a race with someone else creating it.
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}
