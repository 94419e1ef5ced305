//! Kind → API resource mapping shared by the clients of one registry.
//!
//! Kinds registered here resolve without a discovery round-trip. Anything
//! else falls back to the discovery handle of the client.

use std::collections::HashMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::Resource;
use kube::core::{GroupVersionKind, TypeMeta};
use kube::discovery::{ApiResource, Scope};

use crate::crd::{Cluster, IstioControlPlane};
use crate::error::{KuflexBackendError, Result};

#[derive(Clone, Debug)]
pub struct RegisteredKind {
    pub api_resource: ApiResource,
    pub scope: Scope,
}

#[derive(Clone, Debug, Default)]
pub struct Scheme {
    kinds: HashMap<GroupVersionKind, RegisteredKind>,
}

impl Scheme {
    /// Built-in kinds the core reads and writes.
    pub fn with_builtins() -> Result<Self> {
        let mut scheme = Self::default();
        scheme.register::<Namespace>(Scope::Cluster)?;
        scheme.register::<Deployment>(Scope::Namespaced)?;
        scheme.register::<Secret>(Scope::Namespaced)?;
        Ok(scheme)
    }

    /// Built-ins plus the mesh control plane and the cluster descriptor.
    pub fn kuflex() -> Result<Self> {
        let mut scheme = Self::with_builtins()?;
        scheme.register::<IstioControlPlane>(Scope::Namespaced)?;
        scheme.register::<Cluster>(Scope::Cluster)?;
        Ok(scheme)
    }

    /// Registering the same kind twice is fine as long as it maps to the
    /// same resource.
    pub fn register<K>(&mut self, scope: Scope) -> Result<()>
    where
        K: Resource<DynamicType = ()>,
    {
        let api_resource = ApiResource::erase::<K>(&());
        self.insert(api_resource, scope)
    }

    pub fn insert(&mut self, api_resource: ApiResource, scope: Scope) -> Result<()> {
        let gvk = GroupVersionKind::gvk(
            &api_resource.group,
            &api_resource.version,
            &api_resource.kind,
        );

        if let Some(existing) = self.kinds.get(&gvk) {
            if existing.api_resource != api_resource || existing.scope != scope {
                return Err(KuflexBackendError::Scheme {
                    kind: api_resource.api_version.clone() + "/" + &api_resource.kind,
                    reason: format!(
                        "already registered as {} ({:?})",
                        existing.api_resource.plural, existing.scope
                    ),
                });
            }
            return Ok(());
        }

        tracing::debug!(
            group = %gvk.group,
            version = %gvk.version,
            kind = %gvk.kind,
            "registered kind"
        );
        self.kinds.insert(gvk, RegisteredKind { api_resource, scope });
        Ok(())
    }

    pub fn resolve(&self, gvk: &GroupVersionKind) -> Option<&RegisteredKind> {
        self.kinds.get(gvk)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Splits `apiVersion` into group and version; core kinds have no group.
pub fn gvk_from_type_meta(types: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    GroupVersionKind::gvk(group, version, &types.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kuflex_scheme_knows_custom_kinds() {
        let scheme = Scheme::kuflex().unwrap();
        assert_eq!(scheme.len(), 5);

        let cluster = scheme
            .resolve(&GroupVersionKind::gvk(
                "clusterregistry.k8s.cisco.com",
                "v1alpha1",
                "Cluster",
            ))
            .unwrap();
        assert_eq!(cluster.api_resource.plural, "clusters");
        assert!(matches!(cluster.scope, Scope::Cluster));

        let icp = scheme
            .resolve(&GroupVersionKind::gvk(
                "servicemesh.cisco.com",
                "v1alpha1",
                "IstioControlPlane",
            ))
            .unwrap();
        assert!(matches!(icp.scope, Scope::Namespaced));
    }

    #[test]
    fn re_registering_same_kind_is_a_no_op() {
        let mut scheme = Scheme::kuflex().unwrap();
        scheme.register::<Secret>(Scope::Namespaced).unwrap();
        assert_eq!(scheme.len(), 5);
    }

    #[test]
    fn conflicting_registration_fails() {
        let mut scheme = Scheme::with_builtins().unwrap();
        let err = scheme.register::<Secret>(Scope::Cluster).unwrap_err();
        assert!(matches!(err, KuflexBackendError::Scheme { .. }));
    }

    #[test]
    fn core_api_version_has_empty_group() {
        let gvk = gvk_from_type_meta(&TypeMeta {
            api_version: "v1".to_owned(),
            kind: "Secret".to_owned(),
        });
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");

        let gvk = gvk_from_type_meta(&TypeMeta {
            api_version: "apps/v1".to_owned(),
            kind: "Deployment".to_owned(),
        });
        assert_eq!(gvk.group, "apps");
    }
}
