//! Custom resource kinds the clients must understand besides the built-ins.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Remote cluster descriptor owned by the cluster-registry controller.
///
/// The controller creates one for its own cluster, named after the cluster,
/// and points `authInfo.secretRef` at the secret holding the credentials.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "clusterregistry.k8s.cisco.com",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_info: Option<AuthInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_api_endpoints: Vec<KubernetesApiEndpoint>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<NamespacedName>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct NamespacedName {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesApiEndpoint {
    pub server_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_network: Option<String>,
}

impl Cluster {
    /// Points the credential reference at `namespace`, leaving the name as is.
    pub fn rehome_secret_ref(&mut self, namespace: &str) {
        if let Some(secret_ref) = self
            .spec
            .auth_info
            .as_mut()
            .and_then(|auth| auth.secret_ref.as_mut())
        {
            secret_ref.namespace = namespace.to_owned();
        }
    }
}

/// Mesh control plane managed by the istio operator.
///
/// Only the fields kuflex looks at are typed, the rest is carried through.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "servicemesh.cisco.com",
    version = "v1alpha1",
    kind = "IstioControlPlane",
    plural = "istiocontrolplanes",
    shortname = "icp",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IstioControlPlaneSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
