//! In-memory [`ClusterApi`] for tests.
//!
//! Behaves like an API server where it matters to the callers: 404 for
//! missing objects, 409 for duplicates, resource versions assigned on create
//! and rejected when set by the client.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{DynamicObject, ObjectMeta};
use kube::core::ErrorResponse;
use kube::ResourceExt;

use crate::api::ClusterApi;
use crate::crd::{AuthInfo, Cluster, ClusterSpec, NamespacedName};
use crate::error::{KuflexBackendError, ObjectKey, Result};

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<ObjectKey, Secret>,
    clusters: BTreeMap<String, Cluster>,
    deployments: BTreeMap<ObjectKey, VecDeque<Deployment>>,
    objects: BTreeMap<(String, ObjectKey), DynamicObject>,
    failures: Vec<(&'static str, String, u16)>,
    calls: BTreeMap<String, usize>,
    resource_version: u64,
}

#[derive(Clone)]
pub struct FakeCluster {
    label: String,
    state: Arc<Mutex<State>>,
}

fn api_error(code: u16, message: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: message.to_owned(),
        reason: "Fake".to_owned(),
        code,
    })
}

fn key_of<K: ResourceExt>(object: &K) -> ObjectKey {
    ObjectKey::new(object.namespace().unwrap_or_default(), object.name_any())
}

pub fn secret(key: &ObjectKey, token: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([("token".to_owned(), token.to_owned())])),
        ..Default::default()
    }
}

pub fn descriptor(key: &ObjectKey, cluster_id: &str) -> Cluster {
    Cluster::new(
        &key.name,
        ClusterSpec {
            cluster_id: cluster_id.to_owned(),
            auth_info: Some(AuthInfo {
                secret_ref: Some(NamespacedName {
                    name: key.name.clone(),
                    namespace: key.namespace.clone(),
                }),
            }),
            kubernetes_api_endpoints: Vec::new(),
        },
    )
}

pub fn deployment(key: &ObjectKey, replicas: i32, ready: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            ..Default::default()
        },
        status: Some(DeploymentStatus {
            replicas: Some(replicas),
            ready_replicas: Some(ready),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl FakeCluster {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Every later `operation` on `kind` fails with HTTP `code`.
    pub fn fail(&self, operation: &'static str, kind: &str, code: u16) {
        self.state().failures.push((operation, kind.to_owned(), code));
    }

    pub fn calls(&self, operation: &str, kind: &str) -> usize {
        self.state()
            .calls
            .get(&format!("{operation} {kind}"))
            .copied()
            .unwrap_or_default()
    }

    fn record(&self, operation: &'static str, kind: &str, key: &ObjectKey) -> Result<()> {
        let mut state = self.state();
        *state.calls.entry(format!("{operation} {kind}")).or_default() += 1;

        let failure = state
            .failures
            .iter()
            .find(|(op, k, _)| *op == operation && k == kind)
            .map(|(_, _, code)| *code);
        match failure {
            Some(code) => Err(self.error(operation, kind, key, code, "injected failure")),
            None => Ok(()),
        }
    }

    fn error(&self, operation: &'static str, kind: &str, key: &ObjectKey, code: u16, message: &str) -> KuflexBackendError {
        KuflexBackendError::from_kube(operation, kind, key, &self.label, api_error(code, message))
    }

    fn stamp(state: &mut State, metadata: &mut ObjectMeta) {
        state.resource_version += 1;
        metadata.resource_version = Some(state.resource_version.to_string());
    }

    /// Seeds the secret and descriptor a cluster-registry controller would create.
    pub fn seed_link_pair(&self, key: &ObjectKey, cluster_id: &str) {
        self.insert_secret(secret(key, cluster_id));
        self.insert_cluster(descriptor(key, cluster_id));
    }

    pub fn insert_secret(&self, mut secret: Secret) {
        let mut state = self.state();
        Self::stamp(&mut state, &mut secret.metadata);
        state.secrets.insert(key_of(&secret), secret);
    }

    pub fn insert_cluster(&self, mut cluster: Cluster) {
        let mut state = self.state();
        Self::stamp(&mut state, &mut cluster.metadata);
        state.clusters.insert(cluster.name_any(), cluster);
    }

    /// Each get pops the next status; the last one sticks.
    pub fn script_deployment(&self, key: &ObjectKey, statuses: &[(i32, i32)]) {
        let script = statuses
            .iter()
            .map(|(replicas, ready)| deployment(key, *replicas, *ready))
            .collect();
        self.state().deployments.insert(key.clone(), script);
    }

    pub fn insert_deployment(&self, deployment: Deployment) {
        let key = key_of(&deployment);
        self.state()
            .deployments
            .insert(key, VecDeque::from([deployment]));
    }

    pub fn secret_keys(&self) -> Vec<ObjectKey> {
        self.state().secrets.keys().cloned().collect()
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.state().namespaces.keys().cloned().collect()
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.state().clusters.keys().cloned().collect()
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        self.state().clusters.values().cloned().collect()
    }

    pub fn objects(&self) -> Vec<DynamicObject> {
        self.state().objects.values().cloned().collect()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    fn label(&self) -> &str {
        &self.label
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret> {
        self.record("get", "Secret", key)?;
        self.state()
            .secrets
            .get(key)
            .cloned()
            .ok_or_else(|| self.error("get", "Secret", key, 404, "not found"))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        let key = key_of(secret);
        self.record("create", "Secret", &key)?;
        if secret.metadata.resource_version.is_some() {
            return Err(self.error("create", "Secret", &key, 400, "resourceVersion should not be set on objects to be created"));
        }

        let mut state = self.state();
        if state.secrets.contains_key(&key) {
            return Err(self.error("create", "Secret", &key, 409, "already exists"));
        }
        let mut created = secret.clone();
        Self::stamp(&mut state, &mut created.metadata);
        state.secrets.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_secret(&self, key: &ObjectKey) -> Result<()> {
        self.record("delete", "Secret", key)?;
        self.state()
            .secrets
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| self.error("delete", "Secret", key, 404, "not found"))
    }

    async fn get_cluster(&self, key: &ObjectKey) -> Result<Cluster> {
        self.record("get", "Cluster", key)?;
        self.state()
            .clusters
            .get(&key.name)
            .cloned()
            .ok_or_else(|| self.error("get", "Cluster", key, 404, "not found"))
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        let key = ObjectKey::cluster_scoped(cluster.name_any());
        self.record("create", "Cluster", &key)?;
        if cluster.metadata.resource_version.is_some() {
            return Err(self.error("create", "Cluster", &key, 400, "resourceVersion should not be set on objects to be created"));
        }

        let mut state = self.state();
        if state.clusters.contains_key(&key.name) {
            return Err(self.error("create", "Cluster", &key, 409, "already exists"));
        }
        let mut created = cluster.clone();
        Self::stamp(&mut state, &mut created.metadata);
        state.clusters.insert(key.name, created.clone());
        Ok(created)
    }

    async fn delete_cluster(&self, key: &ObjectKey) -> Result<()> {
        self.record("delete", "Cluster", key)?;
        self.state()
            .clusters
            .remove(&key.name)
            .map(|_| ())
            .ok_or_else(|| self.error("delete", "Cluster", key, 404, "not found"))
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment> {
        self.record("get", "Deployment", key)?;
        let mut state = self.state();
        let script = state
            .deployments
            .get_mut(key)
            .ok_or_else(|| self.error("get", "Deployment", key, 404, "not found"))?;
        if script.len() > 1 {
            Ok(script.pop_front().unwrap_or_default())
        } else {
            Ok(script.front().cloned().unwrap_or_default())
        }
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        self.record("list", "Deployment", &ObjectKey::new(namespace, "*"))?;
        Ok(self
            .state()
            .deployments
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .filter_map(|(_, script)| script.front().cloned())
            .collect())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        self.record("list", "Namespace", &ObjectKey::cluster_scoped("*"))?;
        Ok(self.state().namespaces.values().cloned().collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let key = ObjectKey::cluster_scoped(name);
        self.record("get", "Namespace", &key)?;
        self.state()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| self.error("get", "Namespace", &key, 404, "not found"))
    }

    async fn create_namespace(&self, name: &str) -> Result<Namespace> {
        let key = ObjectKey::cluster_scoped(name);
        self.record("create", "Namespace", &key)?;
        let mut state = self.state();
        if state.namespaces.contains_key(name) {
            return Err(self.error("create", "Namespace", &key, 409, "already exists"));
        }
        let mut namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        Self::stamp(&mut state, &mut namespace.metadata);
        state.namespaces.insert(name.to_owned(), namespace.clone());
        Ok(namespace)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let key = ObjectKey::cluster_scoped(name);
        self.record("delete", "Namespace", &key)?;
        self.state()
            .namespaces
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| self.error("delete", "Namespace", &key, 404, "not found"))
    }

    async fn apply(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let kind = object
            .types
            .as_ref()
            .map(|types| types.kind.clone())
            .ok_or_else(|| KuflexBackendError::InvalidObject("missing kind".to_owned()))?;
        let key = key_of(object);
        self.record("create", &kind, &key)?;

        let mut state = self.state();
        if state.objects.contains_key(&(kind.clone(), key.clone())) {
            return Err(self.error("create", &kind, &key, 409, "already exists"));
        }
        let mut created = object.clone();
        Self::stamp(&mut state, &mut created.metadata);
        state.objects.insert((kind, key), created.clone());
        Ok(created)
    }

    async fn remove(&self, object: &DynamicObject) -> Result<()> {
        let kind = object
            .types
            .as_ref()
            .map(|types| types.kind.clone())
            .ok_or_else(|| KuflexBackendError::InvalidObject("missing kind".to_owned()))?;
        let key = key_of(object);
        self.record("delete", &kind, &key)?;
        self.state()
            .objects
            .remove(&(kind.clone(), key.clone()))
            .map(|_| ())
            .ok_or_else(|| self.error("delete", &kind, &key, 404, "not found"))
    }
}
