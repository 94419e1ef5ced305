use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, ObjectMeta, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::Scope;
use kube::{Client, Config, Discovery, ResourceExt};
use tokio::sync::OnceCell;

use crate::api::ClusterApi;
use crate::crd::Cluster;
use crate::error::{KuflexBackendError, ObjectKey, Result};
use crate::scheme::{RegisteredKind, Scheme, gvk_from_type_meta};

/// Where a cluster's credentials come from: a kubeconfig file and an
/// optional context inside it. No context means the file's current context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub kubeconfig: PathBuf,
    pub context: Option<String>,
}

impl ClusterIdentity {
    pub fn new(kubeconfig: impl Into<PathBuf>, context: Option<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            context: context.filter(|ctx| !ctx.is_empty()),
        }
    }

    fn context_name(&self) -> &str {
        self.context.as_deref().unwrap_or("current-context")
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.context_name(), self.kubeconfig.display())
    }
}

/// One authenticated API endpoint.
///
/// Built once by [`ClientRegistry::create_clients`](crate::ClientRegistry::create_clients)
/// and never reconfigured. The discovery cache is filled on first use and
/// never refreshed, so kinds installed afterwards need a fresh client.
pub struct ClusterClient {
    identity: ClusterIdentity,
    label: String,
    client: Client,
    endpoint: String,
    scheme: Arc<Scheme>,
    discovery: OnceCell<Discovery>,
}

impl ClusterClient {
    pub async fn connect(index: usize, identity: ClusterIdentity, scheme: Arc<Scheme>) -> Result<Self> {
        let config_error = |source| KuflexBackendError::Config {
            path: identity.kubeconfig.clone(),
            context: identity.context_name().to_owned(),
            source,
        };

        let kubeconfig = Kubeconfig::read_from(&identity.kubeconfig).map_err(config_error)?;
        let options = KubeConfigOptions {
            context: identity.context.clone(),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(config_error)?;

        let label = format!("cluster[{index}] ({identity})");
        let endpoint = config.cluster_url.to_string();
        let client = Client::try_from(config).map_err(|source| KuflexBackendError::KubeConnection {
            cluster: label.clone(),
            source,
        })?;

        tracing::debug!(cluster = %label, %endpoint, "kubernetes client created");

        Ok(Self {
            identity,
            label,
            client,
            endpoint,
            scheme,
            discovery: OnceCell::new(),
        })
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn api_server_endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn discovery(&self) -> Result<&Discovery> {
        self.discovery
            .get_or_try_init(|| async {
                tracing::debug!(cluster = %self.label, "running api discovery");
                Discovery::new(self.client.clone())
                    .run()
                    .await
                    .map_err(|source| KuflexBackendError::Discovery {
                        cluster: self.label.clone(),
                        source,
                    })
            })
            .await
    }

    async fn resolve(&self, object: &DynamicObject) -> Result<RegisteredKind> {
        let types = object.types.as_ref().ok_or_else(|| {
            KuflexBackendError::InvalidObject(format!(
                "{} has no apiVersion/kind",
                object.name_any()
            ))
        })?;
        let gvk = gvk_from_type_meta(types);

        if let Some(kind) = self.scheme.resolve(&gvk) {
            return Ok(kind.clone());
        }

        let discovery = self.discovery().await?;
        match discovery.resolve_gvk(&gvk) {
            Some((api_resource, capabilities)) => Ok(RegisteredKind {
                api_resource,
                scope: capabilities.scope,
            }),
            None => Err(KuflexBackendError::UnknownKind {
                kind: format!("{}/{}", types.api_version, types.kind),
                cluster: self.label.clone(),
            }),
        }
    }

    fn dynamic_api(&self, kind: &RegisteredKind, namespace: Option<&str>) -> Api<DynamicObject> {
        match kind.scope {
            Scope::Namespaced => {
                let namespace = namespace.unwrap_or_else(|| self.client.default_namespace());
                Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &kind.api_resource),
        }
    }

    fn secrets(&self, namespace: Option<&str>) -> Api<Secret> {
        match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    fn error(&self, operation: &'static str, kind: &str, key: &ObjectKey, source: kube::Error) -> KuflexBackendError {
        KuflexBackendError::from_kube(operation, kind, key, &self.label, source)
    }
}

fn key_of<K: ResourceExt>(object: &K) -> ObjectKey {
    ObjectKey::new(object.namespace().unwrap_or_default(), object.name_any())
}

#[async_trait]
impl ClusterApi for ClusterClient {
    fn label(&self) -> &str {
        &self.label
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret> {
        self.secrets(Some(&key.namespace))
            .get(&key.name)
            .await
            .map_err(|e| self.error("get", "Secret", key, e))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        self.secrets(secret.metadata.namespace.as_deref())
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| self.error("create", "Secret", &key_of(secret), e))
    }

    async fn delete_secret(&self, key: &ObjectKey) -> Result<()> {
        self.secrets(Some(&key.namespace))
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| self.error("delete", "Secret", key, e))
    }

    async fn get_cluster(&self, key: &ObjectKey) -> Result<Cluster> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        api.get(&key.name)
            .await
            .map_err(|e| self.error("get", "Cluster", key, e))
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        api.create(&PostParams::default(), cluster)
            .await
            .map_err(|e| self.error("create", "Cluster", &key_of(cluster), e))
    }

    async fn delete_cluster(&self, key: &ObjectKey) -> Result<()> {
        let api: Api<Cluster> = Api::all(self.client.clone());
        api.delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| self.error("delete", "Cluster", key, e))
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name)
            .await
            .map_err(|e| self.error("get", "Deployment", key, e))
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| self.error("list", "Deployment", &ObjectKey::new(namespace, "*"), e))
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| self.error("list", "Namespace", &ObjectKey::cluster_scoped("*"), e))
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| self.error("get", "Namespace", &ObjectKey::cluster_scoped(name), e))
    }

    async fn create_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &namespace)
            .await
            .map_err(|e| self.error("create", "Namespace", &ObjectKey::cluster_scoped(name), e))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| self.error("delete", "Namespace", &ObjectKey::cluster_scoped(name), e))
    }

    async fn apply(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let kind = self.resolve(object).await?;
        let key = key_of(object);
        self.dynamic_api(&kind, object.metadata.namespace.as_deref())
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| self.error("create", &kind.api_resource.kind, &key, e))
    }

    async fn remove(&self, object: &DynamicObject) -> Result<()> {
        let kind = self.resolve(object).await?;
        let name = object.metadata.name.as_deref().ok_or_else(|| {
            KuflexBackendError::InvalidObject(format!("{} object has no name", kind.api_resource.kind))
        })?;
        let key = key_of(object);
        self.dynamic_api(&kind, object.metadata.namespace.as_deref())
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| self.error("delete", &kind.api_resource.kind, &key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: active
clusters:
  - name: active
    cluster:
      server: https://127.0.0.1:6443
      insecure-skip-tls-verify: true
  - name: passive
    cluster:
      server: https://127.0.0.2:6443
      insecure-skip-tls-verify: true
users:
  - name: admin
    user:
      token: not-a-real-token
contexts:
  - name: active
    context:
      cluster: active
      user: admin
  - name: passive
    context:
      cluster: passive
      user: admin
"#;

    fn kubeconfig_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KUBECONFIG.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_context_means_current_context() {
        let identity = ClusterIdentity::new("/tmp/config", Some(String::new()));
        assert_eq!(identity.context, None);
        assert_eq!(identity.to_string(), "current-context@/tmp/config");
    }

    #[tokio::test]
    async fn connect_resolves_the_requested_context() {
        let file = kubeconfig_file();
        let scheme = Arc::new(Scheme::kuflex().unwrap());

        let identity = ClusterIdentity::new(file.path(), Some("passive".to_owned()));
        let client = ClusterClient::connect(1, identity, scheme.clone()).await.unwrap();
        assert!(client.api_server_endpoint().starts_with("https://127.0.0.2:6443"));
        assert!(client.label().starts_with("cluster[1] (passive@"));

        let identity = ClusterIdentity::new(file.path(), None);
        let client = ClusterClient::connect(0, identity, scheme).await.unwrap();
        assert!(client.api_server_endpoint().starts_with("https://127.0.0.1:6443"));
    }

    #[tokio::test]
    async fn unknown_context_is_a_config_error() {
        let file = kubeconfig_file();
        let identity = ClusterIdentity::new(file.path(), Some("nope".to_owned()));

        let err = ClusterClient::connect(0, identity, Arc::new(Scheme::kuflex().unwrap()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KuflexBackendError::Config { .. }));
    }

    #[tokio::test]
    async fn missing_kubeconfig_is_a_config_error() {
        let identity = ClusterIdentity::new("/definitely/not/here/config", None);

        let err = ClusterClient::connect(0, identity, Arc::new(Scheme::kuflex().unwrap()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KuflexBackendError::Config { .. }));
    }
}
