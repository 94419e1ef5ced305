use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use kube::config::KubeconfigError;
use thiserror::Error;

pub type Result<T, E = KuflexBackendError> = std::result::Result<T, E>;

/// Namespace and name of an object on one cluster.
///
/// Cluster-scoped kinds ignore the namespace half.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self::new("", name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Error, Debug)]
pub enum KuflexBackendError {
    #[error("unable to load kubeconfig {path} (context: {context}): {source}")]
    Config {
        path: PathBuf,
        context: String,
        #[source]
        source: KubeconfigError,
    },
    #[error(
        "unable to initialize kubernetes client for {cluster} - please verify you can access the cluster"
    )]
    KubeConnection {
        cluster: String,
        #[source]
        source: kube::Error,
    },
    #[error("unable to register kind {kind}: {reason}")]
    Scheme { kind: String, reason: String },
    #[error("{kind} {key} not found on {cluster}")]
    NotFound {
        kind: String,
        key: ObjectKey,
        cluster: String,
    },
    #[error("{kind} {key} already exists on {cluster}")]
    AlreadyExists {
        kind: String,
        key: ObjectKey,
        cluster: String,
    },
    #[error(
        "deployment {namespace}/{name} is not ready on {cluster}: {ready}/{desired} replicas ready after {elapsed:?}"
    )]
    NotReady {
        namespace: String,
        name: String,
        cluster: String,
        ready: i32,
        desired: i32,
        elapsed: Duration,
    },
    #[error(
        "link pair {key} not found on {cluster} after {attempts} attempts (secret: {secret}; cluster: {descriptor})"
    )]
    LinkPairTimeout {
        key: ObjectKey,
        cluster: String,
        attempts: u32,
        secret: String,
        descriptor: String,
    },
    #[error("{operation} {kind} {key} on {cluster} failed: {source}")]
    Api {
        operation: &'static str,
        kind: String,
        key: ObjectKey,
        cluster: String,
        #[source]
        source: kube::Error,
    },
    #[error("api discovery failed on {cluster}: {source}")]
    Discovery {
        cluster: String,
        #[source]
        source: kube::Error,
    },
    #[error("kind {kind} is not served by {cluster}")]
    UnknownKind { kind: String, cluster: String },
    #[error("invalid object: {0}")]
    InvalidObject(String),
    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
    #[error("no client at index {index}, registry holds {len}")]
    MissingClient { index: usize, len: usize },
    #[error("operation needs an active and a passive client, registry holds {0}")]
    MissingPeer(usize),
}

impl KuflexBackendError {
    /// Sorts a kube error into the taxonomy: 404 and 409 get their own
    /// variants, everything else stays an API error.
    pub fn from_kube(
        operation: &'static str,
        kind: &str,
        key: &ObjectKey,
        cluster: &str,
        source: kube::Error,
    ) -> Self {
        match &source {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound {
                kind: kind.to_owned(),
                key: key.clone(),
                cluster: cluster.to_owned(),
            },
            kube::Error::Api(response) if response.code == 409 => Self::AlreadyExists {
                kind: kind.to_owned(),
                key: key.clone(),
                cluster: cluster.to_owned(),
            },
            _ => Self::Api {
                operation,
                kind: kind.to_owned(),
                key: key.clone(),
                cluster: cluster.to_owned(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: format!("status {code}"),
            reason: "Test".to_owned(),
            code,
        })
    }

    #[test]
    fn classifies_status_codes() {
        let key = ObjectKey::new("cluster-registry", "demo-active");

        let err = KuflexBackendError::from_kube("get", "Secret", &key, "cluster[0]", api_error(404));
        assert!(err.is_not_found());

        let err = KuflexBackendError::from_kube("create", "Secret", &key, "cluster[0]", api_error(409));
        assert!(err.is_already_exists());

        let err = KuflexBackendError::from_kube("get", "Secret", &key, "cluster[0]", api_error(403));
        assert!(matches!(err, KuflexBackendError::Api { operation: "get", .. }));
        assert!(err.to_string().contains("cluster-registry/demo-active"));
    }

    #[test]
    fn key_display_omits_empty_namespace() {
        assert_eq!(ObjectKey::cluster_scoped("demo-active").to_string(), "demo-active");
        assert_eq!(ObjectKey::new("ns", "x").to_string(), "ns/x");
    }
}
