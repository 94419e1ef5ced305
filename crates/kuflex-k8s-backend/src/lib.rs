pub mod api;
pub mod client;
pub mod crd;
pub mod deployments;
pub mod error;
pub mod manifest;
pub mod mirror;
pub mod namespaces;
pub mod registry;
pub mod scheme;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use api::ClusterApi;
pub use client::{ClusterClient, ClusterIdentity};
pub use crd::{Cluster, IstioControlPlane};
pub use deployments::{DEFAULT_POLL_INTERVAL, ReadinessProbe};
pub use error::{KuflexBackendError, ObjectKey, Result};
pub use manifest::{FileResourceLoader, ResourceLoader};
pub use mirror::{MirrorConfig, Role};
pub use registry::ClientRegistry;
pub use scheme::Scheme;
