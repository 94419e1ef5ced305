use std::collections::BTreeMap;

use color_eyre::eyre::Result;
use kuflex_k8s_backend::ClusterIdentity;
use serde::{Deserialize, Serialize};

/// One chart to install, where to get it from and what to call it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChartRelease {
    /// Short handle used on the command line (`--resource`).
    pub name: String,
    pub repository_url: String,
    pub repository_name: String,
    pub chart: String,
    pub release: String,
    pub namespace: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    /// Deployment to wait on after install. Looked up through the release
    /// annotation when left empty.
    #[serde(default)]
    pub deployment: Option<String>,
}

impl ChartRelease {
    pub fn reference(&self) -> String {
        format!("{}/{}", self.repository_name, self.chart)
    }
}

#[async_trait::async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Makes sure the chart's repository is known and current, then installs
    /// the release into `chart.namespace` on `target`.
    async fn install(&self, chart: &ChartRelease, target: &ClusterIdentity) -> Result<()>;

    async fn uninstall(&self, release: &str, namespace: &str, target: &ClusterIdentity) -> Result<()>;
}
