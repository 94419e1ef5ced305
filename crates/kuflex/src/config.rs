use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use directories::ProjectDirs;
use kuflex_helm_backend::ChartRelease;
use kuflex_k8s_backend::MirrorConfig;
use kuflex_k8s_backend::mirror::{DEFAULT_ACTIVE_NAME, DEFAULT_PASSIVE_NAME};
use serde::{Deserialize, Serialize};

use crate::constants::*;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkSettings {
    pub active_name: String,
    pub passive_name: String,
    pub namespace: String,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            active_name: DEFAULT_ACTIVE_NAME.to_owned(),
            passive_name: DEFAULT_PASSIVE_NAME.to_owned(),
            namespace: LINK_NAMESPACE.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MirrorSettings {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            attempts: MIRROR_ATTEMPTS,
            interval_ms: MIRROR_INTERVAL_MS,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifySettings {
    pub interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            interval_ms: VERIFY_INTERVAL_MS,
            timeout_secs: VERIFY_TIMEOUT_SECS,
        }
    }
}

/// Everything that is not a per-run flag. Any section left out of the file
/// keeps its built-in value.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub charts: Vec<ChartRelease>,
    pub link: LinkSettings,
    pub mirror: MirrorSettings,
    pub verify: VerifySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            charts: default_charts(),
            link: LinkSettings::default(),
            mirror: MirrorSettings::default(),
            verify: VerifySettings::default(),
        }
    }
}

fn default_charts() -> Vec<ChartRelease> {
    vec![
        ChartRelease {
            name: "istio-operator".to_owned(),
            repository_url: ISTIO_OPERATOR_REPOSITORY_URL.to_owned(),
            repository_name: ISTIO_OPERATOR_REPOSITORY.to_owned(),
            chart: ISTIO_OPERATOR_CHART.to_owned(),
            release: ISTIO_OPERATOR_RELEASE.to_owned(),
            namespace: ISTIO_OPERATOR_NAMESPACE.to_owned(),
            values: BTreeMap::new(),
            deployment: Some(ISTIO_OPERATOR_DEPLOYMENT.to_owned()),
        },
        ChartRelease {
            name: "cluster-registry".to_owned(),
            repository_url: CLUSTER_REGISTRY_REPOSITORY_URL.to_owned(),
            repository_name: CLUSTER_REGISTRY_REPOSITORY.to_owned(),
            chart: CLUSTER_REGISTRY_CHART.to_owned(),
            release: CLUSTER_REGISTRY_RELEASE.to_owned(),
            namespace: CLUSTER_REGISTRY_NAMESPACE.to_owned(),
            values: BTreeMap::new(),
            deployment: Some(CLUSTER_REGISTRY_DEPLOYMENT.to_owned()),
        },
    ]
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "kuflex", "kuflex")
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).wrap_err("invalid configuration")
    }

    /// Reads `path` when given (it must exist), otherwise the file in the
    /// user's config directory when there is one, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME)) {
                Some(path) if path.is_file() => path,
                _ => {
                    tracing::debug!("no configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let raw = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration {}", path.display()))?;
        let config = Self::from_yaml(&raw).wrap_err_with(|| format!("in {}", path.display()))?;
        tracing::info!(path = %path.display(), charts = config.charts.len(), "configuration loaded");

        Ok(config)
    }

    pub fn chart(&self, name: &str) -> Result<&ChartRelease> {
        self.charts
            .iter()
            .find(|chart| chart.name == name || chart.release == name)
            .ok_or_else(|| {
                let known: Vec<&str> = self.charts.iter().map(|chart| chart.name.as_str()).collect();
                eyre!("unknown resource {name}, expected one of: {}", known.join(", "))
            })
    }

    pub fn mirror_config(&self) -> MirrorConfig {
        MirrorConfig {
            active_name: self.link.active_name.clone(),
            passive_name: self.link.passive_name.clone(),
            attempts: self.mirror.attempts,
            interval: Duration::from_millis(self.mirror.interval_ms),
        }
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify.interval_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify.timeout_secs)
    }
}

fn kubeconfig_from(env: Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
    env.and_then(|paths| std::env::split_paths(&paths).find(|path| !path.as_os_str().is_empty()))
        .or_else(|| home.map(|home| home.join(".kube").join("config")))
}

/// First entry of `$KUBECONFIG`, otherwise `~/.kube/config`.
pub fn default_kubeconfig() -> Result<PathBuf> {
    kubeconfig_from(std::env::var_os("KUBECONFIG"), dirs_next::home_dir())
        .ok_or_else(|| eyre!("no kubeconfig given and no home directory to look in"))
}
