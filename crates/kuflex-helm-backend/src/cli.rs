use std::ffi::OsString;
use std::path::PathBuf;

use color_eyre::eyre::{Result, WrapErr, eyre};
use kuflex_k8s_backend::ClusterIdentity;
use serde::Deserialize;
use tokio::process::Command;

use crate::traits::{ChartInstaller, ChartRelease};

/// Drives the `helm` binary found on `PATH` (or at an explicit location).
#[derive(Clone, Debug)]
pub struct HelmCli {
    binary: PathBuf,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryEntry {
    name: String,
}

fn target_args(target: &ClusterIdentity) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--kubeconfig".into(), target.kubeconfig.clone().into()];
    if let Some(context) = &target.context {
        args.push("--kube-context".into());
        args.push(context.into());
    }
    args
}

pub fn install_args(chart: &ChartRelease, target: &ClusterIdentity) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "install".into(),
        chart.release.clone().into(),
        chart.reference().into(),
        "--namespace".into(),
        chart.namespace.clone().into(),
    ];
    args.extend(target_args(target));
    for (key, value) in &chart.values {
        args.push("--set".into());
        args.push(format!("{key}={value}").into());
    }
    args
}

pub fn uninstall_args(release: &str, namespace: &str, target: &ClusterIdentity) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "uninstall".into(),
        release.into(),
        "--namespace".into(),
        namespace.into(),
    ];
    args.extend(target_args(target));
    args
}

fn parse_repository_list(stdout: &str) -> Result<Vec<String>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<RepositoryEntry> =
        serde_json::from_str(stdout).wrap_err("helm: failed to parse repository list")?;

    Ok(entries.into_iter().map(|entry| entry.name).collect())
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[OsString]) -> Result<String> {
        let subcommand = args
            .iter()
            .take(2)
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(binary = %self.binary.display(), ?args, "running helm");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .wrap_err_with(|| format!("failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!("helm {subcommand} failed ({}): {}", output.status, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn is_repository_exists(&self, name: &str) -> Result<bool> {
        let result = self.run(&["repo".into(), "list".into(), "-o".into(), "json".into()]).await;
        let names = match result {
            Ok(stdout) => parse_repository_list(&stdout)?,
            // helm exits non-zero instead of printing an empty list.
            Err(e) if e.to_string().contains("no repositories") => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(names.iter().any(|repo| repo == name))
    }

    pub async fn repository_add(&self, name: &str, url: &str) -> Result<()> {
        self.run(&["repo".into(), "add".into(), name.into(), url.into()])
            .await
            .wrap_err_with(|| format!("{url} is not a valid chart repository or cannot be reached"))?;
        tracing::info!(repository = %name, %url, "chart repository added");

        Ok(())
    }

    pub async fn repository_update(&self) -> Result<()> {
        self.run(&["repo".into(), "update".into()]).await?;
        tracing::info!("chart repositories updated");

        Ok(())
    }
}

#[async_trait::async_trait]
impl ChartInstaller for HelmCli {
    async fn install(&self, chart: &ChartRelease, target: &ClusterIdentity) -> Result<()> {
        if self.is_repository_exists(&chart.repository_name).await? {
            tracing::debug!(repository = %chart.repository_name, "chart repository already known");
        } else {
            self.repository_add(&chart.repository_name, &chart.repository_url).await?;
        }
        self.repository_update().await?;

        self.run(&install_args(chart, target))
            .await
            .wrap_err_with(|| format!("failed to install {} as {}", chart.reference(), chart.release))?;
        tracing::info!(release = %chart.release, namespace = %chart.namespace, cluster = %target, "chart installed");

        Ok(())
    }

    async fn uninstall(&self, release: &str, namespace: &str, target: &ClusterIdentity) -> Result<()> {
        self.run(&uninstall_args(release, namespace, target))
            .await
            .wrap_err_with(|| format!("failed to uninstall {release}"))?;
        tracing::info!(%release, %namespace, cluster = %target, "chart uninstalled");

        Ok(())
    }
}
