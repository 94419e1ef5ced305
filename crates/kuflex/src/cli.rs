use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::constants::KUFLEX_VERSION;

#[derive(Debug, Parser)]
#[command(name = "kuflex")]
#[command(about = "Bootstrap an active/passive service mesh across two clusters", long_about = None)]
#[command(version = KUFLEX_VERSION)]
pub struct Cli {
    /// Configuration file; defaults to config.yaml in the user config directory
    #[arg(long, global = true, env = "KUFLEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory the log file is written to
    #[arg(long, global = true, env = "KUFLEX_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install the mesh operator and cluster registry, then apply a control plane
    Install(InstallArgs),

    /// Remove the control plane and uninstall charts
    Uninstall(UninstallArgs),

    /// Replicate each cluster's link secret and descriptor onto the other
    Attach(LinkArgs),

    /// Delete the replicated link secrets and descriptors
    Detach(LinkArgs),

    /// Print the API server address of a cluster
    Endpoint(EndpointArgs),
}

/// The active cluster.
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Kubeconfig of the active cluster; defaults to $KUBECONFIG or ~/.kube/config
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Context inside the kubeconfig; defaults to its current context
    #[arg(long)]
    pub context: Option<String>,
}

/// The passive cluster. Falls back to the active cluster's kubeconfig so
/// two contexts of one file only need `--passive-context`.
#[derive(Debug, Clone, Args)]
#[group(id = "passive_target", multiple = true)]
pub struct PassiveTargetArgs {
    #[arg(long)]
    pub passive_kubeconfig: Option<PathBuf>,

    #[arg(long)]
    pub passive_context: Option<String>,
}

impl PassiveTargetArgs {
    pub fn is_set(&self) -> bool {
        self.passive_kubeconfig.is_some() || self.passive_context.is_some()
    }
}

#[derive(Debug, Args)]
pub struct InstallArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub passive: PassiveTargetArgs,

    /// Manifest applied once the charts are installed
    #[arg(short = 'c', long)]
    pub custom_resource: Option<PathBuf>,

    /// Wait for each chart's deployment to become ready
    #[arg(short = 'v', long)]
    pub verify: bool,

    /// Seconds to wait per deployment; overrides the configured timeout
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Attach the two clusters afterwards (needs a passive cluster)
    #[arg(long, requires = "passive_target")]
    pub attach: bool,
}

#[derive(Debug, Args)]
pub struct UninstallArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Chart to uninstall by name or release; all charts when omitted
    #[arg(short = 'r', long)]
    pub resource: Option<String>,

    /// Manifest of the control plane to remove before the charts
    #[arg(short = 'c', long)]
    pub custom_resource: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct LinkArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub passive: PassiveTargetArgs,

    /// Namespace the active cluster keeps its link pairs in
    #[arg(long)]
    pub namespace: Option<String>,

    /// Namespace the passive cluster keeps its link pairs in
    #[arg(long)]
    pub passive_namespace: Option<String>,
}

#[derive(Debug, Args)]
pub struct EndpointArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn install_with_two_clusters() {
        let cli = Cli::try_parse_from([
            "kuflex",
            "install",
            "--kubeconfig",
            "/tmp/kubeconfig",
            "--context",
            "active",
            "--passive-context",
            "passive",
            "-c",
            "icp.yaml",
            "--verify",
            "--timeout",
            "90",
            "--attach",
        ])
        .unwrap();

        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.target.context.as_deref(), Some("active"));
        assert_eq!(args.passive.passive_context.as_deref(), Some("passive"));
        assert!(args.passive.passive_kubeconfig.is_none());
        assert_eq!(args.custom_resource, Some(PathBuf::from("icp.yaml")));
        assert!(args.verify && args.attach);
        assert_eq!(args.timeout, Some(90));
    }

    #[test]
    fn attach_flag_needs_a_passive_cluster() {
        let err = Cli::try_parse_from(["kuflex", "install", "--attach"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn attach_accepts_passive_kubeconfig_alone() {
        let cli = Cli::try_parse_from(["kuflex", "install", "--passive-kubeconfig", "passive.yaml", "--attach"])
            .unwrap();

        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert!(args.attach && args.passive.is_set());
        assert_eq!(args.passive.passive_kubeconfig, Some(PathBuf::from("passive.yaml")));
        assert!(args.passive.passive_context.is_none());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kuflex", "detach", "--passive-context", "b", "--log-dir", "/var/log/kuflex"])
            .unwrap();

        assert_eq!(cli.log_dir, Some(PathBuf::from("/var/log/kuflex")));
        assert!(matches!(cli.command, Commands::Detach(_)));
    }

    #[test]
    fn uninstall_single_resource() {
        let cli = Cli::try_parse_from(["kuflex", "uninstall", "-r", "cluster-registry"]).unwrap();

        let Commands::Uninstall(args) = cli.command else {
            panic!("expected uninstall");
        };
        assert_eq!(args.resource.as_deref(), Some("cluster-registry"));
        assert!(args.custom_resource.is_none());
    }
}
