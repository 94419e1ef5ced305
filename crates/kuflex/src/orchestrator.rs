use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail};
use kuflex_helm_backend::{ChartInstaller, ChartRelease, HelmCli};
use kuflex_k8s_backend::{
    ClientRegistry, ClusterApi, ClusterIdentity, FileResourceLoader, KuflexBackendError, ReadinessProbe,
    ResourceLoader,
};

use crate::cli::{InstallArgs, LinkArgs, PassiveTargetArgs, TargetArgs, UninstallArgs};
use crate::config::{Config, default_kubeconfig};

pub fn active_identity(target: &TargetArgs) -> Result<ClusterIdentity> {
    let kubeconfig = match &target.kubeconfig {
        Some(path) => path.clone(),
        None => default_kubeconfig()?,
    };

    Ok(ClusterIdentity::new(kubeconfig, target.context.clone()))
}

/// The passive side borrows the active side's kubeconfig unless it names
/// its own. `None` when no passive flag was given at all.
pub fn passive_identity(active: &ClusterIdentity, passive: &PassiveTargetArgs) -> Option<ClusterIdentity> {
    if !passive.is_set() {
        return None;
    }
    let kubeconfig: PathBuf = passive
        .passive_kubeconfig
        .clone()
        .unwrap_or_else(|| active.kubeconfig.clone());

    Some(ClusterIdentity::new(kubeconfig, passive.passive_context.clone()))
}

fn draw_probe(probe: &ReadinessProbe) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(
        stderr,
        "\r{} waiting for {} ({}/{} ready)",
        probe.frame(),
        probe.key,
        probe.ready_replicas,
        probe.replicas
    );
    let _ = stderr.flush();
}

/// Sequences chart installs, readiness checks, custom resources and the
/// cluster link across one or two clusters.
pub struct Orchestrator<I = HelmCli, L = FileResourceLoader> {
    config: Config,
    installer: I,
    loader: L,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, HelmCli::default(), FileResourceLoader)
    }
}

impl<I: ChartInstaller, L: ResourceLoader> Orchestrator<I, L> {
    pub fn with_parts(config: Config, installer: I, loader: L) -> Self {
        Self {
            config,
            installer,
            loader,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn install(&self, args: &InstallArgs) -> Result<()> {
        let active = active_identity(&args.target)?;
        let mut targets = vec![active.clone()];
        targets.extend(passive_identity(&active, &args.passive));

        let mut registry = ClientRegistry::create_clients(&targets).await?;
        self.install_clusters(&mut registry, &targets, args).await?;

        // The charts brought new CRDs; clients created before them cannot
        // resolve the custom resource.
        registry.remove_all();
        let mut registry = ClientRegistry::create_clients(&targets).await?;

        self.finish_install(&mut registry, args).await
    }

    /// Charts, then readiness, one cluster at a time. `targets` lines up
    /// with the registry's clients.
    async fn install_clusters<C: ClusterApi>(
        &self,
        registry: &mut ClientRegistry<C>,
        targets: &[ClusterIdentity],
        args: &InstallArgs,
    ) -> Result<()> {
        for (index, target) in targets.iter().enumerate() {
            registry.set_active(index);
            self.install_charts(registry, target).await?;

            if args.verify {
                let timeout = args
                    .timeout
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.config.verify_timeout());
                self.verify_charts(registry, timeout).await?;
            }
        }

        Ok(())
    }

    async fn finish_install<C: ClusterApi>(&self, registry: &mut ClientRegistry<C>, args: &InstallArgs) -> Result<()> {
        if let Some(path) = &args.custom_resource {
            self.apply_everywhere(registry, path).await?;
        }
        if args.attach {
            self.attach_registry(registry, None, None).await?;
        }

        Ok(())
    }

    async fn apply_everywhere<C: ClusterApi>(&self, registry: &mut ClientRegistry<C>, path: &Path) -> Result<()> {
        let object = self.loader.load(path).await?;
        for index in 0..registry.len() {
            registry.set_active(index);
            match registry.apply(&object).await {
                Ok(_) => {}
                Err(e) if e.is_already_exists() => tracing::warn!("{e}, leaving it as is"),
                Err(e) => return Err(e).wrap_err_with(|| format!("failed to apply {}", path.display())),
            }
        }

        Ok(())
    }

    async fn install_charts<C: ClusterApi>(&self, registry: &ClientRegistry<C>, target: &ClusterIdentity) -> Result<()> {
        for chart in &self.config.charts {
            registry.ensure_namespace(&chart.namespace).await?;
            self.installer.install(chart, target).await?;
        }

        Ok(())
    }

    async fn deployment_name<C: ClusterApi>(&self, registry: &ClientRegistry<C>, chart: &ChartRelease) -> Result<String> {
        match &chart.deployment {
            Some(name) => Ok(name.clone()),
            None => Ok(registry.get_deployment_name(&chart.release, &chart.namespace).await?),
        }
    }

    /// Waits on every chart's deployment in turn. A deployment that never
    /// becomes ready is reported and the next one is checked anyway.
    async fn verify_charts<C: ClusterApi>(&self, registry: &ClientRegistry<C>, timeout: Duration) -> Result<()> {
        for chart in &self.config.charts {
            let name = self.deployment_name(registry, chart).await?;
            let result = registry
                .verify_with_progress(&name, &chart.namespace, timeout, self.config.verify_interval(), draw_probe)
                .await;
            eprintln!();

            match result {
                Ok(()) => {}
                Err(e @ KuflexBackendError::NotReady { .. }) => tracing::error!("{e}"),
                Err(e) => return Err(e).wrap_err_with(|| format!("failed to verify {name}")),
            }
        }

        Ok(())
    }

    fn charts_to_uninstall(&self, resource: Option<&str>) -> Result<Vec<&ChartRelease>> {
        match resource {
            Some(name) => Ok(vec![self.config.chart(name)?]),
            None => Ok(self.config.charts.iter().rev().collect()),
        }
    }

    pub async fn uninstall(&self, args: &UninstallArgs) -> Result<()> {
        let target = active_identity(&args.target)?;
        let charts = self.charts_to_uninstall(args.resource.as_deref())?;

        if let Some(path) = &args.custom_resource {
            let registry = ClientRegistry::create_clients(std::slice::from_ref(&target)).await?;
            let object = self.loader.load(path).await?;
            match registry.remove(&object).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => tracing::warn!("{e}, nothing to remove"),
                Err(e) => return Err(e).wrap_err_with(|| format!("failed to remove {}", path.display())),
            }
        }

        for chart in charts {
            self.installer.uninstall(&chart.release, &chart.namespace, &target).await?;
        }

        Ok(())
    }

    fn link_targets(&self, args: &LinkArgs) -> Result<[ClusterIdentity; 2]> {
        let active = active_identity(&args.target)?;
        let Some(passive) = passive_identity(&active, &args.passive) else {
            bail!("a passive cluster is needed, pass --passive-kubeconfig or --passive-context");
        };
        if passive == active {
            bail!("active and passive cluster are both {active}");
        }

        Ok([active, passive])
    }

    async fn attach_registry<C: ClusterApi>(
        &self,
        registry: &ClientRegistry<C>,
        namespace: Option<&str>,
        passive_namespace: Option<&str>,
    ) -> Result<()> {
        let namespace = namespace.unwrap_or(self.config.link.namespace.as_str());
        let passive_namespace = passive_namespace.unwrap_or(namespace);
        registry
            .attach(namespace, passive_namespace, &self.config.mirror_config())
            .await
            .wrap_err("failed to attach clusters")
    }

    pub async fn attach(&self, args: &LinkArgs) -> Result<()> {
        let targets = self.link_targets(args)?;
        let registry = ClientRegistry::create_clients(&targets).await?;

        self.attach_registry(&registry, args.namespace.as_deref(), args.passive_namespace.as_deref())
            .await
    }

    pub async fn detach(&self, args: &LinkArgs) -> Result<()> {
        let targets = self.link_targets(args)?;
        let registry = ClientRegistry::create_clients(&targets).await?;

        let namespace = args.namespace.as_deref().unwrap_or(self.config.link.namespace.as_str());
        let passive_namespace = args.passive_namespace.as_deref().unwrap_or(namespace);
        registry
            .detach(namespace, passive_namespace, &self.config.mirror_config())
            .await
            .wrap_err("failed to detach clusters")
    }

    pub async fn endpoint(&self, target: &TargetArgs) -> Result<String> {
        let target = active_identity(target)?;
        let registry = ClientRegistry::create_clients(std::slice::from_ref(&target)).await?;

        Ok(registry.active()?.api_server_endpoint().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
    use kuflex_k8s_backend::ObjectKey;
    use kuflex_k8s_backend::fake::FakeCluster;
    use kuflex_k8s_backend::mirror::{DEFAULT_ACTIVE_NAME, DEFAULT_PASSIVE_NAME};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingInstaller {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChartInstaller for RecordingInstaller {
        async fn install(&self, chart: &ChartRelease, target: &ClusterIdentity) -> Result<()> {
            self.calls.lock().unwrap().push(format!("install {} {target}", chart.release));
            Ok(())
        }

        async fn uninstall(&self, release: &str, namespace: &str, target: &ClusterIdentity) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("uninstall {release} {namespace} {target}"));
            Ok(())
        }
    }

    struct NoManifests;

    #[async_trait]
    impl ResourceLoader for NoManifests {
        async fn load(&self, path: &Path) -> kuflex_k8s_backend::Result<DynamicObject> {
            Err(KuflexBackendError::Manifest {
                path: path.to_path_buf(),
                reason: "not available in tests".to_owned(),
            })
        }
    }

    struct OneManifest(DynamicObject);

    #[async_trait]
    impl ResourceLoader for OneManifest {
        async fn load(&self, _path: &Path) -> kuflex_k8s_backend::Result<DynamicObject> {
            Ok(self.0.clone())
        }
    }

    fn orchestrator() -> Orchestrator<RecordingInstaller, NoManifests> {
        Orchestrator::with_parts(Config::default(), RecordingInstaller::default(), NoManifests)
    }

    fn control_plane() -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "servicemesh.cisco.com/v1alpha1".to_owned(),
                kind: "IstioControlPlane".to_owned(),
            }),
            metadata: ObjectMeta {
                name: Some("icp-v115x".to_owned()),
                namespace: Some("istio-system".to_owned()),
                ..Default::default()
            },
            data: Default::default(),
        }
    }

    fn identities() -> Vec<ClusterIdentity> {
        vec![
            ClusterIdentity::new("/tmp/kubeconfig", Some("a".to_owned())),
            ClusterIdentity::new("/tmp/kubeconfig", Some("b".to_owned())),
        ]
    }

    fn install_args(verify: bool, custom_resource: Option<&str>, attach: bool) -> InstallArgs {
        InstallArgs {
            target: target(Some("a")),
            passive: passive(None, Some("b")),
            custom_resource: custom_resource.map(PathBuf::from),
            verify,
            timeout: Some(0),
            attach,
        }
    }

    /// Scripts every configured chart's deployment with the given replica counts.
    fn script_charts(cluster: &FakeCluster, config: &Config, statuses: &[&[(i32, i32)]]) {
        for (chart, status) in config.charts.iter().zip(statuses) {
            let name = chart.deployment.as_deref().unwrap();
            cluster.script_deployment(&ObjectKey::new(&chart.namespace, name), status);
        }
    }

    fn target(context: Option<&str>) -> TargetArgs {
        TargetArgs {
            kubeconfig: Some(PathBuf::from("/tmp/kubeconfig")),
            context: context.map(str::to_owned),
        }
    }

    fn passive(kubeconfig: Option<&str>, context: Option<&str>) -> PassiveTargetArgs {
        PassiveTargetArgs {
            passive_kubeconfig: kubeconfig.map(PathBuf::from),
            passive_context: context.map(str::to_owned),
        }
    }

    #[test]
    fn passive_falls_back_to_active_kubeconfig() {
        let active = active_identity(&target(Some("a"))).unwrap();

        let identity = passive_identity(&active, &passive(None, Some("b"))).unwrap();
        assert_eq!(identity, ClusterIdentity::new("/tmp/kubeconfig", Some("b".to_owned())));

        let identity = passive_identity(&active, &passive(Some("/tmp/other"), None)).unwrap();
        assert_eq!(identity, ClusterIdentity::new("/tmp/other", None));

        assert!(passive_identity(&active, &passive(None, None)).is_none());
    }

    #[test]
    fn link_needs_two_distinct_clusters() {
        let orchestrator = orchestrator();

        let missing = LinkArgs {
            target: target(Some("a")),
            passive: passive(None, None),
            namespace: None,
            passive_namespace: None,
        };
        assert!(orchestrator.link_targets(&missing).is_err());

        let same = LinkArgs {
            target: target(Some("a")),
            passive: passive(None, Some("a")),
            namespace: None,
            passive_namespace: None,
        };
        assert!(orchestrator.link_targets(&same).is_err());
    }

    #[tokio::test]
    async fn uninstall_all_goes_in_reverse_order() {
        let orchestrator = orchestrator();
        let args = UninstallArgs {
            target: target(Some("a")),
            resource: None,
            custom_resource: None,
        };

        orchestrator.uninstall(&args).await.unwrap();

        assert_eq!(
            *orchestrator.installer.calls.lock().unwrap(),
            vec![
                "uninstall cluster-registry cluster-registry a@/tmp/kubeconfig".to_owned(),
                "uninstall banzaicloud-stable istio-system a@/tmp/kubeconfig".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn uninstall_unknown_resource_touches_nothing() {
        let orchestrator = orchestrator();
        let args = UninstallArgs {
            target: target(None),
            resource: Some("linkerd".to_owned()),
            custom_resource: None,
        };

        let err = orchestrator.uninstall(&args).await.unwrap_err();
        assert!(err.to_string().contains("unknown resource linkerd"));
        assert!(orchestrator.installer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn install_runs_every_chart_on_each_cluster_in_turn() {
        let orchestrator = orchestrator();
        let (a, b) = (FakeCluster::new("cluster[0]"), FakeCluster::new("cluster[1]"));
        script_charts(&a, orchestrator.config(), &[&[(1, 1)], &[(1, 1)]]);
        script_charts(&b, orchestrator.config(), &[&[(1, 1)], &[(1, 1)]]);
        let mut registry = ClientRegistry::from_clients(vec![a.clone(), b.clone()]);

        orchestrator
            .install_clusters(&mut registry, &identities(), &install_args(true, None, false))
            .await
            .unwrap();

        assert_eq!(
            *orchestrator.installer.calls.lock().unwrap(),
            vec![
                "install banzaicloud-stable a@/tmp/kubeconfig".to_owned(),
                "install cluster-registry a@/tmp/kubeconfig".to_owned(),
                "install banzaicloud-stable b@/tmp/kubeconfig".to_owned(),
                "install cluster-registry b@/tmp/kubeconfig".to_owned(),
            ]
        );
        for cluster in [&a, &b] {
            assert_eq!(cluster.namespace_names(), vec!["cluster-registry".to_owned(), "istio-system".to_owned()]);
            assert_eq!(cluster.calls("get", "Deployment"), 2);
        }
    }

    #[tokio::test]
    async fn install_without_verify_reads_no_deployments() {
        let orchestrator = orchestrator();
        let a = FakeCluster::new("cluster[0]");
        let mut registry = ClientRegistry::from_clients(vec![a.clone()]);

        orchestrator
            .install_clusters(&mut registry, &identities()[..1], &install_args(false, None, false))
            .await
            .unwrap();

        assert_eq!(orchestrator.installer.calls.lock().unwrap().len(), 2);
        assert_eq!(a.calls("get", "Deployment"), 0);
    }

    #[tokio::test]
    async fn unready_chart_does_not_stop_the_next_check() {
        let orchestrator = orchestrator();
        let a = FakeCluster::new("cluster[0]");
        script_charts(&a, orchestrator.config(), &[&[(2, 1)], &[(1, 1)]]);
        let mut registry = ClientRegistry::from_clients(vec![a.clone()]);

        orchestrator
            .install_clusters(&mut registry, &identities()[..1], &install_args(true, None, false))
            .await
            .unwrap();

        assert_eq!(a.calls("get", "Deployment"), 2);
    }

    #[tokio::test]
    async fn unreadable_deployment_stops_the_install() {
        let orchestrator = orchestrator();
        let (a, b) = (FakeCluster::new("cluster[0]"), FakeCluster::new("cluster[1]"));
        script_charts(&a, orchestrator.config(), &[&[(1, 1)], &[(1, 1)]]);
        a.fail("get", "Deployment", 503);
        let mut registry = ClientRegistry::from_clients(vec![a.clone(), b.clone()]);

        let err = orchestrator
            .install_clusters(&mut registry, &identities(), &install_args(true, None, false))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("failed to verify"));
        assert_eq!(a.calls("get", "Deployment"), 1);
        // The passive cluster is never reached.
        assert_eq!(orchestrator.installer.calls.lock().unwrap().len(), 2);
        assert!(b.namespace_names().is_empty());
    }

    #[tokio::test]
    async fn custom_resource_lands_on_both_clusters() {
        let orchestrator =
            Orchestrator::with_parts(Config::default(), RecordingInstaller::default(), OneManifest(control_plane()));
        let (a, b) = (FakeCluster::new("cluster[0]"), FakeCluster::new("cluster[1]"));
        a.apply(&control_plane()).await.unwrap();
        let mut registry = ClientRegistry::from_clients(vec![a.clone(), b.clone()]);

        orchestrator
            .finish_install(&mut registry, &install_args(false, Some("icp.yaml"), false))
            .await
            .unwrap();

        // Already present on the active cluster, which is left alone.
        assert_eq!(a.calls("create", "IstioControlPlane"), 2);
        assert_eq!(a.objects().len(), 1);
        assert_eq!(b.calls("create", "IstioControlPlane"), 1);
        assert_eq!(b.objects().len(), 1);
    }

    #[tokio::test]
    async fn failed_custom_resource_skips_attach() {
        let orchestrator =
            Orchestrator::with_parts(Config::default(), RecordingInstaller::default(), OneManifest(control_plane()));
        let (a, b) = (FakeCluster::new("cluster[0]"), FakeCluster::new("cluster[1]"));
        b.fail("create", "IstioControlPlane", 500);
        let mut registry = ClientRegistry::from_clients(vec![a.clone(), b.clone()]);

        let err = orchestrator
            .finish_install(&mut registry, &install_args(false, Some("icp.yaml"), true))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("failed to apply icp.yaml"));
        assert_eq!(a.objects().len(), 1);
        assert_eq!(a.calls("get", "Secret") + b.calls("get", "Secret"), 0);
    }

    #[tokio::test]
    async fn install_attaches_when_asked() {
        let orchestrator = orchestrator();
        let (a, b) = (FakeCluster::new("cluster[0]"), FakeCluster::new("cluster[1]"));
        a.seed_link_pair(&ObjectKey::new("cluster-registry", DEFAULT_ACTIVE_NAME), "cluster-a");
        b.seed_link_pair(&ObjectKey::new("cluster-registry", DEFAULT_PASSIVE_NAME), "cluster-b");
        let mut registry = ClientRegistry::from_clients(vec![a.clone(), b.clone()]);

        orchestrator
            .finish_install(&mut registry, &install_args(false, None, true))
            .await
            .unwrap();

        let linked = vec![DEFAULT_ACTIVE_NAME.to_owned(), DEFAULT_PASSIVE_NAME.to_owned()];
        assert_eq!(a.cluster_names(), linked);
        assert_eq!(b.cluster_names(), linked);
    }
}
