use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tokio::time::{Instant, sleep};

use crate::api::ClusterApi;
use crate::error::{KuflexBackendError, ObjectKey, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Frames of the spinner shown while waiting on a deployment.
pub const ANIMATION: [&str; 7] = ["_", "-", "`", "'", "´", "-", "_"];

/// What the last poll of a deployment observed.
#[derive(Clone, Debug)]
pub struct ReadinessProbe {
    pub key: ObjectKey,
    /// `None` when the timeout reaches past what the clock can represent.
    pub deadline: Option<Instant>,
    pub interval: Duration,
    pub polls: u32,
    pub replicas: i32,
    pub ready_replicas: i32,
}

impl ReadinessProbe {
    pub fn frame(&self) -> &'static str {
        ANIMATION[(self.polls.saturating_sub(1) as usize) % ANIMATION.len()]
    }
}

/// Desired and ready replica counts; `None` until the controller has
/// reported a status at all.
fn replica_counts(deployment: &Deployment) -> Option<(i32, i32)> {
    deployment.status.as_ref().map(|status| {
        (
            status.replicas.unwrap_or_default(),
            status.ready_replicas.unwrap_or_default(),
        )
    })
}

pub async fn verify<C: ClusterApi + ?Sized>(
    api: &C,
    name: &str,
    namespace: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    verify_with_progress(api, name, namespace, timeout, interval, |_| {}).await
}

/// Polls the deployment until every replica is ready or `timeout` has passed.
///
/// Failing to read the deployment (including it not existing) ends the wait
/// immediately; only "not ready yet" is retried. A zero timeout checks once.
pub async fn verify_with_progress<C, F>(
    api: &C,
    name: &str,
    namespace: &str,
    timeout: Duration,
    interval: Duration,
    mut progress: F,
) -> Result<()>
where
    C: ClusterApi + ?Sized,
    F: FnMut(&ReadinessProbe),
{
    let start = Instant::now();
    let mut probe = ReadinessProbe {
        key: ObjectKey::new(namespace, name),
        deadline: start.checked_add(timeout),
        interval,
        polls: 0,
        replicas: 0,
        ready_replicas: 0,
    };

    loop {
        let deployment = api.get_deployment(&probe.key).await?;
        probe.polls += 1;

        let counts = replica_counts(&deployment);
        if let Some((replicas, ready_replicas)) = counts {
            probe.replicas = replicas;
            probe.ready_replicas = ready_replicas;
        }
        progress(&probe);

        tracing::debug!(
            cluster = %api.label(),
            deployment = %probe.key,
            replicas = probe.replicas,
            ready_replicas = probe.ready_replicas,
            poll = probe.polls,
            "polled deployment"
        );

        if counts.is_some_and(|(replicas, ready)| replicas == ready) {
            tracing::info!(cluster = %api.label(), deployment = %probe.key, "deployment is ready");
            return Ok(());
        }

        if probe.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(KuflexBackendError::NotReady {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                cluster: api.label().to_owned(),
                ready: probe.ready_replicas,
                desired: probe.replicas,
                elapsed: start.elapsed(),
            });
        }

        sleep(interval).await;
    }
}

/// Finds the deployment a chart release created by looking for the release
/// name among its annotations (helm stamps `meta.helm.sh/release-name`).
pub async fn get_deployment_name<C: ClusterApi + ?Sized>(
    api: &C,
    release_name: &str,
    namespace: &str,
) -> Result<String> {
    let deployments = api.list_deployments(namespace).await?;

    deployments
        .iter()
        .find(|deployment| {
            deployment
                .annotations()
                .values()
                .any(|value| value == release_name)
        })
        .map(|deployment| deployment.name_any())
        .ok_or_else(|| KuflexBackendError::NotFound {
            kind: "Deployment".to_owned(),
            key: ObjectKey::new(namespace, format!("<release {release_name}>")),
            cluster: api.label().to_owned(),
        })
}
