//! Attach and detach two clusters by copying their link pairs.
//!
//! Each cluster-registry controller publishes a secret with credentials for
//! its own cluster and a `Cluster` descriptor pointing at it. Attaching
//! copies each side's pair onto the other side; detaching deletes those
//! copies again. There is no rollback: a failed create after a successful
//! one leaves replication in one direction only, and the error says so.

use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use tokio::time::sleep;

use crate::api::ClusterApi;
use crate::crd::Cluster;
use crate::error::{KuflexBackendError, ObjectKey, Result};

pub const DEFAULT_ACTIVE_NAME: &str = "demo-active";
pub const DEFAULT_PASSIVE_NAME: &str = "demo-passive";
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 4;
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(1);

/// Which half of the federation a cluster plays. Client 0 is always the
/// active side, client 1 the passive side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Active,
    Passive,
}

impl Role {
    pub fn of_index(index: usize) -> Self {
        if index == 0 { Role::Active } else { Role::Passive }
    }
}

#[derive(Clone, Debug)]
pub struct MirrorConfig {
    pub active_name: String,
    pub passive_name: String,
    /// Fetch attempts per pair before giving up.
    pub attempts: u32,
    /// Sleep between two fetch attempts.
    pub interval: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            active_name: DEFAULT_ACTIVE_NAME.to_owned(),
            passive_name: DEFAULT_PASSIVE_NAME.to_owned(),
            attempts: DEFAULT_FETCH_ATTEMPTS,
            interval: DEFAULT_FETCH_INTERVAL,
        }
    }
}

impl MirrorConfig {
    pub fn name_for(&self, role: Role) -> &str {
        match role {
            Role::Active => &self.active_name,
            Role::Passive => &self.passive_name,
        }
    }

    /// Upper bound on how long one [`fetch_link_pair`] waits.
    pub fn fetch_budget(&self) -> Duration {
        self.interval * self.attempts.max(1)
    }
}

/// A secret and descriptor fetched together from one cluster, ready to be
/// created elsewhere.
#[derive(Clone, Debug)]
pub struct LinkPair {
    /// Registry index of the cluster the pair was read from.
    pub origin: usize,
    pub key: ObjectKey,
    pub secret: Secret,
    pub descriptor: Cluster,
}

impl LinkPair {
    /// Copies destined for a cluster whose registry controller watches
    /// `namespace`.
    fn rehomed(&self, namespace: &str) -> (Secret, Cluster) {
        let mut secret = self.secret.clone();
        secret.metadata.namespace = Some(namespace.to_owned());

        let mut descriptor = self.descriptor.clone();
        descriptor.rehome_secret_ref(namespace);

        (secret, descriptor)
    }
}

/// Server-assigned fields that mean nothing on another cluster.
fn clear_origin_fields(metadata: &mut ObjectMeta) {
    metadata.resource_version = None;
    metadata.uid = None;
    metadata.creation_timestamp = None;
    metadata.managed_fields = None;
}

fn describe(found: bool, last_error: Option<String>) -> String {
    match (found, last_error) {
        (true, _) => "found".to_owned(),
        (false, Some(error)) => error,
        (false, None) => "never fetched".to_owned(),
    }
}

/// Reads the secret and descriptor stored under `key`, retrying while
/// either is missing.
///
/// Both members are fetched on every attempt until each has been seen once.
/// "Not found" is retried up to `config.attempts` times; any other API error
/// ends the wait at once. Either both objects come back or neither does.
pub async fn fetch_link_pair<C: ClusterApi + ?Sized>(
    api: &C,
    origin: usize,
    key: &ObjectKey,
    config: &MirrorConfig,
) -> Result<LinkPair> {
    let attempts = config.attempts.max(1);
    let mut secret: Option<Secret> = None;
    let mut descriptor: Option<Cluster> = None;
    let mut secret_error = None;
    let mut descriptor_error = None;

    for attempt in 1..=attempts {
        let (secret_result, descriptor_result) = futures::join!(
            async {
                match secret {
                    None => Some(api.get_secret(key).await),
                    Some(_) => None,
                }
            },
            async {
                match descriptor {
                    None => Some(api.get_cluster(key).await),
                    Some(_) => None,
                }
            },
        );

        match secret_result {
            Some(Ok(found)) => secret = Some(found),
            Some(Err(e)) if e.is_not_found() => secret_error = Some(e.to_string()),
            Some(Err(e)) => return Err(e),
            None => {}
        }
        match descriptor_result {
            Some(Ok(found)) => descriptor = Some(found),
            Some(Err(e)) if e.is_not_found() => descriptor_error = Some(e.to_string()),
            Some(Err(e)) => return Err(e),
            None => {}
        }

        if secret.is_some() && descriptor.is_some() {
            break;
        }

        tracing::debug!(
            cluster = %api.label(),
            key = %key,
            attempt,
            secret = secret.is_some(),
            descriptor = descriptor.is_some(),
            "link pair incomplete"
        );
        if attempt < attempts {
            sleep(config.interval).await;
        }
    }

    match (secret, descriptor) {
        (Some(mut secret), Some(mut descriptor)) => {
            clear_origin_fields(&mut secret.metadata);
            clear_origin_fields(&mut descriptor.metadata);
            Ok(LinkPair {
                origin,
                key: key.clone(),
                secret,
                descriptor,
            })
        }
        (secret, descriptor) => Err(KuflexBackendError::LinkPairTimeout {
            key: key.clone(),
            cluster: api.label().to_owned(),
            attempts,
            secret: describe(secret.is_some(), secret_error),
            descriptor: describe(descriptor.is_some(), descriptor_error),
        }),
    }
}

/// Creates `pair` on `destination`; the descriptor is only created once its
/// secret is in place. An existing copy counts as already mirrored.
async fn mirror_onto<C: ClusterApi + ?Sized>(
    destination: &C,
    namespace: &str,
    pair: &LinkPair,
) -> Result<()> {
    let (secret, descriptor) = pair.rehomed(namespace);

    match destination.create_secret(&secret).await {
        Ok(_) => {}
        Err(e) if e.is_already_exists() => tracing::warn!("{e}, keeping it"),
        Err(e) => return Err(e),
    }
    match destination.create_cluster(&descriptor).await {
        Ok(_) => {}
        Err(e) if e.is_already_exists() => tracing::warn!("{e}, keeping it"),
        Err(e) => return Err(e),
    }

    tracing::info!(
        from = pair.origin,
        to = %destination.label(),
        key = %pair.key,
        "link pair mirrored"
    );
    Ok(())
}

/// Deletes descriptor then secret; already gone counts as deleted.
async fn remove_pair<C: ClusterApi + ?Sized>(api: &C, pair: &LinkPair) -> Vec<KuflexBackendError> {
    let mut failures = Vec::new();

    for result in [
        api.delete_cluster(&ObjectKey::cluster_scoped(&pair.key.name)).await,
        api.delete_secret(&pair.key).await,
    ] {
        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => tracing::debug!("{e}, nothing to delete"),
            Err(e) => {
                tracing::error!("{e}");
                failures.push(e);
            }
        }
    }

    if failures.is_empty() {
        tracing::info!(cluster = %api.label(), key = %pair.key, "link pair removed");
    }
    failures
}

/// Links `active` (namespace `active_ns`) and `passive` (namespace
/// `passive_ns`) by copying each side's link pair onto the other.
///
/// Nothing is created unless both pairs could be fetched. All four creates
/// are attempted; the first failure is returned.
pub async fn attach<C: ClusterApi + ?Sized>(
    active: &C,
    passive: &C,
    active_ns: &str,
    passive_ns: &str,
    config: &MirrorConfig,
) -> Result<()> {
    tracing::info!(active = %active.label(), passive = %passive.label(), "attach started");

    let active_key = ObjectKey::new(active_ns, config.name_for(Role::Active));
    let passive_key = ObjectKey::new(passive_ns, config.name_for(Role::Passive));

    let (active_pair, passive_pair) = futures::join!(
        fetch_link_pair(active, 0, &active_key, config),
        fetch_link_pair(passive, 1, &passive_key, config),
    );
    let active_pair = active_pair?;
    let passive_pair = passive_pair?;

    let mut failures = Vec::new();
    if let Err(e) = mirror_onto(passive, passive_ns, &active_pair).await {
        tracing::error!("mirroring {} onto {} failed: {e}", active_pair.key, passive.label());
        failures.push(e);
    }
    if let Err(e) = mirror_onto(active, active_ns, &passive_pair).await {
        tracing::error!("mirroring {} onto {} failed: {e}", passive_pair.key, active.label());
        failures.push(e);
    }

    match failures.into_iter().next() {
        Some(e) => Err(e),
        None => {
            tracing::info!("attach completed");
            Ok(())
        }
    }
}

/// Undoes [`attach`]: on each cluster, the pair named after the peer's role
/// is a mirrored copy and gets deleted; the cluster's own pair stays.
///
/// A pair that never shows up is skipped. Any other read error is kept like
/// a failed delete: every pair is still attempted and the first failure is
/// returned.
pub async fn detach<C: ClusterApi + ?Sized>(
    active: &C,
    passive: &C,
    active_ns: &str,
    passive_ns: &str,
    config: &MirrorConfig,
) -> Result<()> {
    tracing::info!(active = %active.label(), passive = %passive.label(), "detach started");

    let mut failures = Vec::new();
    for (index, api, namespace) in [(0, active, active_ns), (1, passive, passive_ns)] {
        let own_role = Role::of_index(index);

        for role in [Role::Active, Role::Passive] {
            let key = ObjectKey::new(namespace, config.name_for(role));

            let pair = match fetch_link_pair(api, index, &key, config).await {
                Ok(pair) => pair,
                Err(e @ (KuflexBackendError::LinkPairTimeout { .. } | KuflexBackendError::NotFound { .. })) => {
                    tracing::info!("{key} is not here on {}: {e}", api.label());
                    continue;
                }
                Err(e) => {
                    tracing::error!("reading {key} on {} failed: {e}", api.label());
                    failures.push(e);
                    continue;
                }
            };

            if role == own_role {
                tracing::debug!(cluster = %api.label(), key = %key, "keeping own link pair");
                continue;
            }

            failures.extend(remove_pair(api, &pair).await);
        }
    }

    match failures.into_iter().next() {
        Some(e) => Err(e),
        None => {
            tracing::info!("detach completed");
            Ok(())
        }
    }
}
