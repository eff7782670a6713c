use std::sync::Arc;

use kite_control_plane_core::{
    Error, Repository, Result, UserProfile, ALL_NAMESPACES,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::Snapshot;

/// Read side of the role catalog: access checks against the published
/// snapshot plus a coalescing refresh signal. Cheap to clone.
#[derive(Clone, Debug)]
pub struct AuthzEngine {
    snapshot: watch::Receiver<Arc<Snapshot>>,
    refresh: mpsc::Sender<()>,
}

/// Single-writer task that reloads roles and bindings from the repository
/// and publishes fresh snapshots.
pub struct CatalogRefresher {
    repo: Arc<dyn Repository>,
    tx: watch::Sender<Arc<Snapshot>>,
    rx: mpsc::Receiver<()>,
}

/// Builds the engine/refresher pair. The refresher must be spawned; until
/// its first reload completes, checks run against an empty snapshot and
/// deny everything.
pub fn catalog(repo: Arc<dyn Repository>) -> (AuthzEngine, CatalogRefresher) {
    let (tx, snapshot) = watch::channel(Arc::new(Snapshot::default()));
    // One-slot signal: bursts of refresh requests collapse into at most one
    // extra reload after the current one completes.
    let (refresh, rx) = mpsc::channel(1);
    (
        AuthzEngine { snapshot, refresh },
        CatalogRefresher { repo, tx, rx },
    )
}

// === impl AuthzEngine ===

impl AuthzEngine {
    /// Current published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn can_access(
        &self,
        user: &UserProfile,
        verb: &str,
        resource: &str,
        cluster: &str,
        namespace: &str,
    ) -> bool {
        self.snapshot()
            .roles_for(user)
            .iter()
            .any(|role| role.allows(verb, resource, cluster, namespace))
    }

    pub fn can_access_cluster(&self, user: &UserProfile, cluster: &str) -> bool {
        self.snapshot()
            .roles_for(user)
            .iter()
            .any(|role| role.allows_cluster(cluster))
    }

    pub fn can_access_namespace(&self, user: &UserProfile, cluster: &str, namespace: &str) -> bool {
        self.snapshot()
            .roles_for(user)
            .iter()
            .any(|role| role.allows_namespace(cluster, namespace))
    }

    /// Like [`Self::can_access`] but produces the deny diagnostic.
    pub fn check_access(
        &self,
        user: &UserProfile,
        verb: &str,
        resource: &str,
        cluster: &str,
        namespace: &str,
    ) -> Result<()> {
        if self.can_access(user, verb, resource, cluster, namespace) {
            return Ok(());
        }
        let namespace = if namespace == ALL_NAMESPACES {
            "All"
        } else {
            namespace
        };
        Err(Error::Forbidden(format!(
            "user {} does not have permission to {verb} {resource} in namespace {namespace} on cluster {cluster}",
            user.key(),
        )))
    }

    /// Requests a catalog reload. Signals beyond the one already pending
    /// are dropped, not queued.
    pub fn poke(&self) {
        let _ = self.refresh.try_send(());
    }
}

// === impl CatalogRefresher ===

impl CatalogRefresher {
    /// Loads the catalog once, then reloads on every coalescing signal.
    /// Never returns under normal operation.
    pub async fn run(mut self) {
        self.reload().await;
        while self.rx.recv().await.is_some() {
            self.reload().await;
        }
    }

    /// One reload; failures leave the previous snapshot published and are
    /// retried on the next signal.
    pub async fn reload(&self) {
        let roles = match self.repo.list_roles().await {
            Ok(roles) => roles,
            Err(error) => {
                warn!(%error, "failed to load roles; keeping previous snapshot");
                return;
            }
        };
        let bindings = match self.repo.list_bindings().await {
            Ok(bindings) => bindings,
            Err(error) => {
                warn!(%error, "failed to load bindings; keeping previous snapshot");
                return;
            }
        };
        debug!(roles = roles.len(), bindings = bindings.len(), "publishing catalog snapshot");
        self.tx.send_replace(Arc::new(Snapshot::build(roles, bindings)));
    }
}
