use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kite_control_plane_core::{ClusterRecord, Error, Repository, Result};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{import, ClientBundle};

const RECONCILE_PERIOD: Duration = Duration::from_secs(60);

/// Entry returned by [`ClusterManager::list_visible`].
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub version: String,
    pub is_default: bool,
}

/// Owns the live `name → ClientBundle` map.
///
/// Only the reconciliation task mutates the map; request paths resolve
/// bundles through a read lock and clone the `Arc`, so a rebuilt entry
/// never disturbs readers that captured the prior bundle.
pub struct ClusterManager {
    repo: Arc<dyn Repository>,
    active: RwLock<HashMap<String, Arc<ClientBundle>>>,
    default_name: RwLock<Option<String>>,
    signal: mpsc::Sender<()>,
}

/// Single task driving the manager: wakes on the 60 s timer or on the
/// coalescing signal.
pub struct Reconciler {
    manager: Arc<ClusterManager>,
    rx: mpsc::Receiver<()>,
}

/// Builds the manager/reconciler pair; the reconciler must be spawned.
pub fn manager(repo: Arc<dyn Repository>) -> (Arc<ClusterManager>, Reconciler) {
    let (signal, rx) = mpsc::channel(1);
    let manager = Arc::new(ClusterManager {
        repo,
        active: RwLock::new(HashMap::new()),
        default_name: RwLock::new(None),
        signal,
    });
    let reconciler = Reconciler {
        manager: manager.clone(),
        rx,
    };
    (manager, reconciler)
}

// === impl ClusterManager ===

impl ClusterManager {
    /// Resolves a bundle by name. The empty name selects the default
    /// cluster, falling back to any bundle when no default is set.
    pub fn get(&self, name: &str) -> Result<Arc<ClientBundle>> {
        let active = self.active.read();
        if name.is_empty() {
            if let Some(default) = self.default_name.read().as_deref() {
                if let Some(bundle) = active.get(default) {
                    return Ok(bundle.clone());
                }
            }
            return active
                .values()
                .next()
                .cloned()
                .ok_or_else(|| Error::not_found("cluster".to_string()));
        }
        active
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("cluster {name:?}")))
    }

    /// Active clusters the caller-supplied predicate admits, ordered by
    /// name. The server composes the predicate from the authorization
    /// engine's cluster check.
    pub fn list_visible(&self, allow: impl Fn(&str) -> bool) -> Vec<ClusterSummary> {
        let default_name = self.default_name.read().clone();
        let mut summaries: Vec<ClusterSummary> = self
            .active
            .read()
            .values()
            .filter(|bundle| allow(bundle.name()))
            .map(|bundle| ClusterSummary {
                name: bundle.name().to_string(),
                version: bundle.version().to_string(),
                is_default: Some(bundle.name()) == default_name.as_deref(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Requests an immediate reconciliation. Signals while one is already
    /// pending are dropped, not queued.
    pub fn poke(&self) {
        let _ = self.signal.try_send(());
    }

    /// Imports every context of a multi-context kubeconfig and schedules a
    /// reconciliation for the created records.
    pub async fn import_kubeconfig(&self, blob: &str) -> Result<usize> {
        let created = import::import_kubeconfig(self.repo.as_ref(), blob).await?;
        if created > 0 {
            self.poke();
        }
        Ok(created)
    }

    /// One reconciliation pass: converge `active` on the enabled records.
    pub async fn reconcile(&self) -> Result<()> {
        let records = self.repo.list_clusters().await?;
        let desired: Vec<&ClusterRecord> = records.iter().filter(|r| r.enabled).collect();

        let mut default_name = None;
        for record in &desired {
            if record.is_default {
                default_name = Some(record.name.clone());
            }

            let current = self.active.read().get(&record.name).cloned();
            if let Some(current) = &current {
                if !self.should_rebuild(current, record).await {
                    continue;
                }
            }

            if let Some(old) = self.active.write().remove(&record.name) {
                debug!(cluster = %record.name, "disposing stale bundle");
                old.dispose();
            }
            match ClientBundle::build(record).await {
                Ok(bundle) => {
                    self.active
                        .write()
                        .insert(record.name.clone(), Arc::new(bundle));
                }
                Err(error) => {
                    warn!(cluster = %record.name, %error, "failed to build client bundle");
                }
            }
        }

        let desired_names: HashSet<&str> = desired.iter().map(|r| r.name.as_str()).collect();
        let stale: Vec<String> = self
            .active
            .read()
            .keys()
            .filter(|name| !desired_names.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            if let Some(old) = self.active.write().remove(&name) {
                info!(cluster = %name, "removing bundle for deleted or disabled record");
                old.dispose();
            }
        }

        *self.default_name.write() = default_name;
        Ok(())
    }

    async fn should_rebuild(&self, current: &ClientBundle, record: &ClusterRecord) -> bool {
        if !record.in_cluster && current.credential() != &record.credential {
            debug!(cluster = %record.name, "credential drift");
            return true;
        }
        if current.metrics_endpoint() != record.metrics_endpoint.as_deref() {
            debug!(cluster = %record.name, "metrics endpoint drift");
            return true;
        }
        if !current.usable() {
            return true;
        }
        match current.client().apiserver_version().await {
            Ok(version) => version.git_version != current.version(),
            Err(error) => {
                debug!(cluster = %record.name, %error, "server version probe failed");
                true
            }
        }
    }

    /// Disposes every bundle; used on graceful shutdown.
    pub fn dispose_all(&self) {
        for (_, bundle) in self.active.write().drain() {
            bundle.dispose();
        }
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("active", &self.active.read().len())
            .field("default_name", &*self.default_name.read())
            .finish_non_exhaustive()
    }
}

// === impl Reconciler ===

impl Reconciler {
    /// Runs until the signal sender side is dropped.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(RECONCILE_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                signal = self.rx.recv() => {
                    if signal.is_none() {
                        return;
                    }
                }
            }
            // Repository failures leave `active` untouched; the next tick
            // retries.
            if let Err(error) = self.manager.reconcile().await {
                warn!(%error, "cluster reconciliation failed");
            }
        }
    }
}
