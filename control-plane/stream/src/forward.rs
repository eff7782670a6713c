//! Port-forward sessions.
//!
//! Process-global registry of active forwards keyed by a generated UUID.
//! Each session runs one accept loop bridging local TCP connections
//! through the pod's `portforward` subresource until its stop signal
//! fires. `stop` is idempotent and removes the entry.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;
use kite_control_plane_core::{Error, Result};
use kube::api::Api;
use kube::Client;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PortPair {
    pub local: u16,
    pub remote: u16,
}

#[derive(Clone, Debug, Serialize)]
pub struct PortForwardSession {
    pub id: Uuid,
    pub namespace: String,
    pub pod: String,
    pub ports: Vec<PortPair>,
    #[serde(skip_serializing)]
    stop: CancellationToken,
}

#[derive(Debug, Default)]
pub struct PortForwardManager {
    sessions: Mutex<HashMap<Uuid, PortForwardSession>>,
}

// === impl PortForwardManager ===

impl PortForwardManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the local listener, registers the session, and spawns its
    /// forwarding loop.
    pub async fn start(
        &self,
        client: Client,
        namespace: &str,
        pod: &str,
        local: u16,
        remote: u16,
    ) -> Result<PortForwardSession> {
        let listener = TcpListener::bind(("127.0.0.1", local))
            .await
            .map_err(|e| Error::bad_input(format!("bind port {local}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::Upstream(anyhow::anyhow!("listener address: {e}")))?
            .port();

        let session = self.register(namespace, pod, vec![PortPair { local, remote }]);
        let pods: Api<Pod> = Api::namespaced(client, namespace);
        tokio::spawn(forward_loop(
            listener,
            pods,
            pod.to_string(),
            remote,
            session.stop.clone(),
        ));
        info!(%session.id, %namespace, %pod, local, remote, "port-forward started");
        Ok(session)
    }

    /// Registers a session without spawning its loop.
    pub(crate) fn register(
        &self,
        namespace: &str,
        pod: &str,
        ports: Vec<PortPair>,
    ) -> PortForwardSession {
        let session = PortForwardSession {
            id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            ports,
            stop: CancellationToken::new(),
        };
        self.sessions.lock().insert(session.id, session.clone());
        session
    }

    pub fn get(&self, id: &Uuid) -> Option<PortForwardSession> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<PortForwardSession> {
        let mut sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Closes the session's stop signal and removes the entry. Stopping an
    /// unknown or already-stopped session is a no-op.
    pub fn stop(&self, id: &Uuid) {
        if let Some(session) = self.sessions.lock().remove(id) {
            session.stop.cancel();
        }
    }

    /// Stops every session; used on graceful shutdown.
    pub fn stop_all(&self) {
        for (_, session) in self.sessions.lock().drain() {
            session.stop.cancel();
        }
    }
}

/// Accepts local connections until the stop signal fires; each connection
/// gets its own upstream forwarding stream.
async fn forward_loop(
    listener: TcpListener,
    pods: Api<Pod>,
    pod: String,
    remote: u16,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                debug!(%pod, remote, "port-forward loop stopped");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((conn, peer)) => {
                    debug!(%pod, remote, %peer, "forwarding connection");
                    tokio::spawn(forward_conn(
                        pods.clone(),
                        pod.clone(),
                        remote,
                        conn,
                        stop.clone(),
                    ));
                }
                Err(error) => {
                    warn!(%pod, remote, %error, "port-forward accept failed");
                    return;
                }
            }
        }
    }
}

async fn forward_conn(
    pods: Api<Pod>,
    pod: String,
    remote: u16,
    mut conn: TcpStream,
    stop: CancellationToken,
) {
    let mut forwarder = match pods.portforward(&pod, &[remote]).await {
        Ok(forwarder) => forwarder,
        Err(error) => {
            warn!(%pod, remote, %error, "portforward subresource failed");
            return;
        }
    };
    let Some(mut upstream) = forwarder.take_stream(remote) else {
        warn!(%pod, remote, "portforward stream unavailable");
        return;
    };

    tokio::select! {
        _ = stop.cancelled() => {}
        result = tokio::io::copy_bidirectional(&mut conn, &mut upstream) => {
            if let Err(error) = result {
                debug!(%pod, remote, %error, "port-forward connection ended");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_get_list_stop() {
        let manager = PortForwardManager::new();
        let a = manager.register("default", "web-1", vec![PortPair { local: 8080, remote: 80 }]);
        let b = manager.register("default", "web-2", vec![PortPair { local: 8081, remote: 80 }]);

        assert_eq!(manager.list().len(), 2);
        assert_eq!(manager.get(&a.id).unwrap().pod, "web-1");

        manager.stop(&a.id);
        assert!(manager.get(&a.id).is_none());
        assert_eq!(manager.list().len(), 1);

        // Stopping twice, or stopping an unknown id, is a no-op.
        manager.stop(&a.id);
        manager.stop(&Uuid::new_v4());
        assert_eq!(manager.list().len(), 1);

        manager.stop_all();
        assert!(manager.list().is_empty());
        drop(b);
    }

    #[test]
    fn stop_fires_the_session_stop_signal() {
        let manager = PortForwardManager::new();
        let session = manager.register("default", "web-1", vec![PortPair { local: 0, remote: 80 }]);
        let stop = session.stop.clone();
        assert!(!stop.is_cancelled());
        manager.stop(&session.id);
        assert!(stop.is_cancelled());
    }
}
