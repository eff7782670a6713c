use kite_control_plane_core::{ClusterRecord, Error, Result, Secret};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

/// The live, process-resident counterpart of a [`ClusterRecord`].
///
/// A bundle is immutable once published: drift in the record it was built
/// from causes the lifecycle manager to build a replacement and dispose
/// this one. Streaming sessions derive child cancellation tokens from the
/// bundle so disposal stops their background work within bounded time.
pub struct ClientBundle {
    name: String,
    version: String,
    client: Client,
    metrics: Option<MetricsClient>,

    // The inputs the bundle was built from, kept for drift detection.
    credential: Secret,
    metrics_endpoint: Option<String>,

    probe_ok: bool,
    shutdown: CancellationToken,
}

impl ClientBundle {
    /// Builds a bundle from a cluster record: clients first, then a
    /// `ServerVersion` probe and the optional metrics client, both of
    /// which are non-fatal on failure.
    pub(crate) async fn build(record: &ClusterRecord) -> Result<Self> {
        let config = if record.in_cluster {
            Config::incluster()
                .map_err(|e| Error::Upstream(anyhow::anyhow!("in-cluster config: {e}")))?
        } else {
            let kubeconfig = Kubeconfig::from_yaml(record.credential.expose())
                .map_err(|e| Error::bad_input(format!("kubeconfig for {:?}: {e}", record.name)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::bad_input(format!("kubeconfig for {:?}: {e}", record.name)))?
        };
        let client = Client::try_from(config)
            .map_err(|e| Error::Upstream(anyhow::anyhow!("build client: {e}")))?;

        let (version, probe_ok) = match client.apiserver_version().await {
            Ok(version) => (version.git_version, true),
            Err(error) => {
                warn!(cluster = %record.name, %error, "server version probe failed");
                (String::new(), false)
            }
        };

        let metrics = match &record.metrics_endpoint {
            Some(endpoint) if !endpoint.is_empty() => match MetricsClient::new(endpoint) {
                Ok(metrics) => Some(metrics),
                Err(error) => {
                    warn!(cluster = %record.name, %error, "metrics client unavailable");
                    None
                }
            },
            _ => None,
        };

        info!(cluster = %record.name, %version, "built client bundle");
        Ok(Self {
            name: record.name.clone(),
            version,
            client,
            metrics,
            credential: record.credential.clone(),
            metrics_endpoint: record.metrics_endpoint.clone(),
            probe_ok,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Discovered server version; empty when the probe has not succeeded.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn metrics(&self) -> Option<&MetricsClient> {
        self.metrics.as_ref()
    }

    /// Whether the initial `ServerVersion` probe succeeded.
    pub fn usable(&self) -> bool {
        self.probe_ok
    }

    pub(crate) fn credential(&self) -> &Secret {
        &self.credential
    }

    pub(crate) fn metrics_endpoint(&self) -> Option<&str> {
        self.metrics_endpoint.as_deref()
    }

    /// Token cancelled when the bundle is disposed. Streaming sessions tie
    /// their lifetime to a child of this token.
    pub fn cancelled_on_dispose(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Stops all background work scoped to this bundle.
    pub(crate) fn dispose(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ClientBundle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ClientBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBundle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("probe_ok", &self.probe_ok)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Thin query client for a cluster's metrics backend.
#[derive(Clone, Debug)]
pub struct MetricsClient {
    base: Url,
    http: reqwest::Client,
}

impl MetricsClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let base = Url::parse(endpoint)
            .map_err(|e| Error::bad_input(format!("metrics endpoint {endpoint:?}: {e}")))?;
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    /// Runs an instant query against the backend's query API.
    pub async fn query(&self, query: &str) -> Result<serde_json::Value> {
        let mut url = self
            .base
            .join("api/v1/query")
            .map_err(|e| Error::Upstream(anyhow::anyhow!("metrics url: {e}")))?;
        url.query_pairs_mut().append_pair("query", query);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Upstream(anyhow::anyhow!("metrics query: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| Error::Upstream(anyhow::anyhow!("metrics response: {e}")))
    }
}
