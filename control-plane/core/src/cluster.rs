use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Secret;

/// The desired-state row for a cluster.
///
/// The live counterpart (`ClientBundle` in the k8s crate) is rebuilt by the
/// lifecycle manager whenever `credential` or `metrics_endpoint` drift from
/// the values a bundle was constructed with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: i64,

    /// Unique, stable cluster name.
    pub name: String,

    /// Kubeconfig blob; empty when `in_cluster` is set.
    #[serde(skip_serializing)]
    pub credential: Secret,

    /// Use the ambient service-account credential instead of `credential`.
    pub in_cluster: bool,

    /// At most one enabled record carries this.
    pub is_default: bool,

    pub enabled: bool,

    /// Optional URL of a metrics backend for this cluster.
    pub metrics_endpoint: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a cluster record.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewCluster {
    pub name: String,
    #[serde(default)]
    pub credential: Secret,
    #[serde(default)]
    pub in_cluster: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub metrics_endpoint: Option<String>,
}

fn default_enabled() -> bool {
    true
}
