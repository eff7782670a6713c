use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use kite_control_plane_core::{Error, UserProfile, ALL_NAMESPACES, WILDCARD};
use kite_control_plane_k8s::ClusterSummary;
use serde::Deserialize;

use crate::{ApiResult, AppState};

/// GET /api/v1/clusters: clusters visible to the user, ordered by name.
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> Json<Vec<ClusterSummary>> {
    let authz = state.authz.clone();
    Json(
        state
            .clusters
            .list_visible(|name| authz.can_access_cluster(&user, name)),
    )
}

/// POST /api/v1/clusters/import: imports every context of a kubeconfig
/// blob; the body is the raw blob.
pub async fn import(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .authz
        .check_access(&user, "create", "clusters", WILDCARD, ALL_NAMESPACES)?;
    let created = state.clusters.import_kubeconfig(&body).await?;
    Ok(Json(serde_json::json!({ "created": created })))
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    query: String,
}

/// GET /api/v1/{cluster}/metrics: passthrough to the cluster's metrics
/// backend, when one is attached.
pub async fn metrics(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(cluster): Path<String>,
    Query(params): Query<MetricsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let bundle = state.clusters.get(&cluster)?;
    state
        .authz
        .check_access(&user, "get", "metrics", bundle.name(), ALL_NAMESPACES)?;
    let metrics = bundle
        .metrics()
        .ok_or_else(|| Error::not_found(format!("metrics endpoint for {:?}", bundle.name())))?;
    Ok(Json(metrics.query(&params.query).await?))
}
