//! Dynamic resource proxy.
//!
//! A discovery-resolved CRUD passthrough covering any resource the target
//! cluster serves, parameterized by the resource's plural name. Typed
//! per-resource handlers with extra capabilities (scale, cordon, metrics
//! enrichment) layer on top of this in the UI-facing API and are out of
//! scope here.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use kite_control_plane_core::{Error, UserProfile, ALL_NAMESPACES};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use serde::Deserialize;

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    label_selector: Option<String>,
}

/// GET /api/v1/{cluster}/resources/{resource}
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, resource)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let namespace = query.namespace.as_deref().unwrap_or(ALL_NAMESPACES);
    let api = resolve(&state, &user, "get", &cluster, &resource, namespace).await?;

    let mut params = ListParams::default();
    if let Some(selector) = &query.label_selector {
        params = params.labels(selector);
    }
    let objects = api.list(&params).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::to_value(objects).map_err(to_bad_output)?))
}

/// POST /api/v1/{cluster}/resources/{resource}
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, resource)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
    Json(object): Json<DynamicObject>,
) -> ApiResult<Json<serde_json::Value>> {
    let namespace = object
        .metadata
        .namespace
        .clone()
        .or(query.namespace.clone())
        .unwrap_or_else(|| ALL_NAMESPACES.to_string());
    let api = resolve(&state, &user, "create", &cluster, &resource, &namespace).await?;

    let created = api
        .create(&PostParams::default(), &object)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::to_value(created).map_err(to_bad_output)?))
}

/// GET /api/v1/{cluster}/resources/{resource}/{namespace}/{name}
pub async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, resource, namespace, name)): Path<(String, String, String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let api = resolve(&state, &user, "get", &cluster, &resource, &namespace).await?;
    let object = api.get(&name).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::to_value(object).map_err(to_bad_output)?))
}

/// PUT /api/v1/{cluster}/resources/{resource}/{namespace}/{name}
pub async fn replace(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, resource, namespace, name)): Path<(String, String, String, String)>,
    Json(object): Json<DynamicObject>,
) -> ApiResult<Json<serde_json::Value>> {
    let api = resolve(&state, &user, "update", &cluster, &resource, &namespace).await?;
    let replaced = api
        .replace(&name, &PostParams::default(), &object)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::to_value(replaced).map_err(to_bad_output)?))
}

/// DELETE /api/v1/{cluster}/resources/{resource}/{namespace}/{name}
pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((cluster, resource, namespace, name)): Path<(String, String, String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let api = resolve(&state, &user, "delete", &cluster, &resource, &namespace).await?;
    let _ = api
        .delete(&name, &DeleteParams::default())
        .await
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "deleted": name })))
}

/// Access check plus a discovery-resolved dynamic API handle.
async fn resolve(
    state: &AppState,
    user: &UserProfile,
    verb: &str,
    cluster: &str,
    resource: &str,
    namespace: &str,
) -> ApiResult<Api<DynamicObject>> {
    let bundle = state.clusters.get(cluster)?;
    state
        .authz
        .check_access(user, verb, resource, bundle.name(), namespace)?;

    let client = bundle.client();
    let (api_resource, capabilities) = discover(&client, resource).await?;

    let api = if matches!(capabilities.scope, Scope::Cluster) || namespace == ALL_NAMESPACES {
        Api::all_with(client, &api_resource)
    } else {
        Api::namespaced_with(client, namespace, &api_resource)
    };
    Ok(api)
}

async fn discover(
    client: &kube::Client,
    resource: &str,
) -> ApiResult<(ApiResource, ApiCapabilities)> {
    let discovery = Discovery::new(client.clone())
        .run()
        .await
        .map_err(ApiError::from)?;
    for group in discovery.groups() {
        for (api_resource, capabilities) in group.recommended_resources() {
            if api_resource.plural == resource {
                return Ok((api_resource, capabilities));
            }
        }
    }
    Err(Error::not_found(format!("resource kind {resource:?}")).into())
}

fn to_bad_output(error: serde_json::Error) -> ApiError {
    ApiError(Error::Upstream(anyhow::anyhow!("serialize response: {error}")))
}
