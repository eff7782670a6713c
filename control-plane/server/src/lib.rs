//! HTTP surface of the Kite control plane.
//!
//! An axum router in front of the authorization engine, the cluster
//! lifecycle manager, and the streaming substrate. Every `/api/v1` request
//! passes the session middleware (validation plus sliding refresh) and an
//! access check before it reaches a cluster client.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod auth;
mod clusters;
mod cookie;
mod error;
mod middleware;
mod resources;
mod webhook;
mod ws;

#[cfg(test)]
mod tests;

pub use self::error::{ApiError, ApiResult};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Router};
use futures::FutureExt;
use kite_control_plane_authz::{AuthzEngine, OidcClient, SessionManager};
use kite_control_plane_core::Repository;
use kite_control_plane_k8s::ClusterManager;
use kite_control_plane_stream::PortForwardManager;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Behavior toggles resolved from the CLI.
#[derive(Debug)]
pub struct ServerOptions {
    pub readonly: bool,
    pub providers_enabled: bool,
    pub password_login_enabled: bool,
    pub analytics_enabled: bool,
    pub node_terminal_image: String,
    pub webhook_user: Option<String>,
    pub webhook_password: Option<String>,
    pub session_ttl_secs: i64,
}

/// Shared handler state; every collaborator is passed in explicitly from
/// the composition root.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub authz: AuthzEngine,
    pub sessions: Arc<SessionManager>,
    pub clusters: Arc<ClusterManager>,
    pub forwards: Arc<PortForwardManager>,
    pub oidc: OidcClient,
    pub options: Arc<ServerOptions>,
}

pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/api/auth/providers", get(auth::providers))
        .route("/api/auth/login", get(auth::login))
        .route("/api/auth/callback", get(auth::callback))
        .route("/api/auth/login/password", post(auth::password_login))
        .route("/api/auth/logout", post(auth::logout))
        .route(
            "/api/auth/refresh",
            post(auth::refresh).route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                middleware::require_session,
            )),
        )
        .route(
            "/api/auth/user",
            get(auth::user).route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                middleware::require_session,
            )),
        );

    let api_routes = Router::new()
        .route("/api/v1/clusters", get(clusters::list))
        .route("/api/v1/clusters/import", post(clusters::import))
        .route("/api/v1/logs/{namespace}/{pod}", get(ws::logs))
        .route("/api/v1/terminal/{namespace}/{pod}/ws", get(ws::terminal))
        .route("/api/v1/node-terminal/{node}/ws", get(ws::node_terminal))
        .route(
            "/api/v1/portforwards",
            get(ws::list_forwards).post(ws::start_forward),
        )
        .route(
            "/api/v1/portforwards/{id}",
            get(ws::get_forward).delete(ws::stop_forward),
        )
        .route("/api/v1/{cluster}/metrics", get(clusters::metrics))
        .route(
            "/api/v1/{cluster}/resources/{resource}",
            get(resources::list).post(resources::create),
        )
        .route(
            "/api/v1/{cluster}/resources/{resource}/{namespace}/{name}",
            get(resources::get_one)
                .put(resources::replace)
                .delete(resources::remove),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::readonly_guard,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_session,
        ));

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/webhook/clusters/sync", post(webhook::sync_clusters))
        .merge(auth_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until the drain signal fires, then finishes in-flight requests.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: drain::Watch,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "control plane listening");

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    let app = router(state);
    tokio::pin! {
        let srv = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(close_rx.map(|_| ()))
                .await
        };
    }

    tokio::select! {
        res = (&mut srv) => res?,
        handle = shutdown.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?;
        }
    }
    Ok(())
}

async fn healthz() -> &'static str {
    "ok\n"
}

const ANALYTICS_SNIPPET: &str =
    r#"<script defer data-domain="kite" src="/static/analytics.js"></script>"#;

/// Index page; carries the analytics snippet when enabled.
async fn index(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::response::Html<String> {
    let snippet = if state.options.analytics_enabled {
        ANALYTICS_SNIPPET
    } else {
        ""
    };
    axum::response::Html(format!(
        "<!doctype html><html><head><title>kite</title>{snippet}</head>\
         <body><div id=\"root\"></div></body></html>"
    ))
}
