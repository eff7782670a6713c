//! WebSocket endpoints for streaming sessions, plus the port-forward
//! management surface.
//!
//! Each upgrade resolves the target bundle, runs the access check, and
//! then pumps the socket into a [`SessionIo`] pair for the substrate:
//! outbound envelopes serialize onto the socket, inbound text frames parse
//! back into envelopes, and a dropped socket closes the session's inbound
//! channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use futures::{SinkExt, StreamExt};
use kite_control_plane_core::{Error, UserProfile, ALL_NAMESPACES, WILDCARD};
use kite_control_plane_stream::logs::LogOptions;
use kite_control_plane_stream::terminal::TerminalTarget;
use kite_control_plane_stream::{logs, node, terminal, PortForwardSession, SessionIo};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::{ApiResult, AppState};

const DEFAULT_SHELL: &str = "command -v bash >/dev/null 2>&1 && exec bash || exec sh";

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    cluster: String,
    container: Option<String>,
    tail_lines: Option<i64>,
    #[serde(default)]
    timestamps: bool,
    #[serde(default)]
    previous: bool,
    since_seconds: Option<i64>,
    label_selector: Option<String>,
}

/// GET /api/v1/logs/{namespace}/{pod}: log fan-in session. A `_all` pod
/// name with a label selector enumerates pods.
pub async fn logs(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let bundle = state.clusters.get(&query.cluster)?;
    state
        .authz
        .check_access(&user, "log", "pods", bundle.name(), &namespace)?;

    let client = bundle.client();
    let cancel = bundle.cancelled_on_dispose();
    let opts = LogOptions {
        container: query.container,
        follow: true,
        timestamps: query.timestamps,
        tail_lines: query.tail_lines,
        previous: query.previous,
        since_seconds: query.since_seconds,
        label_selector: query.label_selector,
    };

    Ok(ws.on_upgrade(move |socket| async move {
        serve_session(socket, |io| logs::run(client, cancel, &namespace, &pod, opts, io)).await;
    }))
}

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    #[serde(default)]
    cluster: String,
    container: Option<String>,
}

/// GET /api/v1/terminal/{namespace}/{pod}/ws: interactive exec session.
pub async fn terminal(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let bundle = state.clusters.get(&query.cluster)?;
    state
        .authz
        .check_access(&user, "exec", "pods", bundle.name(), &namespace)?;

    let client = bundle.client();
    let cancel = bundle.cancelled_on_dispose();
    let target = TerminalTarget {
        namespace,
        pod,
        container: query.container,
    };
    let command = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        DEFAULT_SHELL.to_string(),
    ];

    Ok(ws.on_upgrade(move |socket| async move {
        serve_session(socket, |io| terminal::exec(client, cancel, target, command, io)).await;
    }))
}

#[derive(Debug, Deserialize)]
pub struct NodeTerminalQuery {
    #[serde(default)]
    cluster: String,
}

/// GET /api/v1/node-terminal/{node}/ws: bootstrap-then-attach session.
pub async fn node_terminal(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(node_name): Path<String>,
    Query(query): Query<NodeTerminalQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let bundle = state.clusters.get(&query.cluster)?;
    state
        .authz
        .check_access(&user, "exec", "nodes", bundle.name(), ALL_NAMESPACES)?;

    let client = bundle.client();
    let cancel = bundle.cancelled_on_dispose();
    let image = state.options.node_terminal_image.clone();

    Ok(ws.on_upgrade(move |socket| async move {
        serve_session(socket, |io| node::run(client, cancel, &node_name, &image, io)).await;
    }))
}

/// Adapts one WebSocket onto a [`SessionIo`] pair and runs the session.
async fn serve_session<F, Fut>(socket: WebSocket, run: F)
where
    F: FnOnce(SessionIo) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let (io, client_tx, mut client_rx) = SessionIo::channel();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = client_rx.recv().await {
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str(text.as_str()) {
                    Ok(envelope) => {
                        if client_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => debug!(%error, "ignoring malformed client frame"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        // Dropping the sender closes the session's inbound channel, which
        // the substrate treats as a client disconnect.
    });

    run(io).await;
    reader.abort();
    let _ = writer.await;
}

#[derive(Debug, Deserialize)]
pub struct StartForward {
    #[serde(default)]
    cluster: String,
    namespace: String,
    pod: String,
    #[serde(default)]
    local_port: u16,
    remote_port: u16,
}

/// POST /api/v1/portforwards
pub async fn start_forward(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Json(body): Json<StartForward>,
) -> ApiResult<Json<PortForwardSession>> {
    let bundle = state.clusters.get(&body.cluster)?;
    state.authz.check_access(
        &user,
        "create",
        "portforwards",
        bundle.name(),
        &body.namespace,
    )?;

    let session = state
        .forwards
        .start(
            bundle.client(),
            &body.namespace,
            &body.pod,
            body.local_port,
            body.remote_port,
        )
        .await?;
    Ok(Json(session))
}

/// GET /api/v1/portforwards
pub async fn list_forwards(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
) -> ApiResult<Json<Vec<PortForwardSession>>> {
    state
        .authz
        .check_access(&user, "get", "portforwards", WILDCARD, ALL_NAMESPACES)?;
    Ok(Json(state.forwards.list()))
}

/// GET /api/v1/portforwards/{id}
pub async fn get_forward(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PortForwardSession>> {
    state
        .authz
        .check_access(&user, "get", "portforwards", WILDCARD, ALL_NAMESPACES)?;
    let session = state
        .forwards
        .get(&id)
        .ok_or_else(|| Error::not_found(format!("port-forward {id}")))?;
    Ok(Json(session))
}

/// DELETE /api/v1/portforwards/{id}: idempotent stop.
pub async fn stop_forward(
    State(state): State<AppState>,
    Extension(user): Extension<UserProfile>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .authz
        .check_access(&user, "delete", "portforwards", WILDCARD, ALL_NAMESPACES)?;
    state.forwards.stop(&id);
    Ok(Json(serde_json::json!({ "stopped": id })))
}
