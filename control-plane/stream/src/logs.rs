//! Multi-pod log fan-in.
//!
//! One reader task per target pod merges line-oriented log streams into a
//! single session. Lines within one pod preserve upstream order; lines
//! across pods interleave arbitrarily.

use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kite_control_plane_core::{Error, Result};
use kube::api::{Api, ListParams, LogParams};
use kube::{Client, ResourceExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Envelope, SessionIo};

/// Synthetic pod name selecting every pod matched by the label selector.
pub const ALL_PODS: &str = "_all";

#[derive(Clone, Debug)]
pub struct LogOptions {
    pub container: Option<String>,
    pub follow: bool,
    pub timestamps: bool,
    pub tail_lines: Option<i64>,
    pub previous: bool,
    pub since_seconds: Option<i64>,
    pub label_selector: Option<String>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            container: None,
            follow: true,
            timestamps: false,
            tail_lines: None,
            previous: false,
            since_seconds: None,
            label_selector: None,
        }
    }
}

/// Runs a log fan-in session until every reader finishes, the client
/// connection drops, or the session is cancelled.
pub async fn run(
    client: Client,
    cancel: CancellationToken,
    namespace: &str,
    pod_name: &str,
    opts: LogOptions,
    io: SessionIo,
) {
    let pods: Api<Pod> = Api::namespaced(client, namespace);

    let targets = match resolve_targets(&pods, pod_name, &opts).await {
        Ok(targets) => targets,
        Err(error) => {
            io.fail(error.to_string()).await;
            return;
        }
    };

    let SessionIo { outbound, inbound } = io;
    let multi = targets.len() > 1;
    let mut readers = JoinSet::new();
    for target in targets {
        readers.spawn(tail_pod(
            pods.clone(),
            target,
            opts.clone(),
            multi,
            outbound.clone(),
            cancel.clone(),
        ));
    }

    let mut heartbeat = tokio::spawn(heartbeat(inbound, outbound.clone(), cancel.clone()));

    tokio::select! {
        // All readers have emitted their close envelopes.
        _ = async { while readers.join_next().await.is_some() {} } => {}
        // The client connection dropped.
        _ = &mut heartbeat => {}
        _ = cancel.cancelled() => {
            let _ = outbound.send(Envelope::Close(String::new())).await;
        }
    }
    readers.shutdown().await;
    heartbeat.abort();
}

/// Expands the `_all` sentinel to the concrete pod list.
async fn resolve_targets(
    pods: &Api<Pod>,
    pod_name: &str,
    opts: &LogOptions,
) -> Result<Vec<String>> {
    if pod_name != ALL_PODS {
        return Ok(vec![pod_name.to_string()]);
    }

    let mut params = ListParams::default();
    if let Some(selector) = &opts.label_selector {
        params = params.labels(selector);
    }
    let list = pods
        .list(&params)
        .await
        .map_err(|e| Error::Upstream(anyhow::anyhow!("list pods: {e}")))?;
    let names: Vec<String> = list.items.iter().map(|p| p.name_any()).collect();
    if names.is_empty() {
        return Err(Error::bad_input("no pods found"));
    }
    Ok(names)
}

async fn tail_pod(
    pods: Api<Pod>,
    pod: String,
    opts: LogOptions,
    multi: bool,
    outbound: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) {
    let params = LogParams {
        container: opts.container.clone(),
        follow: opts.follow,
        previous: opts.previous,
        since_seconds: opts.since_seconds,
        tail_lines: opts.tail_lines,
        timestamps: opts.timestamps,
        ..LogParams::default()
    };

    let stream = tokio::select! {
        _ = cancel.cancelled() => return,
        result = pods.log_stream(&pod, &params) => match result {
            Ok(stream) => stream,
            Err(error) => {
                let _ = outbound
                    .send(Envelope::Error(format!("{pod}: {error}")))
                    .await;
                return;
            }
        }
    };

    let _ = outbound.send(Envelope::Connected(pod.clone())).await;

    let mut lines = Box::pin(stream.lines());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    if outbound
                        .send(Envelope::Log(format_line(&pod, &line, multi)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Some(Err(error)) => {
                    // Best effort: report and keep draining the stream.
                    debug!(%pod, %error, "log stream error");
                    let _ = outbound
                        .send(Envelope::Error(format!("{pod}: {error}")))
                        .await;
                }
                None => break,
            }
        }
    }
    let _ = outbound.send(Envelope::Close(pod)).await;
}

/// Answers client `ping`s; returns when the client side closes.
pub(crate) async fn heartbeat(
    mut inbound: mpsc::Receiver<Envelope>,
    outbound: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            message = inbound.recv() => match message {
                Some(Envelope::Ping) => {
                    if outbound.send(Envelope::Pong).await.is_err() {
                        return;
                    }
                }
                Some(_) => {}
                None => return,
            }
        }
    }
}

fn format_line(pod: &str, line: &str, multi: bool) -> String {
    if multi {
        format!("[{pod}]: {line}")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_prefixed_only_in_multi_pod_sessions() {
        assert_eq!(format_line("web-1", "starting", true), "[web-1]: starting");
        assert_eq!(format_line("web-1", "starting", false), "starting");
    }

    #[tokio::test]
    async fn heartbeat_answers_ping_with_pong() {
        let (client_tx, inbound) = mpsc::channel(4);
        let (outbound, mut client_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat(inbound, outbound, cancel));

        client_tx.send(Envelope::Ping).await.unwrap();
        assert_eq!(client_rx.recv().await, Some(Envelope::Pong));

        // Non-ping client frames are ignored.
        client_tx.send(Envelope::Stdin("x".to_string())).await.unwrap();
        client_tx.send(Envelope::Ping).await.unwrap();
        assert_eq!(client_rx.recv().await, Some(Envelope::Pong));

        // Dropping the client side ends the heartbeat.
        drop(client_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_stops_on_cancellation() {
        let (_client_tx, inbound) = mpsc::channel::<Envelope>(1);
        let (outbound, _client_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat(inbound, outbound, cancel.clone()));
        cancel.cancel();
        task.await.unwrap();
    }
}
