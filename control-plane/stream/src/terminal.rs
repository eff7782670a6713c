//! Interactive exec/attach terminals.
//!
//! The container side is a TTY stream opened through the pod's `exec` or
//! `attach` subresource; the client side is the session's envelope
//! channel. [`bridge`] pumps the two into each other until either end
//! closes or the session is cancelled.

use futures::SinkExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, AttachedProcess, TerminalSize};
use kube::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Envelope, SessionIo};

#[derive(Clone, Debug)]
pub struct TerminalTarget {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
}

/// Opens an exec stream with the supplied command and bridges it.
pub async fn exec(
    client: Client,
    cancel: CancellationToken,
    target: TerminalTarget,
    command: Vec<String>,
    io: SessionIo,
) {
    let pods: Api<Pod> = Api::namespaced(client, &target.namespace);
    match pods
        .exec(&target.pod, command, &attach_params(&target))
        .await
    {
        Ok(process) => bridge(process, cancel, io).await,
        Err(error) => io.fail(format!("exec {}: {error}", target.pod)).await,
    }
}

/// Identical to [`exec`] but over the `attach` subresource: no command,
/// the container's existing TTY.
pub async fn attach(
    client: Client,
    cancel: CancellationToken,
    target: TerminalTarget,
    io: SessionIo,
) {
    let pods: Api<Pod> = Api::namespaced(client, &target.namespace);
    match pods.attach(&target.pod, &attach_params(&target)).await {
        Ok(process) => bridge(process, cancel, io).await,
        Err(error) => io.fail(format!("attach {}: {error}", target.pod)).await,
    }
}

fn attach_params(target: &TerminalTarget) -> AttachParams {
    let params = AttachParams::interactive_tty();
    match &target.container {
        Some(container) => params.container(container),
        None => params,
    }
}

/// Bridges an attached TTY process and the client connection.
///
/// Client `stdin` envelopes feed the process; process output flows back as
/// `stdout` envelopes; `resize` envelopes forward as terminal size events.
pub(crate) async fn bridge(mut process: AttachedProcess, cancel: CancellationToken, io: SessionIo) {
    let SessionIo { outbound, mut inbound } = io;

    let Some(mut stdin) = process.stdin() else {
        let _ = outbound
            .send(Envelope::Error("terminal stdin unavailable".to_string()))
            .await;
        return;
    };
    let Some(mut stdout) = process.stdout() else {
        let _ = outbound
            .send(Envelope::Error("terminal stdout unavailable".to_string()))
            .await;
        return;
    };
    let mut size_tx = process.terminal_size();

    // With a TTY the container merges stderr into stdout; attach without
    // one still surfaces a separate stream.
    let stderr_task = process.stderr().map(|mut stderr| {
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            while let Ok(n) = stderr.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                if outbound.send(Envelope::Stderr(data)).await.is_err() {
                    break;
                }
            }
        })
    });

    let _ = outbound.send(Envelope::Connected(String::new())).await;

    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if outbound.send(Envelope::Stdout(data)).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    let _ = outbound.send(Envelope::Error(error.to_string())).await;
                    break;
                }
            },
            message = inbound.recv() => match message {
                Some(Envelope::Stdin(data)) => {
                    if stdin.write_all(data.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(Envelope::Resize(dim)) => {
                    if let Some(size_tx) = &mut size_tx {
                        let _ = size_tx
                            .send(TerminalSize { width: dim.cols, height: dim.rows })
                            .await;
                    }
                }
                Some(Envelope::Ping) => {
                    let _ = outbound.send(Envelope::Pong).await;
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    let _ = outbound.send(Envelope::Close(String::new())).await;
    if let Some(task) = stderr_task {
        task.abort();
    }
    if let Err(error) = process.join().await {
        debug!(%error, "terminal process ended");
    }
}
