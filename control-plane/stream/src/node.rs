//! Node terminals: bootstrap-then-attach.
//!
//! A node has no exec subresource, so the substrate first materializes a
//! privileged agent pod pinned to the target node, waits for it to become
//! ready, and then attaches to it. The agent pod is deleted when the
//! session ends, on every exit path.

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, SecurityContext, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, AttachParams, DeleteParams, PostParams};
use kube::Client;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{terminal, Envelope, SessionIo};

pub const AGENT_PREFIX: &str = "kite-node-terminal-agent-";
pub const AGENT_NAMESPACE: &str = "kube-system";

const MAX_POD_NAME: usize = 63;
const SUFFIX_LEN: usize = 5;
const READY_POLL: Duration = Duration::from_secs(2);
const READY_ATTEMPTS: u32 = 30;
const DELETE_WAIT_ATTEMPTS: u32 = 5;

/// `kite-node-terminal-agent-<truncatedNode>-<rand5>`, total ≤ 63 chars.
pub fn agent_pod_name(node: &str) -> String {
    let budget = MAX_POD_NAME - AGENT_PREFIX.len() - 1 - SUFFIX_LEN;
    let node: String = node.chars().take(budget).collect();
    let node = node.trim_end_matches(['-', '.']);

    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{AGENT_PREFIX}{node}-{suffix}")
}

/// Runs a node-terminal session: bootstrap the agent pod, attach, and
/// delete the pod when the session ends.
pub async fn run(
    client: Client,
    cancel: CancellationToken,
    node: &str,
    image: &str,
    io: SessionIo,
) {
    let pods: Api<Pod> = Api::namespaced(client, AGENT_NAMESPACE);
    let name = agent_pod_name(node);

    // Scoped cleanup: deletes the agent pod on normal exit, client
    // disconnect, cancellation, and panic alike.
    let _guard = AgentPodGuard {
        pods: pods.clone(),
        name: name.clone(),
    };

    if let Err(error) = bootstrap(&pods, &cancel, node, image, &name, &io).await {
        io.fail(error).await;
        return;
    }
    if cancel.is_cancelled() {
        return;
    }

    let _ = io.outbound.send(Envelope::Info("ready!".to_string())).await;
    match pods.attach(&name, &AttachParams::interactive_tty()).await {
        Ok(process) => terminal::bridge(process, cancel, io).await,
        Err(error) => io.fail(format!("attach {name}: {error}")).await,
    }
}

/// Ensures the agent pod exists and becomes ready; emits one `stdout`
/// progress dot per readiness poll.
async fn bootstrap(
    pods: &Api<Pod>,
    cancel: &CancellationToken,
    node: &str,
    image: &str,
    name: &str,
    io: &SessionIo,
) -> Result<(), String> {
    match pods.get(name).await {
        Ok(existing) => {
            let phase = pod_phase(&existing);
            if phase == "Succeeded" || phase == "Failed" {
                debug!(pod = %name, %phase, "replacing terminal-phase agent pod");
                let _ = pods.delete(name, &DeleteParams::default()).await;
                wait_for_deletion(pods, name).await;
                create_agent_pod(pods, node, image, name).await?;
            } else {
                info!(pod = %name, "reusing live agent pod");
            }
        }
        Err(kube::Error::Api(response)) if response.code == 404 => {
            create_agent_pod(pods, node, image, name).await?;
        }
        Err(error) => return Err(format!("lookup agent pod: {error}")),
    }

    for _ in 0..READY_ATTEMPTS {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sleep(READY_POLL) => {}
        }
        let _ = io.outbound.send(Envelope::Stdout(".".to_string())).await;

        match pods.get(name).await {
            Ok(pod) => {
                if pod_ready(&pod) {
                    return Ok(());
                }
            }
            Err(error) => debug!(pod = %name, %error, "agent pod poll failed"),
        }
    }

    let message = match pods.get(name).await {
        Ok(pod) => failure_message(&pod),
        Err(_) => "timed out waiting for the agent pod".to_string(),
    };
    Err(message)
}

async fn create_agent_pod(
    pods: &Api<Pod>,
    node: &str,
    image: &str,
    name: &str,
) -> Result<(), String> {
    pods.create(&PostParams::default(), &agent_pod(node, image, name))
        .await
        .map_err(|e| format!("create agent pod: {e}"))?;
    info!(pod = %name, %node, "created node terminal agent pod");
    Ok(())
}

async fn wait_for_deletion(pods: &Api<Pod>, name: &str) {
    for _ in 0..DELETE_WAIT_ATTEMPTS {
        match pods.get(name).await {
            Err(kube::Error::Api(response)) if response.code == 404 => return,
            _ => sleep(READY_POLL).await,
        }
    }
}

/// The privileged agent pod: pinned to the node, host namespaces, a single
/// TTY container entering the host's PID 1 namespaces.
fn agent_pod(node: &str, image: &str, name: &str) -> Pod {
    let command = vec![
        "nsenter".to_string(),
        "--target".to_string(),
        "1".to_string(),
        "--mount".to_string(),
        "--uts".to_string(),
        "--ipc".to_string(),
        "--net".to_string(),
        "--pid".to_string(),
        "--".to_string(),
        "bash".to_string(),
        "-c".to_string(),
        "cd ~ && exec bash -l".to_string(),
    ];

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(AGENT_NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            host_network: Some(true),
            host_pid: Some(true),
            host_ipc: Some(true),
            restart_policy: Some("Never".to_string()),
            tolerations: Some(vec![Toleration {
                operator: Some("Exists".to_string()),
                ..Toleration::default()
            }]),
            containers: vec![Container {
                name: "terminal".to_string(),
                image: Some(image.to_string()),
                command: Some(command),
                stdin: Some(true),
                stdin_once: Some(true),
                tty: Some(true),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..SecurityContext::default()
                }),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        status: None,
    }
}

fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_default()
}

fn pod_ready(pod: &Pod) -> bool {
    if pod_phase(pod) != "Running" {
        return false;
    }
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| !statuses.is_empty() && statuses.iter().all(|c| c.ready))
        .unwrap_or(false)
}

/// The most recent failure reason from the pod's container statuses,
/// falling back to the pod phase.
fn failure_message(pod: &Pod) -> String {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref());
    if let Some(statuses) = statuses {
        for status in statuses {
            if let Some(state) = &status.state {
                if let Some(waiting) = &state.waiting {
                    let reason = waiting.reason.clone().unwrap_or_default();
                    let message = waiting.message.clone().unwrap_or_default();
                    return format!("agent pod not ready: {reason} {message}")
                        .trim_end()
                        .to_string();
                }
                if let Some(terminated) = &state.terminated {
                    let reason = terminated.reason.clone().unwrap_or_default();
                    return format!("agent pod terminated: {reason}").trim_end().to_string();
                }
            }
        }
    }
    format!("agent pod not ready: phase {}", pod_phase(pod))
}

/// Deletes the agent pod when dropped, regardless of how the session
/// ended.
struct AgentPodGuard {
    pods: Api<Pod>,
    name: String,
}

impl Drop for AgentPodGuard {
    fn drop(&mut self) {
        let pods = self.pods.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = pods.delete(&name, &DeleteParams::default()).await {
                        warn!(pod = %name, %error, "failed to delete agent pod");
                    }
                });
            }
            Err(_) => warn!(pod = %name, "runtime gone; agent pod not deleted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus,
    };

    #[test]
    fn agent_pod_names_stay_within_the_dns_label_limit() {
        let short = agent_pod_name("node-1");
        assert!(short.starts_with("kite-node-terminal-agent-node-1-"));
        assert_eq!(short.len(), "kite-node-terminal-agent-node-1-".len() + 5);

        let long = agent_pod_name(
            "a-very-long-node-name-that-goes-on-and-on-and-exceeds-every-budget.example.com",
        );
        assert!(long.len() <= 63);
        assert!(long.starts_with(AGENT_PREFIX));

        // The random suffix makes names unique per session.
        assert_ne!(agent_pod_name("node-1"), agent_pod_name("node-1"));
    }

    #[test]
    fn truncation_never_leaves_a_trailing_separator() {
        // Truncating this node name at the budget boundary would end on '-'.
        let name = agent_pod_name("node-aaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb");
        let without_suffix = &name[..name.len() - SUFFIX_LEN - 1];
        assert!(!without_suffix.ends_with('-'));
        assert!(name.len() <= 63);
    }

    #[test]
    fn agent_pod_spec_is_privileged_and_pinned() {
        let pod = agent_pod("worker-3", "alpine:3.20", "kite-node-terminal-agent-worker-3-abcde");
        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("worker-3"));
        assert_eq!(spec.host_network, Some(true));
        assert_eq!(spec.host_pid, Some(true));
        assert_eq!(spec.host_ipc, Some(true));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            spec.tolerations.as_ref().unwrap()[0].operator.as_deref(),
            Some("Exists")
        );

        let container = &spec.containers[0];
        assert_eq!(container.tty, Some(true));
        assert_eq!(container.stdin_once, Some(true));
        assert_eq!(
            container.security_context.as_ref().unwrap().privileged,
            Some(true)
        );
        let command = container.command.as_ref().unwrap();
        assert_eq!(command[0], "nsenter");
        assert!(command.contains(&"--pid".to_string()));
        assert_eq!(command.last().unwrap(), "cd ~ && exec bash -l");
    }

    #[test]
    fn failure_message_prefers_waiting_reasons() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "terminal".to_string(),
                    ready: false,
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("ImagePullBackOff".to_string()),
                            message: Some("pull access denied".to_string()),
                        }),
                        ..ContainerState::default()
                    }),
                    ..ContainerStatus::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        };
        assert_eq!(
            failure_message(&pod),
            "agent pod not ready: ImagePullBackOff pull access denied"
        );

        let bare = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                ..PodStatus::default()
            }),
            ..Pod::default()
        };
        assert_eq!(failure_message(&bare), "agent pod not ready: phase Pending");
    }

    #[test]
    fn readiness_requires_running_phase_and_ready_containers() {
        let mut pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "terminal".to_string(),
                    ready: true,
                    ..ContainerStatus::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        };
        assert!(pod_ready(&pod));

        pod.status.as_mut().unwrap().container_statuses.as_mut().unwrap()[0].ready = false;
        assert!(!pod_ready(&pod));

        pod.status.as_mut().unwrap().phase = Some("Pending".to_string());
        assert!(!pod_ready(&pod));
    }
}
