use std::sync::Arc;

use kite_control_plane_core::{NewCluster, Repository};
use kite_control_plane_store::MemRepository;

use crate::{manager, split_contexts};

/// A two-context kubeconfig pointing at unroutable endpoints; client
/// construction succeeds and the version probe fails fast.
const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: ctx-a
clusters:
  - name: cluster-a
    cluster:
      server: https://127.0.0.1:1
      insecure-skip-tls-verify: true
  - name: cluster-b
    cluster:
      server: https://127.0.0.1:2
      insecure-skip-tls-verify: true
users:
  - name: user-a
    user:
      token: token-a
  - name: user-b
    user:
      token: token-b
contexts:
  - name: ctx-a
    context:
      cluster: cluster-a
      user: user-a
  - name: ctx-b
    context:
      cluster: cluster-b
      user: user-b
"#;

fn mk_cluster(name: &str, server_port: u16) -> NewCluster {
    let credential = format!(
        "apiVersion: v1\nkind: Config\ncurrent-context: {name}\n\
         clusters:\n  - name: {name}\n    cluster:\n      server: https://127.0.0.1:{server_port}\n      insecure-skip-tls-verify: true\n\
         users:\n  - name: {name}\n    user:\n      token: secret\n\
         contexts:\n  - name: {name}\n    context:\n      cluster: {name}\n      user: {name}\n"
    );
    NewCluster {
        name: name.to_string(),
        credential: credential.into(),
        in_cluster: false,
        is_default: false,
        enabled: true,
        metrics_endpoint: None,
    }
}

#[test]
fn split_produces_one_self_contained_blob_per_context() {
    let blobs = split_contexts(KUBECONFIG).unwrap();
    assert_eq!(blobs.len(), 2);

    let (name, blob) = &blobs[0];
    assert_eq!(name, "ctx-a");
    let config = kube::config::Kubeconfig::from_yaml(blob).unwrap();
    assert_eq!(config.current_context.as_deref(), Some("ctx-a"));
    assert_eq!(config.contexts.len(), 1);
    assert_eq!(config.clusters.len(), 1);
    assert_eq!(config.clusters[0].name, "cluster-a");
    assert_eq!(config.auth_infos.len(), 1);
    assert_eq!(config.auth_infos[0].name, "user-a");

    let (name, blob) = &blobs[1];
    assert_eq!(name, "ctx-b");
    assert!(blob.contains("cluster-b"));
    assert!(!blob.contains("cluster-a"));
}

#[test]
fn split_rejects_a_config_without_contexts() {
    assert!(split_contexts("apiVersion: v1\nkind: Config\n").is_err());
}

#[tokio::test]
async fn import_creates_records_and_marks_the_current_context_default() {
    let repo = Arc::new(MemRepository::default());
    let (manager, _reconciler) = manager(repo.clone());

    let created = manager.import_kubeconfig(KUBECONFIG).await.unwrap();
    assert_eq!(created, 2);

    let ctx_a = repo.get_cluster("ctx-a").await.unwrap().unwrap();
    let ctx_b = repo.get_cluster("ctx-b").await.unwrap().unwrap();
    assert!(ctx_a.is_default);
    assert!(!ctx_b.is_default);
    assert!(ctx_a.enabled && ctx_b.enabled);
    assert!(ctx_a.credential.expose().contains("token-a"));

    // Importing again skips the existing names.
    let created = manager.import_kubeconfig(KUBECONFIG).await.unwrap();
    assert_eq!(created, 0);
}

#[tokio::test]
async fn reconcile_converges_on_enabled_records() {
    let repo = Arc::new(MemRepository::default());
    repo.create_cluster(mk_cluster("alpha", 1)).await.unwrap();
    repo.create_cluster(mk_cluster("beta", 1)).await.unwrap();
    let (manager, _reconciler) = manager(repo.clone());

    manager.reconcile().await.unwrap();
    let visible = manager.list_visible(|_| true);
    let names: Vec<_> = visible.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    // The endpoints are unroutable, so the probe failed but the bundles
    // remain present with an empty version.
    assert!(visible.iter().all(|s| s.version.is_empty()));

    // Disabling a record removes its bundle on the next pass.
    let mut beta = repo.get_cluster("beta").await.unwrap().unwrap();
    beta.enabled = false;
    repo.update_cluster(&beta).await.unwrap();
    manager.reconcile().await.unwrap();
    assert!(manager.get("beta").is_err());
    assert!(manager.get("alpha").is_ok());
}

#[tokio::test]
async fn credential_rotation_replaces_the_bundle() {
    let repo = Arc::new(MemRepository::default());
    repo.create_cluster(mk_cluster("prod", 1)).await.unwrap();
    let (manager, _reconciler) = manager(repo.clone());

    manager.reconcile().await.unwrap();
    let before = manager.get("prod").unwrap();
    let disposal = before.cancelled_on_dispose();

    let mut record = repo.get_cluster("prod").await.unwrap().unwrap();
    record.credential = mk_cluster("prod", 3).credential;
    repo.update_cluster(&record).await.unwrap();
    manager.reconcile().await.unwrap();

    let after = manager.get("prod").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    // The old bundle's scoped work is cancelled; the new bundle captured
    // the rotated credential.
    assert!(disposal.is_cancelled());
}

#[tokio::test]
async fn empty_name_resolves_the_default_cluster() {
    let repo = Arc::new(MemRepository::default());
    repo.create_cluster(mk_cluster("alpha", 1)).await.unwrap();
    let mut with_default = mk_cluster("omega", 1);
    with_default.is_default = true;
    repo.create_cluster(with_default).await.unwrap();
    let (manager, _reconciler) = manager(repo.clone());

    manager.reconcile().await.unwrap();
    assert_eq!(manager.get("").unwrap().name(), "omega");
    assert_eq!(manager.get("alpha").unwrap().name(), "alpha");
    assert!(manager.get("ghost").is_err());

    let summaries = manager.list_visible(|_| true);
    assert_eq!(
        summaries.iter().map(|s| s.is_default).collect::<Vec<_>>(),
        vec![false, true]
    );
}

#[tokio::test]
async fn list_visible_applies_the_caller_predicate() {
    let repo = Arc::new(MemRepository::default());
    repo.create_cluster(mk_cluster("alpha", 1)).await.unwrap();
    repo.create_cluster(mk_cluster("beta", 1)).await.unwrap();
    let (manager, _reconciler) = manager(repo.clone());

    manager.reconcile().await.unwrap();
    let visible = manager.list_visible(|name| name == "beta");
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].name, "beta");
}
