use kite_control_plane_core::{NewBinding, NewCluster, NewRole, Repository, SubjectKind};

use crate::{bootstrap, MemRepository};

fn mk_cluster(name: &str, is_default: bool) -> NewCluster {
    NewCluster {
        name: name.to_string(),
        credential: "apiVersion: v1".into(),
        in_cluster: false,
        is_default,
        enabled: true,
        metrics_endpoint: None,
    }
}

#[tokio::test]
async fn duplicate_cluster_name_conflicts() {
    let repo = MemRepository::default();
    repo.create_cluster(mk_cluster("prod", false)).await.unwrap();
    let err = repo
        .create_cluster(mk_cluster("prod", false))
        .await
        .unwrap_err();
    assert!(matches!(err, kite_control_plane_core::Error::Conflict(_)));
}

#[tokio::test]
async fn creating_a_new_default_clears_the_prior_one() {
    let repo = MemRepository::default();
    repo.create_cluster(mk_cluster("a", true)).await.unwrap();
    repo.create_cluster(mk_cluster("b", true)).await.unwrap();

    let defaults: Vec<_> = repo
        .list_clusters()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.is_default)
        .map(|c| c.name)
        .collect();
    assert_eq!(defaults, vec!["b".to_string()]);
}

#[tokio::test]
async fn set_default_is_exclusive() {
    let repo = MemRepository::default();
    repo.create_cluster(mk_cluster("a", true)).await.unwrap();
    repo.create_cluster(mk_cluster("b", false)).await.unwrap();

    repo.set_default_cluster("b").await.unwrap();
    let a = repo.get_cluster("a").await.unwrap().unwrap();
    let b = repo.get_cluster("b").await.unwrap().unwrap();
    assert!(!a.is_default);
    assert!(b.is_default);
}

#[tokio::test]
async fn system_roles_cannot_be_deleted() {
    let repo = MemRepository::default();
    bootstrap::ensure_system_roles(&repo).await.unwrap();

    let err = repo.delete_role("admin").await.unwrap_err();
    assert!(matches!(err, kite_control_plane_core::Error::BadInput(_)));
    assert!(repo.get_role("admin").await.unwrap().is_some());

    // Bootstrapping twice is a no-op.
    bootstrap::ensure_system_roles(&repo).await.unwrap();
    assert_eq!(repo.list_roles().await.unwrap().len(), 2);
}

#[tokio::test]
async fn deleting_a_role_cascades_to_its_bindings() {
    let repo = MemRepository::default();
    let role = repo
        .create_role(NewRole {
            name: "ops".to_string(),
            clusters: vec!["*".to_string()],
            namespaces: vec!["*".to_string()],
            resources: vec!["*".to_string()],
            verbs: vec!["get".to_string()],
            system: false,
        })
        .await
        .unwrap();
    repo.create_binding(NewBinding {
        role_id: role.id,
        kind: SubjectKind::Group,
        subject: "platform".to_string(),
    })
    .await
    .unwrap();

    repo.delete_role("ops").await.unwrap();
    assert!(repo.list_bindings().await.unwrap().is_empty());
}

#[tokio::test]
async fn local_admin_bootstraps_only_into_an_empty_user_table() {
    let repo = MemRepository::default();
    bootstrap::ensure_local_admin(&repo, "admin", "hunter2")
        .await
        .unwrap();
    let admin = repo.get_user("admin").await.unwrap().unwrap();
    assert_eq!(admin.roles, vec!["admin".to_string()]);
    assert!(bcrypt::verify("hunter2", admin.password_hash.as_deref().unwrap()).unwrap());

    // A second start must not touch the existing account.
    bootstrap::ensure_local_admin(&repo, "other", "pw").await.unwrap();
    assert_eq!(repo.count_users().await.unwrap(), 1);
    assert!(repo.get_user("other").await.unwrap().is_none());
}
