use kite_control_plane_core::{Error, NewRole, NewUser, Repository, Result, WILDCARD};
use tracing::info;

/// The two undeletable system roles, created on first start if absent.
pub async fn ensure_system_roles(repo: &dyn Repository) -> Result<()> {
    let wildcard = vec![WILDCARD.to_string()];

    if repo.get_role("admin").await?.is_none() {
        repo.create_role(NewRole {
            name: "admin".to_string(),
            clusters: wildcard.clone(),
            namespaces: wildcard.clone(),
            resources: wildcard.clone(),
            verbs: wildcard.clone(),
            system: true,
        })
        .await?;
        info!("created system role admin");
    }

    if repo.get_role("viewer").await?.is_none() {
        repo.create_role(NewRole {
            name: "viewer".to_string(),
            clusters: wildcard.clone(),
            namespaces: wildcard.clone(),
            resources: wildcard,
            verbs: vec!["get".to_string(), "log".to_string()],
            system: true,
        })
        .await?;
        info!("created system role viewer");
    }

    Ok(())
}

/// Bootstraps the local super-user when the user table is empty.
pub async fn ensure_local_admin(
    repo: &dyn Repository,
    username: &str,
    password: &str,
) -> Result<()> {
    if repo.count_users().await? > 0 {
        return Ok(());
    }

    let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| Error::Upstream(anyhow::anyhow!("hash admin password: {e}")))?;
    repo.create_user(NewUser {
        username: username.to_string(),
        display_name: username.to_string(),
        provider: "password".to_string(),
        password_hash: Some(hash),
        roles: vec!["admin".to_string()],
    })
    .await?;
    info!(%username, "bootstrapped local admin user");
    Ok(())
}
