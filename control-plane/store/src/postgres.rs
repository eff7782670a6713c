use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kite_control_plane_core::{
    ClusterRecord, Error, IdentityProviderRecord, NewBinding, NewCluster, NewRole, NewUser,
    Repository, Result, Role, Secret, SubjectBinding, SubjectKind, UserRecord,
};
use sqlx::PgPool;

use crate::SecretCipher;

type ClusterRow = (
    i64,
    String,
    String,
    bool,
    bool,
    bool,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

type RoleRow = (i64, String, String, String, String, String, bool);

type UserRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    String,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

type ProviderRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    bool,
);

const CLUSTER_COLUMNS: &str = "id, name, credential, in_cluster, is_default, enabled, \
     metrics_endpoint, created_at, updated_at";

const ROLE_COLUMNS: &str = "id, name, clusters, namespaces, resources, verbs, system";

const USER_COLUMNS: &str =
    "id, username, display_name, provider, password_hash, roles, enabled, created_at, updated_at";

const PROVIDER_COLUMNS: &str = "id, name, client_id, client_secret, issuer, \
     authorization_endpoint, token_endpoint, userinfo_endpoint, scopes, enabled";

/// Postgres-backed repository. Secret columns are encrypted with the
/// process cipher before they hit the wire and decrypted on read.
#[derive(Clone, Debug)]
pub struct PgRepository {
    pool: PgPool,
    cipher: SecretCipher,
}

impl PgRepository {
    /// Connects to the database and runs embedded migrations.
    pub async fn connect(dsn: &str, cipher: SecretCipher) -> anyhow::Result<Self> {
        let pool = PgPool::connect(dsn).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, cipher })
    }

    fn cluster_from_row(&self, row: ClusterRow) -> Result<ClusterRecord> {
        let (id, name, credential, in_cluster, is_default, enabled, metrics_endpoint, c, u) = row;
        Ok(ClusterRecord {
            id,
            name,
            credential: Secret::new(self.cipher.decrypt(&credential)?),
            in_cluster,
            is_default,
            enabled,
            metrics_endpoint,
            created_at: c,
            updated_at: u,
        })
    }

    fn provider_from_row(&self, row: ProviderRow) -> Result<IdentityProviderRecord> {
        let (id, name, client_id, client_secret, issuer, authz, token, userinfo, scopes, enabled) =
            row;
        Ok(IdentityProviderRecord {
            id,
            name,
            client_id,
            client_secret: Secret::new(self.cipher.decrypt(&client_secret)?),
            issuer,
            authorization_endpoint: authz,
            token_endpoint: token,
            userinfo_endpoint: userinfo,
            scopes: parse_set(&scopes)?,
            enabled,
        })
    }
}

fn role_from_row(row: RoleRow) -> Result<Role> {
    let (id, name, clusters, namespaces, resources, verbs, system) = row;
    Ok(Role {
        id,
        name,
        clusters: parse_set(&clusters)?,
        namespaces: parse_set(&namespaces)?,
        resources: parse_set(&resources)?,
        verbs: parse_set(&verbs)?,
        system,
    })
}

fn user_from_row(row: UserRow) -> Result<UserRecord> {
    let (id, username, display_name, provider, password_hash, roles, enabled, c, u) = row;
    Ok(UserRecord {
        id,
        username,
        display_name,
        provider,
        password_hash,
        roles: parse_set(&roles)?,
        enabled,
        created_at: c,
        updated_at: u,
    })
}

/// String sets are stored as JSON arrays in TEXT columns.
fn parse_set(text: &str) -> Result<Vec<String>> {
    serde_json::from_str(text)
        .map_err(|e| Error::Upstream(anyhow::anyhow!("malformed set column: {e}")))
}

fn set_to_text(set: &[String]) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

fn db_err(what: &str, e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(what.to_string()),
        _ => Error::Upstream(anyhow::Error::new(e).context(format!("query for {what}"))),
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>> {
        let rows = sqlx::query_as::<_, ClusterRow>(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM clusters ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("clusters", e))?;
        rows.into_iter().map(|r| self.cluster_from_row(r)).collect()
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<ClusterRecord>> {
        let row = sqlx::query_as::<_, ClusterRow>(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM clusters WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("cluster", e))?;
        row.map(|r| self.cluster_from_row(r)).transpose()
    }

    async fn create_cluster(&self, cluster: NewCluster) -> Result<ClusterRecord> {
        let mut tx = self.pool.begin().await.map_err(|e| db_err("cluster", e))?;
        if cluster.is_default {
            sqlx::query("UPDATE clusters SET is_default = FALSE, updated_at = now() WHERE is_default")
                .execute(&mut *tx)
                .await
                .map_err(|e| db_err("cluster", e))?;
        }
        let row = sqlx::query_as::<_, ClusterRow>(&format!(
            "INSERT INTO clusters (name, credential, in_cluster, is_default, enabled, metrics_endpoint) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {CLUSTER_COLUMNS}"
        ))
        .bind(&cluster.name)
        .bind(self.cipher.encrypt(cluster.credential.expose())?)
        .bind(cluster.in_cluster)
        .bind(cluster.is_default)
        .bind(cluster.enabled)
        .bind(&cluster.metrics_endpoint)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err(&format!("cluster {:?}", cluster.name), e))?;
        tx.commit().await.map_err(|e| db_err("cluster", e))?;
        self.cluster_from_row(row)
    }

    async fn update_cluster(&self, cluster: &ClusterRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| db_err("cluster", e))?;
        if cluster.is_default {
            sqlx::query(
                "UPDATE clusters SET is_default = FALSE, updated_at = now() \
                 WHERE is_default AND id <> $1",
            )
            .bind(cluster.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("cluster", e))?;
        }
        let updated = sqlx::query(
            "UPDATE clusters SET credential = $2, in_cluster = $3, is_default = $4, \
             enabled = $5, metrics_endpoint = $6, updated_at = now() WHERE id = $1",
        )
        .bind(cluster.id)
        .bind(self.cipher.encrypt(cluster.credential.expose())?)
        .bind(cluster.in_cluster)
        .bind(cluster.is_default)
        .bind(cluster.enabled)
        .bind(&cluster.metrics_endpoint)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("cluster", e))?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found(format!("cluster {:?}", cluster.name)));
        }
        tx.commit().await.map_err(|e| db_err("cluster", e))?;
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM clusters WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("cluster", e))?;
        if deleted.rows_affected() == 0 {
            return Err(Error::not_found(format!("cluster {name:?}")));
        }
        Ok(())
    }

    async fn set_default_cluster(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| db_err("cluster", e))?;
        sqlx::query("UPDATE clusters SET is_default = FALSE, updated_at = now() WHERE is_default")
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("cluster", e))?;
        let updated =
            sqlx::query("UPDATE clusters SET is_default = TRUE, updated_at = now() WHERE name = $1")
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_err("cluster", e))?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found(format!("cluster {name:?}")));
        }
        tx.commit().await.map_err(|e| db_err("cluster", e))?;
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("roles", e))?;
        rows.into_iter().map(role_from_row).collect()
    }

    async fn get_role(&self, name: &str) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("role", e))?;
        row.map(role_from_row).transpose()
    }

    async fn create_role(&self, role: NewRole) -> Result<Role> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "INSERT INTO roles (name, clusters, namespaces, resources, verbs, system) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ROLE_COLUMNS}"
        ))
        .bind(&role.name)
        .bind(set_to_text(&role.clusters))
        .bind(set_to_text(&role.namespaces))
        .bind(set_to_text(&role.resources))
        .bind(set_to_text(&role.verbs))
        .bind(role.system)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err(&format!("role {:?}", role.name), e))?;
        role_from_row(row)
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let system = sqlx::query_as::<_, (bool,)>("SELECT system FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("role", e))?
            .ok_or_else(|| Error::not_found(format!("role {name:?}")))?;
        if system.0 {
            return Err(Error::bad_input(format!(
                "system role {name:?} cannot be deleted"
            )));
        }
        sqlx::query("DELETE FROM roles WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("role", e))?;
        Ok(())
    }

    async fn list_bindings(&self) -> Result<Vec<SubjectBinding>> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String)>(
            "SELECT id, role_id, kind, subject FROM subject_bindings ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("bindings", e))?;
        rows.into_iter()
            .map(|(id, role_id, kind, subject)| {
                Ok(SubjectBinding {
                    id,
                    role_id,
                    kind: kind.parse::<SubjectKind>()?,
                    subject,
                })
            })
            .collect()
    }

    async fn create_binding(&self, binding: NewBinding) -> Result<SubjectBinding> {
        let row = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO subject_bindings (role_id, kind, subject) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(binding.role_id)
        .bind(binding.kind.to_string())
        .bind(&binding.subject)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("binding", e))?;
        Ok(SubjectBinding {
            id: row.0,
            role_id: binding.role_id,
            kind: binding.kind,
            subject: binding.subject,
        })
    }

    async fn delete_binding(&self, id: i64) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM subject_bindings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("binding", e))?;
        if deleted.rows_affected() == 0 {
            return Err(Error::not_found(format!("binding #{id}")));
        }
        Ok(())
    }

    async fn count_users(&self) -> Result<u64> {
        let count = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("users", e))?;
        Ok(count.0 as u64)
    }

    async fn get_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("user", e))?;
        row.map(user_from_row).transpose()
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (username, display_name, provider, password_hash, roles) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.provider)
        .bind(&user.password_hash)
        .bind(set_to_text(&user.roles))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err(&format!("user {:?}", user.username), e))?;
        user_from_row(row)
    }

    async fn list_providers(&self) -> Result<Vec<IdentityProviderRecord>> {
        let rows = sqlx::query_as::<_, ProviderRow>(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM identity_providers ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("identity providers", e))?;
        rows.into_iter()
            .map(|r| self.provider_from_row(r))
            .collect()
    }

    async fn get_provider(&self, name: &str) -> Result<Option<IdentityProviderRecord>> {
        let row = sqlx::query_as::<_, ProviderRow>(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM identity_providers WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("identity provider", e))?;
        row.map(|r| self.provider_from_row(r)).transpose()
    }
}
