use async_trait::async_trait;
use chrono::Utc;
use kite_control_plane_core::{
    ClusterRecord, Error, IdentityProviderRecord, NewBinding, NewCluster, NewRole, NewUser,
    Repository, Result, Role, SubjectBinding, UserRecord,
};
use parking_lot::Mutex;

/// In-memory repository used by tests and `database-kind = memory`
/// development runs. Mirrors the Postgres backend's semantics, including
/// default-cluster uniqueness and system-role protection.
#[derive(Debug, Default)]
pub struct MemRepository {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    clusters: Vec<ClusterRecord>,
    roles: Vec<Role>,
    bindings: Vec<SubjectBinding>,
    users: Vec<UserRecord>,
    providers: Vec<IdentityProviderRecord>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemRepository {
    /// Registers an identity provider; the Postgres backend manages these
    /// through migrations and operator tooling instead.
    pub fn add_provider(&self, provider: IdentityProviderRecord) {
        self.state.lock().providers.push(provider);
    }
}

#[async_trait]
impl Repository for MemRepository {
    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>> {
        Ok(self.state.lock().clusters.clone())
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<ClusterRecord>> {
        Ok(self
            .state
            .lock()
            .clusters
            .iter()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn create_cluster(&self, cluster: NewCluster) -> Result<ClusterRecord> {
        let mut state = self.state.lock();
        if state.clusters.iter().any(|c| c.name == cluster.name) {
            return Err(Error::Conflict(format!("cluster {:?}", cluster.name)));
        }
        if cluster.is_default {
            for existing in &mut state.clusters {
                existing.is_default = false;
            }
        }
        let now = Utc::now();
        let record = ClusterRecord {
            id: state.next_id(),
            name: cluster.name,
            credential: cluster.credential,
            in_cluster: cluster.in_cluster,
            is_default: cluster.is_default,
            enabled: cluster.enabled,
            metrics_endpoint: cluster.metrics_endpoint,
            created_at: now,
            updated_at: now,
        };
        state.clusters.push(record.clone());
        Ok(record)
    }

    async fn update_cluster(&self, cluster: &ClusterRecord) -> Result<()> {
        let mut state = self.state.lock();
        if cluster.is_default {
            for existing in &mut state.clusters {
                if existing.id != cluster.id {
                    existing.is_default = false;
                }
            }
        }
        let existing = state
            .clusters
            .iter_mut()
            .find(|c| c.id == cluster.id)
            .ok_or_else(|| Error::not_found(format!("cluster {:?}", cluster.name)))?;
        *existing = ClusterRecord {
            updated_at: Utc::now(),
            created_at: existing.created_at,
            ..cluster.clone()
        };
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.clusters.len();
        state.clusters.retain(|c| c.name != name);
        if state.clusters.len() == before {
            return Err(Error::not_found(format!("cluster {name:?}")));
        }
        Ok(())
    }

    async fn set_default_cluster(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.clusters.iter().any(|c| c.name == name) {
            return Err(Error::not_found(format!("cluster {name:?}")));
        }
        for cluster in &mut state.clusters {
            cluster.is_default = cluster.name == name;
            cluster.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.state.lock().roles.clone())
    }

    async fn get_role(&self, name: &str) -> Result<Option<Role>> {
        Ok(self
            .state
            .lock()
            .roles
            .iter()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn create_role(&self, role: NewRole) -> Result<Role> {
        let mut state = self.state.lock();
        if state.roles.iter().any(|r| r.name == role.name) {
            return Err(Error::Conflict(format!("role {:?}", role.name)));
        }
        let record = Role {
            id: state.next_id(),
            name: role.name,
            clusters: role.clusters,
            namespaces: role.namespaces,
            resources: role.resources,
            verbs: role.verbs,
            system: role.system,
        };
        state.roles.push(record.clone());
        Ok(record)
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let role = state
            .roles
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("role {name:?}")))?;
        if role.system {
            return Err(Error::bad_input(format!(
                "system role {name:?} cannot be deleted"
            )));
        }
        state.roles.retain(|r| r.name != name);
        state.bindings.retain(|b| b.role_id != role.id);
        Ok(())
    }

    async fn list_bindings(&self) -> Result<Vec<SubjectBinding>> {
        Ok(self.state.lock().bindings.clone())
    }

    async fn create_binding(&self, binding: NewBinding) -> Result<SubjectBinding> {
        let mut state = self.state.lock();
        if !state.roles.iter().any(|r| r.id == binding.role_id) {
            return Err(Error::not_found(format!("role #{}", binding.role_id)));
        }
        let record = SubjectBinding {
            id: state.next_id(),
            role_id: binding.role_id,
            kind: binding.kind,
            subject: binding.subject,
        };
        state.bindings.push(record.clone());
        Ok(record)
    }

    async fn delete_binding(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.bindings.len();
        state.bindings.retain(|b| b.id != id);
        if state.bindings.len() == before {
            return Err(Error::not_found(format!("binding #{id}")));
        }
        Ok(())
    }

    async fn count_users(&self) -> Result<u64> {
        Ok(self.state.lock().users.len() as u64)
    }

    async fn get_user(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .state
            .lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let mut state = self.state.lock();
        if state.users.iter().any(|u| u.username == user.username) {
            return Err(Error::Conflict(format!("user {:?}", user.username)));
        }
        let now = Utc::now();
        let record = UserRecord {
            id: state.next_id(),
            username: user.username,
            display_name: user.display_name,
            provider: user.provider,
            password_hash: user.password_hash,
            roles: user.roles,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        state.users.push(record.clone());
        Ok(record)
    }

    async fn list_providers(&self) -> Result<Vec<IdentityProviderRecord>> {
        Ok(self.state.lock().providers.clone())
    }

    async fn get_provider(&self, name: &str) -> Result<Option<IdentityProviderRecord>> {
        Ok(self
            .state
            .lock()
            .providers
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }
}
