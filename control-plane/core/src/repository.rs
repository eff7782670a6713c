use async_trait::async_trait;

use crate::{
    ClusterRecord, IdentityProviderRecord, NewBinding, NewCluster, NewRole, NewUser, Result, Role,
    SubjectBinding, UserRecord,
};

/// Durable storage of cluster, role, binding, user, and identity-provider
/// records.
///
/// Secret-typed fields are encrypted at rest by the backend and decrypt
/// transparently on read. All mutations that touch the default-cluster flag
/// run in a single transaction so at most one enabled record carries it.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    // Clusters.
    async fn list_clusters(&self) -> Result<Vec<ClusterRecord>>;
    async fn get_cluster(&self, name: &str) -> Result<Option<ClusterRecord>>;
    async fn create_cluster(&self, cluster: NewCluster) -> Result<ClusterRecord>;
    async fn update_cluster(&self, cluster: &ClusterRecord) -> Result<()>;
    async fn delete_cluster(&self, name: &str) -> Result<()>;

    /// Marks `name` as the default cluster, clearing any prior default in
    /// the same transaction.
    async fn set_default_cluster(&self, name: &str) -> Result<()>;

    // Roles and subject bindings.
    async fn list_roles(&self) -> Result<Vec<Role>>;
    async fn get_role(&self, name: &str) -> Result<Option<Role>>;
    async fn create_role(&self, role: NewRole) -> Result<Role>;
    async fn delete_role(&self, name: &str) -> Result<()>;
    async fn list_bindings(&self) -> Result<Vec<SubjectBinding>>;
    async fn create_binding(&self, binding: NewBinding) -> Result<SubjectBinding>;
    async fn delete_binding(&self, id: i64) -> Result<()>;

    // Users.
    async fn count_users(&self) -> Result<u64>;
    async fn get_user(&self, username: &str) -> Result<Option<UserRecord>>;
    async fn create_user(&self, user: NewUser) -> Result<UserRecord>;

    // Identity providers.
    async fn list_providers(&self) -> Result<Vec<IdentityProviderRecord>>;
    async fn get_provider(&self, name: &str) -> Result<Option<IdentityProviderRecord>>;
}
