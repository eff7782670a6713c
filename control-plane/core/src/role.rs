use serde::{Deserialize, Serialize};

use crate::WILDCARD;

/// A role is four star-able string sets. `"*"` in a dimension matches any
/// value in that dimension, including the `_all` namespace sentinel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub clusters: Vec<String>,
    pub namespaces: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,

    /// System roles are created at first start and cannot be deleted.
    pub system: bool,
}

impl Role {
    /// Whether this role permits `verb` on `resource` in
    /// `cluster`/`namespace`.
    pub fn allows(&self, verb: &str, resource: &str, cluster: &str, namespace: &str) -> bool {
        self.allows_cluster(cluster)
            && matches(&self.namespaces, namespace)
            && matches(&self.resources, resource)
            && matches(&self.verbs, verb)
    }

    pub fn allows_cluster(&self, cluster: &str) -> bool {
        matches(&self.clusters, cluster)
    }

    pub fn allows_namespace(&self, cluster: &str, namespace: &str) -> bool {
        self.allows_cluster(cluster) && matches(&self.namespaces, namespace)
    }
}

fn matches(set: &[String], value: &str) -> bool {
    set.iter().any(|entry| entry == WILDCARD || entry == value)
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub clusters: Vec<String>,
    pub namespaces: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
    #[serde(default)]
    pub system: bool,
}

/// Binds a role to either a user key or an identity-provider group name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectBinding {
    pub id: i64,
    pub role_id: i64,
    pub kind: SubjectKind,

    /// User key or group name; a user-kind binding with subject `"*"`
    /// matches any authenticated identity.
    pub subject: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Group,
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Group => f.write_str("group"),
        }
    }
}

impl std::str::FromStr for SubjectKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            other => Err(crate::Error::bad_input(format!(
                "invalid subject kind {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewBinding {
    pub role_id: i64,
    pub kind: SubjectKind,
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_role(clusters: &[&str], namespaces: &[&str], resources: &[&str], verbs: &[&str]) -> Role {
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Role {
            id: 1,
            name: "test".to_string(),
            clusters: set(clusters),
            namespaces: set(namespaces),
            resources: set(resources),
            verbs: set(verbs),
            system: false,
        }
    }

    #[test]
    fn wildcard_matches_every_dimension_value() {
        let role = mk_role(&["*"], &["*"], &["*"], &["*"]);
        assert!(role.allows("delete", "pods", "prod", "default"));
        assert!(role.allows("get", "nodes", "staging", crate::ALL_NAMESPACES));
    }

    #[test]
    fn exact_entries_match_only_themselves() {
        let role = mk_role(&["prod"], &["default"], &["pods"], &["get", "log"]);
        assert!(role.allows("get", "pods", "prod", "default"));
        assert!(role.allows("log", "pods", "prod", "default"));
        assert!(!role.allows("delete", "pods", "prod", "default"));
        assert!(!role.allows("get", "pods", "staging", "default"));
        assert!(!role.allows("get", "pods", "prod", "kube-system"));
        assert!(!role.allows("get", "deployments", "prod", "default"));
    }

    #[test]
    fn cluster_dimension_checked_alone() {
        let role = mk_role(&["prod"], &[], &[], &[]);
        assert!(role.allows_cluster("prod"));
        assert!(!role.allows_cluster("staging"));
        assert!(!role.allows("get", "pods", "prod", "default"));
    }
}
