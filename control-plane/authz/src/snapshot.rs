use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kite_control_plane_core::{Role, SubjectBinding, SubjectKind, UserProfile, WILDCARD};

/// An immutable view of the role catalog, indexed for O(effective roles)
/// access checks. Built whole on every catalog reload and published over a
/// watch channel; never mutated in place.
#[derive(Debug, Default)]
pub struct Snapshot {
    by_name: HashMap<String, Arc<Role>>,
    by_user: HashMap<String, Vec<Arc<Role>>>,
    by_group: HashMap<String, Vec<Arc<Role>>>,

    /// Roles bound to the wildcard user subject; granted to any
    /// authenticated identity (legacy `allowUsers: "*"` shim).
    any_user: Vec<Arc<Role>>,
}

impl Snapshot {
    pub fn build(roles: Vec<Role>, bindings: Vec<SubjectBinding>) -> Self {
        let by_id: HashMap<i64, Arc<Role>> =
            roles.into_iter().map(|r| (r.id, Arc::new(r))).collect();

        let mut snapshot = Self {
            by_name: by_id
                .values()
                .map(|r| (r.name.clone(), r.clone()))
                .collect(),
            ..Self::default()
        };

        for binding in bindings {
            let Some(role) = by_id.get(&binding.role_id) else {
                tracing::warn!(binding = binding.id, role = binding.role_id, "dangling binding");
                continue;
            };
            match binding.kind {
                SubjectKind::User if binding.subject == WILDCARD => {
                    snapshot.any_user.push(role.clone());
                }
                SubjectKind::User => snapshot
                    .by_user
                    .entry(binding.subject)
                    .or_default()
                    .push(role.clone()),
                SubjectKind::Group => snapshot
                    .by_group
                    .entry(binding.subject)
                    .or_default()
                    .push(role.clone()),
            }
        }
        snapshot
    }

    /// Effective roles for a user, deduplicated by role name.
    ///
    /// A user record carrying a materialized `roles` list (API-key users)
    /// uses that list verbatim; binding lookup is skipped.
    pub fn roles_for(&self, user: &UserProfile) -> Vec<Arc<Role>> {
        if !user.roles.is_empty() {
            return user
                .roles
                .iter()
                .filter_map(|name| self.by_name.get(name).cloned())
                .collect();
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |role: &Arc<Role>| {
            if seen.insert(role.name.clone()) {
                out.push(role.clone());
            }
        };

        for role in &self.any_user {
            push(role);
        }
        if let Some(roles) = self.by_user.get(user.key()) {
            for role in roles {
                push(role);
            }
        }
        for group in &user.groups {
            if let Some(roles) = self.by_group.get(group) {
                for role in roles {
                    push(role);
                }
            }
        }
        out
    }
}
