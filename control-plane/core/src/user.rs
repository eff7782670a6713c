use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted user account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub display_name: String,

    /// Identity provider the account belongs to; `password` for the
    /// built-in local account.
    pub provider: String,

    /// bcrypt hash; only set for password-login accounts.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    /// Materialized role names. When non-empty (API-key users) the list is
    /// used verbatim and subject-binding lookup is skipped.
    pub roles: Vec<String>,

    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    pub provider: String,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The canonical identity the authorization engine works with, assembled
/// from a validated session token or an identity provider's user-info
/// response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub provider: String,
    pub groups: Vec<String>,

    /// Materialized roles, carried over from the user record when present.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserProfile {
    /// The key subject bindings are matched against: the first non-empty of
    /// username, display name, and id.
    pub fn key(&self) -> &str {
        if !self.username.is_empty() {
            &self.username
        } else if !self.display_name.is_empty() {
            &self.display_name
        } else {
            &self.id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefers_username_then_display_name_then_id() {
        let mut profile = UserProfile {
            id: "42".to_string(),
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
            ..Default::default()
        };
        assert_eq!(profile.key(), "alice");

        profile.username.clear();
        assert_eq!(profile.key(), "Alice");

        profile.display_name.clear();
        assert_eq!(profile.key(), "42");
    }
}
