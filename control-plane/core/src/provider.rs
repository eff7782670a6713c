use serde::{Deserialize, Serialize};

use crate::{Error, Result, Secret};

/// A configured OpenID Connect identity provider.
///
/// Either `issuer` is set (endpoints are discovered from the well-known
/// OpenID configuration) or all three endpoints are set explicitly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityProviderRecord {
    pub id: i64,
    pub name: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: Secret,

    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,

    pub scopes: Vec<String>,
    pub enabled: bool,
}

impl IdentityProviderRecord {
    pub fn validate(&self) -> Result<()> {
        if self.issuer.is_some() {
            return Ok(());
        }
        if self.authorization_endpoint.is_some()
            && self.token_endpoint.is_some()
            && self.userinfo_endpoint.is_some()
        {
            return Ok(());
        }
        Err(Error::bad_input(format!(
            "identity provider {:?} must set either an issuer or all of the \
             authorization, token, and userinfo endpoints",
            self.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_provider() -> IdentityProviderRecord {
        IdentityProviderRecord {
            id: 1,
            name: "oidc".to_string(),
            client_id: "client".to_string(),
            client_secret: Secret::new("secret"),
            issuer: None,
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            scopes: vec!["openid".to_string()],
            enabled: true,
        }
    }

    #[test]
    fn issuer_alone_is_valid() {
        let mut provider = mk_provider();
        provider.issuer = Some("https://accounts.example.com".to_string());
        assert!(provider.validate().is_ok());
    }

    #[test]
    fn explicit_endpoints_must_be_complete() {
        let mut provider = mk_provider();
        provider.authorization_endpoint = Some("https://idp.example.com/auth".to_string());
        provider.token_endpoint = Some("https://idp.example.com/token".to_string());
        assert!(provider.validate().is_err());

        provider.userinfo_endpoint = Some("https://idp.example.com/userinfo".to_string());
        assert!(provider.validate().is_ok());
    }
}
