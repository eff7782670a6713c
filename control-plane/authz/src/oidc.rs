use anyhow::Context as _;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use kite_control_plane_core::{Error, IdentityProviderRecord, Result, UserProfile};
use rand::RngCore;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const GRAPH_TIMEOUT: Duration = Duration::from_secs(30);
const GRAPH_HOST: &str = "graph.microsoft.com";
const GRAPH_MEMBER_OF: &str = "https://graph.microsoft.com/v1.0/me/memberOf";

/// Generates the random URL-safe state for the authorization-code flow.
pub fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Resolved provider endpoints, either configured explicitly or discovered
/// from the issuer's well-known OpenID configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
}

/// Response of the token and refresh grants.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// HTTP adapter for the identity providers. All calls use a 10 s timeout;
/// Microsoft Graph group pagination gets 30 s.
#[derive(Clone, Debug)]
pub struct OidcClient {
    http: reqwest::Client,
    graph: reqwest::Client,
}

impl Default for OidcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OidcClient {
    pub fn new() -> Self {
        let build = |timeout| {
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client")
        };
        Self {
            http: build(HTTP_TIMEOUT),
            graph: build(GRAPH_TIMEOUT),
        }
    }

    /// Explicit endpoints when all three are configured; otherwise OpenID
    /// discovery against the issuer.
    pub async fn endpoints(&self, provider: &IdentityProviderRecord) -> Result<ProviderEndpoints> {
        if let (Some(authorization), Some(token), Some(userinfo)) = (
            provider.authorization_endpoint.clone(),
            provider.token_endpoint.clone(),
            provider.userinfo_endpoint.clone(),
        ) {
            return Ok(ProviderEndpoints {
                authorization_endpoint: authorization,
                token_endpoint: token,
                userinfo_endpoint: userinfo,
            });
        }

        let issuer = provider.issuer.as_deref().ok_or_else(|| {
            Error::bad_input(format!(
                "identity provider {:?} has neither endpoints nor an issuer",
                provider.name
            ))
        })?;
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        let endpoints = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("openid discovery")
            .map_err(Error::Upstream)?
            .json::<ProviderEndpoints>()
            .await
            .context("openid discovery response")
            .map_err(Error::Upstream)?;
        Ok(endpoints)
    }

    /// The provider's authorization URL for a login redirect.
    pub async fn authorization_url(
        &self,
        provider: &IdentityProviderRecord,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String> {
        let endpoints = self.endpoints(provider).await?;
        let scopes = if provider.scopes.is_empty() {
            "openid profile email".to_string()
        } else {
            provider.scopes.join(" ")
        };
        let url = Url::parse_with_params(
            &endpoints.authorization_endpoint,
            &[
                ("client_id", provider.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scopes.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| Error::bad_input(format!("authorization endpoint: {e}")))?;
        Ok(url.into())
    }

    pub async fn exchange_code(
        &self,
        provider: &IdentityProviderRecord,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant> {
        let endpoints = self.endpoints(provider).await?;
        self.token_grant(
            &endpoints.token_endpoint,
            provider,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    /// The refresh grant used by the sliding session refresh.
    pub async fn refresh(
        &self,
        provider: &IdentityProviderRecord,
        refresh_token: &str,
    ) -> Result<TokenGrant> {
        let endpoints = self.endpoints(provider).await?;
        self.token_grant(
            &endpoints.token_endpoint,
            provider,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    async fn token_grant(
        &self,
        token_endpoint: &str,
        provider: &IdentityProviderRecord,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant> {
        let mut form = params.to_vec();
        form.push(("client_id", provider.client_id.as_str()));
        form.push(("client_secret", provider.client_secret.expose()));

        let response = self
            .http
            .post(token_endpoint)
            .form(&form)
            .send()
            .await
            .context("token grant")
            .map_err(Error::Upstream)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(anyhow::anyhow!(
                "token grant failed with {status}: {body}"
            )));
        }
        response
            .json::<TokenGrant>()
            .await
            .context("token grant response")
            .map_err(Error::Upstream)
    }

    /// Canonical user profile from the provider's user-info endpoint.
    ///
    /// Group membership is read from the user-info `groups` claim, except
    /// for Microsoft Graph where it comes from `/me/memberOf`.
    pub async fn userinfo(
        &self,
        provider: &IdentityProviderRecord,
        access_token: &str,
    ) -> Result<UserProfile> {
        let endpoints = self.endpoints(provider).await?;
        let info = self
            .http
            .get(&endpoints.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("userinfo")
            .map_err(Error::Upstream)?
            .json::<serde_json::Value>()
            .await
            .context("userinfo response")
            .map_err(Error::Upstream)?;

        let text = |field: &str| {
            info.get(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let id = text("sub");
        let username = [text("preferred_username"), text("email"), id.clone()]
            .into_iter()
            .find(|v| !v.is_empty())
            .unwrap_or_default();

        let groups = if is_graph_endpoint(&endpoints.userinfo_endpoint) {
            self.graph_groups(access_token).await?
        } else {
            info.get("groups")
                .and_then(|v| v.as_array())
                .map(|groups| {
                    groups
                        .iter()
                        .filter_map(|g| g.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(UserProfile {
            id,
            username,
            display_name: text("name"),
            provider: provider.name.clone(),
            groups,
            roles: Vec::new(),
        })
    }

    /// Enumerates `/me/memberOf`, following `@odata.nextLink` pagination.
    async fn graph_groups(&self, access_token: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            value: Vec<serde_json::Value>,
            #[serde(default, rename = "@odata.nextLink")]
            next_link: Option<String>,
        }

        let mut groups = Vec::new();
        let mut url = GRAPH_MEMBER_OF.to_string();
        loop {
            let page = self
                .graph
                .get(&url)
                .bearer_auth(access_token)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .context("graph memberOf")
                .map_err(Error::Upstream)?
                .json::<Page>()
                .await
                .context("graph memberOf response")
                .map_err(Error::Upstream)?;

            groups.extend(
                page.value
                    .iter()
                    .filter_map(|v| v.get("displayName"))
                    .filter_map(|v| v.as_str().map(str::to_string)),
            );
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(groups)
    }
}

fn is_graph_endpoint(endpoint: &str) -> bool {
    Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == GRAPH_HOST))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_url_safe_and_unique() {
        let a = random_state();
        let b = random_state();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), 32);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn graph_detection_is_host_based() {
        assert!(is_graph_endpoint("https://graph.microsoft.com/oidc/userinfo"));
        assert!(!is_graph_endpoint("https://accounts.example.com/userinfo"));
        assert!(!is_graph_endpoint("https://graph.microsoft.com.evil.example"));
    }
}
