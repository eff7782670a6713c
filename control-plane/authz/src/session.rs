use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use kite_control_plane_core::{Error, Repository, Result, UserProfile};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::OidcClient;

/// Tokens presented with more than this many seconds to live are returned
/// unchanged by the sliding refresh.
const REFRESH_WINDOW_SECS: i64 = 60 * 60;

/// Signed session-token payload. Opaque to the UI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// User key subject bindings match against.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Identity provider the session was established through.
    pub provider: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Claims {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.sub.clone(),
            username: self.key.clone(),
            display_name: self.name.clone(),
            provider: self.provider.clone(),
            groups: self.groups.clone(),
            roles: Vec::new(),
        }
    }
}

/// HMAC signer for session tokens. The secret is immutable after startup;
/// issuance and validation hold no locks.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn issue(&self, profile: &UserProfile, refresh_token: Option<String>) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: profile.id.clone(),
            key: profile.key().to_string(),
            name: profile.display_name.clone(),
            provider: profile.provider.clone(),
            groups: profile.groups.clone(),
            refresh_token,
            iat: now,
            nbf: now,
            exp: now + self.ttl_secs,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Upstream(anyhow::anyhow!("sign session token: {e}")))
    }

    /// Verifies the signature (rejecting any non-HS256 algorithm header),
    /// `nbf`, and `exp`.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Unauthenticated(format!("invalid session token: {e}")))
    }

    /// Extracts claims without verifying the signature or expiry. Only used
    /// to recover the refresh token from an expired session.
    fn decode_unverified(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Unauthenticated(format!("malformed session token: {e}")))
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

/// Session lifecycle: issuance, validation with sliding refresh, and the
/// password login path.
pub struct SessionManager {
    signer: TokenSigner,
    repo: Arc<dyn Repository>,
    oidc: OidcClient,
    providers_enabled: bool,
}

impl SessionManager {
    pub fn new(
        signer: TokenSigner,
        repo: Arc<dyn Repository>,
        oidc: OidcClient,
        providers_enabled: bool,
    ) -> Self {
        Self {
            signer,
            repo,
            oidc,
            providers_enabled,
        }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn issue(&self, profile: &UserProfile, refresh_token: Option<String>) -> Result<String> {
        self.signer.issue(profile, refresh_token)
    }

    /// Validates a presented token and applies the sliding refresh.
    ///
    /// Returns the authenticated profile and, when the token was close to
    /// expiry (or re-established through the provider's refresh grant), a
    /// replacement token the caller must hand back to the client.
    pub async fn authenticate(&self, token: &str) -> Result<(UserProfile, Option<String>)> {
        match self.signer.validate(token) {
            Ok(claims) => {
                if claims.exp - Utc::now().timestamp() > REFRESH_WINDOW_SECS {
                    let profile = self.enrich(claims.profile()).await;
                    return Ok((profile, None));
                }
                let (profile, token) = self.slide(claims).await?;
                let profile = self.enrich(profile).await;
                Ok((profile, Some(token)))
            }
            Err(error) => {
                // The token no longer validates (typically expired). Fall
                // back to the refresh grant carried inside it before
                // rejecting the request.
                let claims = self.signer.decode_unverified(token)?;
                match self.refresh_through_provider(&claims).await {
                    Ok(Some((profile, token))) => {
                        let profile = self.enrich(profile).await;
                        Ok((profile, Some(token)))
                    }
                    Ok(None) => Err(error),
                    Err(refresh_error) => {
                        debug!(%refresh_error, "session refresh failed");
                        Err(error)
                    }
                }
            }
        }
    }

    /// Forces a refresh regardless of remaining lifetime.
    pub async fn force_refresh(&self, token: &str) -> Result<(UserProfile, String)> {
        let claims = self.signer.validate(token)?;
        let (profile, token) = self.slide(claims).await?;
        let profile = self.enrich(profile).await;
        Ok((profile, token))
    }

    /// Verifies a local account password and returns its profile.
    pub async fn password_login(&self, username: &str, password: &str) -> Result<UserProfile> {
        let denied = || Error::Unauthenticated("invalid username or password".to_string());

        let user = self
            .repo
            .get_user(username)
            .await?
            .filter(|u| u.enabled && u.provider == "password")
            .ok_or_else(denied)?;
        let hash = user.password_hash.as_deref().ok_or_else(denied)?;
        let ok = bcrypt::verify(password, hash)
            .map_err(|e| Error::Upstream(anyhow::anyhow!("verify password: {e}")))?;
        if !ok {
            return Err(denied());
        }

        Ok(UserProfile {
            id: user.id.to_string(),
            username: user.username,
            display_name: user.display_name,
            provider: user.provider,
            groups: Vec::new(),
            roles: user.roles,
        })
    }

    /// Re-issues a token nearing expiry: through the provider's refresh
    /// grant when one is available, otherwise a plain re-issue of the same
    /// profile (for providers whose access does not expire).
    async fn slide(&self, claims: Claims) -> Result<(UserProfile, String)> {
        if let Some((profile, token)) = self.refresh_through_provider(&claims).await? {
            return Ok((profile, token));
        }
        let profile = claims.profile();
        let token = self.signer.issue(&profile, claims.refresh_token)?;
        Ok((profile, token))
    }

    /// Runs the provider refresh grant when the claims carry a refresh
    /// token and the provider is still enabled; `None` otherwise.
    async fn refresh_through_provider(
        &self,
        claims: &Claims,
    ) -> Result<Option<(UserProfile, String)>> {
        if !self.providers_enabled {
            return Ok(None);
        }
        let Some(refresh_token) = claims.refresh_token.clone() else {
            return Ok(None);
        };
        let Some(provider) = self
            .repo
            .get_provider(&claims.provider)
            .await?
            .filter(|p| p.enabled)
        else {
            return Ok(None);
        };

        let grant = self.oidc.refresh(&provider, &refresh_token).await?;
        let mut profile = self.oidc.userinfo(&provider, &grant.access_token).await?;
        profile.provider = provider.name.clone();

        // Some providers rotate refresh tokens only sometimes; keep the old
        // one when the response omits it.
        let refresh_token = grant
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or(refresh_token);
        let token = self.signer.issue(&profile, Some(refresh_token))?;
        Ok(Some((profile, token)))
    }

    /// Overlays the materialized role list from the user record, when one
    /// exists, so API-key style accounts keep working without bindings.
    async fn enrich(&self, mut profile: UserProfile) -> UserProfile {
        match self.repo.get_user(&profile.username).await {
            Ok(Some(user)) if !user.roles.is_empty() => profile.roles = user.roles,
            Ok(_) => {}
            Err(error) => warn!(%error, user = %profile.username, "user lookup failed"),
        }
        profile
    }
}
