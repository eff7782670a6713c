use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use kite_control_plane_authz::random_state;
use kite_control_plane_core::{Error, IdentityProviderRecord, UserProfile};
use serde::Deserialize;
use tracing::warn;

use crate::{cookie, ApiError, ApiResult, AppState};

/// GET /api/auth/providers
pub async fn providers(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let mut names: Vec<String> = if state.options.providers_enabled {
        state
            .repo
            .list_providers()
            .await?
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| p.name)
            .collect()
    } else {
        Vec::new()
    };
    if state.options.password_login_enabled {
        names.push("password".to_string());
    }
    Ok(Json(serde_json::json!({ "providers": names })))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    provider: Option<String>,
}

/// GET /api/auth/login: begins the authorization-code flow.
pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if !state.options.providers_enabled {
        return Err(Error::bad_input("identity providers are disabled").into());
    }
    let provider = match query.provider {
        Some(name) => lookup_provider(&state, &name).await?,
        None => default_provider(&state).await?,
    };

    let oauth_state = random_state();
    let auth_url = state
        .oidc
        .authorization_url(&provider, &callback_url(&headers), &oauth_state)
        .await?;

    let mut response = Json(serde_json::json!({
        "auth_url": auth_url,
        "provider": provider.name,
    }))
    .into_response();
    cookie::append(
        response.headers_mut(),
        cookie::set(cookie::OAUTH_STATE, &oauth_state, cookie::OAUTH_COOKIE_TTL_SECS),
    );
    cookie::append(
        response.headers_mut(),
        cookie::set(
            cookie::OAUTH_PROVIDER,
            &provider.name,
            cookie::OAUTH_COOKIE_TTL_SECS,
        ),
    );
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: String,
    #[serde(default)]
    state: String,
}

/// GET /api/auth/callback: completes the flow; failures redirect back to
/// the login page with an error kind.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    match complete_login(&state, &query, &headers).await {
        Ok(token) => {
            let mut response = Redirect::to("/").into_response();
            cookie::append(
                response.headers_mut(),
                cookie::set(cookie::AUTH_TOKEN, &token, state.options.session_ttl_secs),
            );
            cookie::append(response.headers_mut(), cookie::clear(cookie::OAUTH_STATE));
            cookie::append(response.headers_mut(), cookie::clear(cookie::OAUTH_PROVIDER));
            response
        }
        Err(error) => {
            warn!(error = %error.0, "login callback failed");
            Redirect::to(&format!("/login?error={}", error_kind(&error.0))).into_response()
        }
    }
}

async fn complete_login(
    state: &AppState,
    query: &CallbackQuery,
    headers: &HeaderMap,
) -> ApiResult<String> {
    let expected = cookie::get(headers, cookie::OAUTH_STATE)
        .ok_or_else(|| Error::bad_input("missing oauth state cookie"))?;
    if expected != query.state {
        return Err(Error::bad_input("oauth state mismatch").into());
    }

    // Old UI builds may have been issued a state cookie without a provider
    // cookie; fall back to the default provider for those.
    let provider = match cookie::get(headers, cookie::OAUTH_PROVIDER) {
        Some(name) => lookup_provider(state, &name).await?,
        None => default_provider(state).await?,
    };

    let grant = state
        .oidc
        .exchange_code(&provider, &query.code, &callback_url(headers))
        .await?;
    let mut profile = state.oidc.userinfo(&provider, &grant.access_token).await?;
    profile.provider = provider.name.clone();

    Ok(state.sessions.issue(&profile, grant.refresh_token)?)
}

#[derive(Debug, Deserialize)]
pub struct PasswordLogin {
    username: String,
    password: String,
}

/// POST /api/auth/login/password
pub async fn password_login(
    State(state): State<AppState>,
    Json(body): Json<PasswordLogin>,
) -> ApiResult<Response> {
    if !state.options.password_login_enabled {
        return Err(Error::bad_input("password login is disabled").into());
    }
    let profile = state
        .sessions
        .password_login(&body.username, &body.password)
        .await?;
    let token = state.sessions.issue(&profile, None)?;

    let mut response = Json(profile).into_response();
    cookie::append(
        response.headers_mut(),
        cookie::set(cookie::AUTH_TOKEN, &token, state.options.session_ttl_secs),
    );
    Ok(response)
}

/// POST /api/auth/logout
pub async fn logout() -> Response {
    let mut response = Json(serde_json::json!({ "ok": true })).into_response();
    cookie::append(response.headers_mut(), cookie::clear(cookie::AUTH_TOKEN));
    response
}

/// POST /api/auth/refresh: forces a sliding refresh of the current token.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let token = cookie::get(&headers, cookie::AUTH_TOKEN)
        .ok_or_else(|| Error::Unauthenticated("missing session token".to_string()))?;
    let (profile, token) = state.sessions.force_refresh(&token).await?;

    let mut response = Json(profile).into_response();
    cookie::append(
        response.headers_mut(),
        cookie::set(cookie::AUTH_TOKEN, &token, state.options.session_ttl_secs),
    );
    Ok(response)
}

/// GET /api/auth/user
pub async fn user(Extension(profile): Extension<UserProfile>) -> Json<UserProfile> {
    Json(profile)
}

async fn lookup_provider(state: &AppState, name: &str) -> ApiResult<IdentityProviderRecord> {
    let provider = state
        .repo
        .get_provider(name)
        .await?
        .filter(|p| p.enabled)
        .ok_or_else(|| Error::not_found(format!("identity provider {name:?}")))?;
    provider.validate()?;
    Ok(provider)
}

async fn default_provider(state: &AppState) -> ApiResult<IdentityProviderRecord> {
    state
        .repo
        .list_providers()
        .await?
        .into_iter()
        .find(|p| p.enabled)
        .ok_or_else(|| ApiError(Error::bad_input("no identity provider configured")))
}

/// Absolute callback URL derived from the request's host.
fn callback_url(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}/api/auth/callback")
}

/// Short error kind carried in the failure redirect.
fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::NotFound(_) => "not_found",
        Error::Unauthenticated(_) => "unauthenticated",
        Error::Forbidden(_) => "forbidden",
        Error::Conflict(_) => "conflict",
        Error::BadInput(_) => "bad_request",
        Error::Upstream(_) => "upstream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_url_honors_forwarded_proto() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::HOST, "kite.example.com".parse().unwrap());
        assert_eq!(
            callback_url(&headers),
            "http://kite.example.com/api/auth/callback"
        );

        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert_eq!(
            callback_url(&headers),
            "https://kite.example.com/api/auth/callback"
        );
    }

    #[test]
    fn error_kinds_are_stable_strings() {
        assert_eq!(error_kind(&Error::bad_input("x")), "bad_request");
        assert_eq!(
            error_kind(&Error::Unauthenticated("x".to_string())),
            "unauthenticated"
        );
    }
}
