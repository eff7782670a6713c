use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use kite_control_plane_core::Error;

use crate::{cookie, ApiError, AppState};

/// Validates the session (cookie or bearer token), applies the sliding
/// refresh, and injects the authenticated [`UserProfile`] into request
/// extensions. A refreshed token rides back on the response as a new
/// `auth_token` cookie.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)
        .or_else(|| cookie::get(request.headers(), cookie::AUTH_TOKEN))
        .ok_or_else(|| Error::Unauthenticated("missing session token".to_string()))?;

    let (profile, renewed) = state.sessions.authenticate(&token).await?;
    request.extensions_mut().insert(profile);

    let mut response = next.run(request).await;
    if let Some(renewed) = renewed {
        cookie::append(
            response.headers_mut(),
            cookie::set(cookie::AUTH_TOKEN, &renewed, state.options.session_ttl_secs),
        );
    }
    Ok(response)
}

/// In readonly mode every non-idempotent method is rejected with 403.
pub async fn readonly_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.options.readonly && !is_idempotent(request.method()) {
        return Err(ApiError(Error::Forbidden(
            "the control plane is in readonly mode".to_string(),
        )));
    }
    Ok(next.run(request).await)
}

fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_safe_methods_pass_the_readonly_guard() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::HEAD));
        assert!(is_idempotent(&Method::OPTIONS));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PUT));
        assert!(!is_idempotent(&Method::PATCH));
        assert!(!is_idempotent(&Method::DELETE));
    }
}
