use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kite_control_plane_core::Error;

use crate::{ApiResult, AppState, ServerOptions};

/// POST /api/webhook/clusters/sync: basic-auth trigger for an immediate
/// cluster reconciliation and catalog refresh.
pub async fn sync_clusters(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    check_basic_auth(&headers, &state.options)?;
    state.clusters.poke();
    state.authz.poke();
    Ok(Json(serde_json::json!({ "status": "syncing" })))
}

fn check_basic_auth(headers: &HeaderMap, options: &ServerOptions) -> Result<(), Error> {
    let (Some(expected_user), Some(expected_password)) =
        (&options.webhook_user, &options.webhook_password)
    else {
        return Err(Error::Unauthenticated(
            "webhook credentials are not configured".to_string(),
        ));
    };

    let denied = || Error::Unauthenticated("invalid webhook credentials".to_string());
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or_else(denied)?;
    let decoded = BASE64
        .decode(header)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(denied)?;
    let (user, password) = decoded.split_once(':').ok_or_else(denied)?;

    if user == expected_user && password == expected_password {
        Ok(())
    } else {
        Err(denied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(user: Option<&str>, password: Option<&str>) -> ServerOptions {
        ServerOptions {
            readonly: false,
            providers_enabled: true,
            password_login_enabled: true,
            analytics_enabled: false,
            node_terminal_image: "ubuntu:24.04".to_string(),
            webhook_user: user.map(str::to_string),
            webhook_password: password.map(str::to_string),
            session_ttl_secs: 86_400,
        }
    }

    fn basic(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", BASE64.encode(format!("{user}:{password}")));
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn valid_credentials_pass() {
        let options = options(Some("hook"), Some("s3cret"));
        assert!(check_basic_auth(&basic("hook", "s3cret"), &options).is_ok());
    }

    #[test]
    fn bad_or_missing_credentials_are_rejected() {
        let options = options(Some("hook"), Some("s3cret"));
        assert!(check_basic_auth(&basic("hook", "wrong"), &options).is_err());
        assert!(check_basic_auth(&HeaderMap::new(), &options).is_err());

        // An unconfigured webhook rejects everything.
        let disabled = options_without();
        assert!(check_basic_auth(&basic("hook", "s3cret"), &disabled).is_err());
    }

    fn options_without() -> ServerOptions {
        options(None, None)
    }
}
