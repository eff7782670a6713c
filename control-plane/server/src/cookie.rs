//! Minimal cookie plumbing for the session and OAuth-state cookies.

use axum::http::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};

pub const AUTH_TOKEN: &str = "auth_token";
pub const OAUTH_STATE: &str = "oauth_state";
pub const OAUTH_PROVIDER: &str = "oauth_provider";

/// TTL of the OAuth state/provider cookies.
pub const OAUTH_COOKIE_TTL_SECS: i64 = 600;

/// The value of `name` from the request's `Cookie` headers.
pub fn get(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
        .next()
}

/// A `Set-Cookie` value: HttpOnly, SameSite=Lax, path `/`.
pub fn set(name: &str, value: &str, max_age_secs: i64) -> HeaderValue {
    let cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear(name: &str) -> HeaderValue {
    set(name, "", 0)
}

/// Appends a `Set-Cookie` header to a response header map.
pub fn append(headers: &mut HeaderMap, value: HeaderValue) {
    headers.append(SET_COOKIE, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_finds_cookies_in_combined_and_separate_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, "a=1; auth_token=abc.def.ghi".parse().unwrap());
        headers.append(COOKIE, "oauth_state=xyz".parse().unwrap());

        assert_eq!(get(&headers, "auth_token").as_deref(), Some("abc.def.ghi"));
        assert_eq!(get(&headers, "oauth_state").as_deref(), Some("xyz"));
        assert_eq!(get(&headers, "a").as_deref(), Some("1"));
        assert_eq!(get(&headers, "missing"), None);
    }

    #[test]
    fn set_produces_scoped_http_only_cookies() {
        let value = set(AUTH_TOKEN, "token", 86400);
        let text = value.to_str().unwrap();
        assert!(text.starts_with("auth_token=token;"));
        assert!(text.contains("HttpOnly"));
        assert!(text.contains("SameSite=Lax"));
        assert!(text.contains("Max-Age=86400"));

        let cleared = clear(AUTH_TOKEN).to_str().unwrap().to_string();
        assert!(cleared.contains("Max-Age=0"));
    }
}
