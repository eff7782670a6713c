use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kite_control_plane_authz::{catalog, OidcClient, SessionManager, TokenSigner};
use kite_control_plane_k8s::manager;
use kite_control_plane_store::{ensure_local_admin, ensure_system_roles, MemRepository};
use kite_control_plane_stream::PortForwardManager;
use tower::ServiceExt;

use crate::{router, AppState, ServerOptions};

async fn mk_state(readonly: bool) -> AppState {
    let repo = Arc::new(MemRepository::default());
    ensure_system_roles(repo.as_ref()).await.unwrap();
    ensure_local_admin(repo.as_ref(), "admin", "hunter2")
        .await
        .unwrap();

    let (authz, refresher) = catalog(repo.clone());
    refresher.reload().await;

    let (clusters, _reconciler) = manager(repo.clone());
    let sessions = Arc::new(SessionManager::new(
        TokenSigner::new("test-secret", 86_400),
        repo.clone(),
        OidcClient::new(),
        true,
    ));

    AppState {
        repo,
        authz,
        sessions,
        clusters,
        forwards: Arc::new(PortForwardManager::new()),
        oidc: OidcClient::new(),
        options: Arc::new(ServerOptions {
            readonly,
            providers_enabled: true,
            password_login_enabled: true,
            analytics_enabled: false,
            node_terminal_image: "ubuntu:24.04".to_string(),
            webhook_user: Some("hook".to_string()),
            webhook_password: Some("s3cret".to_string()),
            session_ttl_secs: 86_400,
        }),
    }
}

/// Logs the bootstrapped admin in and returns the session cookie.
async fn login(state: &AppState) -> String {
    let response = router(state.clone())
        .oneshot(
            Request::post("/api/auth/login/password")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"username": "admin", "password": "hunter2"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("a session cookie");
    cookie
        .split(';')
        .next()
        .expect("cookie value")
        .to_string()
}

#[tokio::test]
async fn healthz_is_public() {
    let state = mk_state(false).await;
    let response = router(state)
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_routes_require_a_session() {
    let state = mk_state(false).await;
    let response = router(state)
        .oneshot(Request::get("/api/v1/clusters").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn password_login_yields_a_working_session() {
    let state = mk_state(false).await;
    let cookie = login(&state).await;

    let response = router(state.clone())
        .oneshot(
            Request::get("/api/auth/user")
                .header(COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The bootstrapped admin sees the (empty) cluster list rather than a
    // 401/403.
    let response = router(state)
        .oneshot(
            Request::get("/api/v1/clusters")
                .header(COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"[]");
}

#[tokio::test]
async fn wrong_password_is_unauthenticated() {
    let state = mk_state(false).await;
    let response = router(state)
        .oneshot(
            Request::post("/api/auth/login/password")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"username": "admin", "password": "nope"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_tokens_are_accepted_too() {
    let state = mk_state(false).await;
    let profile = state
        .sessions
        .password_login("admin", "hunter2")
        .await
        .unwrap();
    let token = state.sessions.issue(&profile, None).unwrap();

    let response = router(state)
        .oneshot(
            Request::get("/api/v1/clusters")
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn readonly_mode_rejects_mutations_but_not_reads() {
    let state = mk_state(true).await;
    let cookie = login(&state).await;

    let response = router(state.clone())
        .oneshot(
            Request::post("/api/v1/clusters/import")
                .header(COOKIE, &cookie)
                .body(Body::from("apiVersion: v1"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router(state)
        .oneshot(
            Request::get("/api/v1/clusters")
                .header(COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn viewer_roles_cannot_import_clusters() {
    let state = mk_state(false).await;
    state
        .repo
        .create_user(kite_control_plane_core::NewUser {
            username: "viewer".to_string(),
            display_name: "viewer".to_string(),
            provider: "password".to_string(),
            password_hash: None,
            roles: vec!["viewer".to_string()],
        })
        .await
        .unwrap();
    let profile = kite_control_plane_core::UserProfile {
        id: "2".to_string(),
        username: "viewer".to_string(),
        display_name: "viewer".to_string(),
        provider: "password".to_string(),
        groups: Vec::new(),
        roles: vec!["viewer".to_string()],
    };
    let token = state.sessions.issue(&profile, None).unwrap();

    let response = router(state)
        .oneshot(
            Request::post("/api/v1/clusters/import")
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::from("apiVersion: v1"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_requires_basic_auth() {
    let state = mk_state(false).await;
    let response = router(state.clone())
        .oneshot(
            Request::post("/api/webhook/clusters/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let credentials = BASE64.encode("hook:s3cret");
    let response = router(state)
        .oneshot(
            Request::post("/api/webhook/clusters/sync")
                .header(AUTHORIZATION, format!("Basic {credentials}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn providers_lists_the_password_provider() {
    let state = mk_state(false).await;
    let response = router(state)
        .oneshot(
            Request::get("/api/auth/providers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["providers"], serde_json::json!(["password"]));
}
