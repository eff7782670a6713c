use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use kite_control_plane_authz::{catalog, OidcClient, SessionManager, TokenSigner};
use kite_control_plane_k8s::manager;
use kite_control_plane_server::{serve, AppState, ServerOptions};
use kite_control_plane_store::{ensure_local_admin, ensure_system_roles, SecretCipher};
use kite_control_plane_stream::PortForwardManager;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[clap(name = "kite", about = "Multi-cluster Kubernetes dashboard control plane")]
pub struct Args {
    #[clap(long, default_value = "kite=info,warn", env = "KITE_LOG")]
    log_level: String,

    #[clap(long, default_value = "8080", env = "KITE_BIND_PORT")]
    bind_port: u16,

    /// Symmetric secret for session tokens. The process refuses to start
    /// without one.
    #[clap(long, env = "KITE_JWT_SIGNING_SECRET")]
    jwt_signing_secret: String,

    #[clap(long, default_value = "86400", env = "KITE_SESSION_TTL_SECONDS")]
    session_ttl_seconds: i64,

    /// Master switch for identity-provider flows.
    #[clap(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "KITE_IDENTITY_PROVIDERS_ENABLED"
    )]
    identity_providers_enabled: bool,

    /// Enables the built-in local account.
    #[clap(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "KITE_PASSWORD_LOGIN_ENABLED"
    )]
    password_login_enabled: bool,

    #[clap(long, default_value = "admin", env = "KITE_LOCAL_ADMIN_USER")]
    local_admin_user: String,

    /// Bootstraps the local super-user when the user table is empty.
    #[clap(long, env = "KITE_LOCAL_ADMIN_PASSWORD")]
    local_admin_password: Option<String>,

    /// Repository backend: `postgres` or `memory`.
    #[clap(long, default_value = "memory", env = "KITE_DATABASE_KIND")]
    database_kind: String,

    #[clap(long, default_value = "", env = "KITE_DATABASE_DSN")]
    database_dsn: String,

    /// Injects the analytics snippet into the index page.
    #[clap(long, env = "KITE_ANALYTICS_ENABLED")]
    analytics_enabled: bool,

    /// Rejects all non-idempotent API methods with 403.
    #[clap(long, env = "KITE_READONLY_MODE")]
    readonly_mode: bool,

    /// Container image for node-terminal agent pods.
    #[clap(
        long,
        default_value = "docker.io/library/ubuntu:24.04",
        env = "KITE_NODE_TERMINAL_IMAGE"
    )]
    node_terminal_image: String,

    #[clap(long, env = "KITE_WEBHOOK_USER")]
    webhook_user: Option<String>,

    #[clap(long, env = "KITE_WEBHOOK_PASSWORD")]
    webhook_password: Option<String>,

    /// Key for secret fields at rest; defaults to the signing secret.
    #[clap(long, env = "KITE_ENCRYPTION_SECRET")]
    encryption_secret: Option<String>,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            bind_port,
            jwt_signing_secret,
            session_ttl_seconds,
            identity_providers_enabled,
            password_login_enabled,
            local_admin_user,
            local_admin_password,
            database_kind,
            database_dsn,
            analytics_enabled,
            readonly_mode,
            node_terminal_image,
            webhook_user,
            webhook_password,
            encryption_secret,
        } = self;

        tracing_subscriber::registry()
            .with(EnvFilter::new(&log_level))
            .with(fmt::layer())
            .init();

        if jwt_signing_secret.is_empty() {
            bail!("a jwt signing secret is required");
        }

        // Durable storage plus first-start bootstrap.
        let cipher =
            SecretCipher::new(encryption_secret.as_deref().unwrap_or(&jwt_signing_secret));
        let repo = kite_control_plane_store::open(&database_kind, &database_dsn, cipher).await?;
        ensure_system_roles(repo.as_ref()).await?;
        if password_login_enabled {
            if let Some(password) = &local_admin_password {
                ensure_local_admin(repo.as_ref(), &local_admin_user, password).await?;
            }
        }

        // The two background reconciliation tasks.
        let (authz, refresher) = catalog(repo.clone());
        tokio::spawn(refresher.run().instrument(info_span!("authz_catalog")));

        let (clusters, reconciler) = manager(repo.clone());
        tokio::spawn(reconciler.run().instrument(info_span!("cluster_manager")));

        let oidc = OidcClient::new();
        let sessions = Arc::new(SessionManager::new(
            TokenSigner::new(&jwt_signing_secret, session_ttl_seconds),
            repo.clone(),
            oidc.clone(),
            identity_providers_enabled,
        ));
        let forwards = Arc::new(PortForwardManager::new());

        let state = AppState {
            repo,
            authz,
            sessions,
            clusters: clusters.clone(),
            forwards: forwards.clone(),
            oidc,
            options: Arc::new(ServerOptions {
                readonly: readonly_mode,
                providers_enabled: identity_providers_enabled,
                password_login_enabled,
                analytics_enabled,
                node_terminal_image,
                webhook_user,
                webhook_password,
                session_ttl_secs: session_ttl_seconds,
            }),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], bind_port));
        let (signal, watch) = drain::channel();
        let server = tokio::spawn(serve(addr, state, watch).instrument(info_span!("server")));

        tokio::signal::ctrl_c().await?;
        info!("shutting down");

        // Cancel streaming sessions and port-forward loops so the server
        // can finish draining, then wait for it.
        forwards.stop_all();
        clusters.dispose_all();
        signal.drain().await;
        server.await??;
        Ok(())
    }
}
