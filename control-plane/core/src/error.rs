pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by all control-plane crates.
///
/// Handlers translate these kinds into HTTP statuses; streaming handlers
/// translate them into `error` envelopes before closing the session.
/// Background loops never propagate; they log and continue.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity (cluster, role, user, resource) is absent.
    #[error("{0} not found")]
    NotFound(String),

    /// Missing, malformed, or unverifiable session token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// An access check failed; carries the human-readable diagnostic.
    #[error("{0}")]
    Forbidden(String),

    /// Unique-constraint collision, e.g. a duplicate cluster name.
    #[error("{0} already exists")]
    Conflict(String),

    /// Malformed request body or query parameter.
    #[error("{0}")]
    BadInput(String),

    /// A Kubernetes or identity-provider call failed.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }
}
