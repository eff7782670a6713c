//! Repository backends for the Kite control plane.
//!
//! Two implementations of [`kite_control_plane_core::Repository`]: a
//! Postgres backend (sqlx) used in production and an in-memory backend used
//! by tests and development. Secret-typed columns are encrypted at rest
//! with AES-256-GCM keyed by a process secret and decrypt transparently on
//! read.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod bootstrap;
mod crypto;
mod mem;
mod postgres;

#[cfg(test)]
mod tests;

pub use self::{
    bootstrap::{ensure_local_admin, ensure_system_roles},
    crypto::SecretCipher,
    mem::MemRepository,
    postgres::PgRepository,
};

use std::sync::Arc;

use kite_control_plane_core::{Error, Repository, Result};

/// Opens the repository backend selected by `database-kind`.
pub async fn open(kind: &str, dsn: &str, cipher: SecretCipher) -> Result<Arc<dyn Repository>> {
    match kind {
        "memory" => Ok(Arc::new(MemRepository::default())),
        "postgres" => {
            let repo = PgRepository::connect(dsn, cipher).await.map_err(Error::Upstream)?;
            Ok(Arc::new(repo))
        }
        other => Err(Error::bad_input(format!(
            "unsupported database kind {other:?} (expected postgres or memory)"
        ))),
    }
}
