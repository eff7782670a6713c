//! Authorization engine for the Kite control plane.
//!
//! Maintains the role catalog and subject-binding set in memory, answers
//! access checks against an immutable published snapshot, and owns the
//! session-token lifecycle: issuance, validation, and sliding refresh tied
//! to an upstream identity provider's refresh grant.
//!
//! The catalog is reloaded by a single refresher task on a one-slot
//! coalescing signal; each reload builds a fresh [`Snapshot`] and publishes
//! it over a watch channel, so concurrent readers never take a lock.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod engine;
mod oidc;
mod session;
mod snapshot;


pub use self::{
    engine::{catalog, AuthzEngine, CatalogRefresher},
    oidc::{random_state, OidcClient, ProviderEndpoints, TokenGrant},
    session::{Claims, SessionManager, TokenSigner},
    snapshot::Snapshot,
};
