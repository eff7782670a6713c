//! Core domain model for the Kite control plane.
//!
//! This crate holds the entity records persisted by the repository, the
//! error taxonomy shared by every other crate, and the [`Repository`]
//! abstraction over durable storage. It deliberately has no Kubernetes,
//! HTTP, or database dependencies: the heavier crates all depend on this
//! one, never the other way around.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster;
mod error;
mod provider;
mod repository;
mod role;
mod secret;
mod user;

pub use self::{
    cluster::{ClusterRecord, NewCluster},
    error::{Error, Result},
    provider::IdentityProviderRecord,
    repository::Repository,
    role::{NewBinding, NewRole, Role, SubjectBinding, SubjectKind},
    secret::Secret,
    user::{NewUser, UserProfile, UserRecord},
};

/// Sentinel namespace meaning "no namespace restriction".
pub const ALL_NAMESPACES: &str = "_all";

/// Wildcard entry in a role dimension.
pub const WILDCARD: &str = "*";
