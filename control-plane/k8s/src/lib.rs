//! Cluster lifecycle management for the Kite control plane.
//!
//! Owns the live map of per-cluster client bundles and keeps it converged
//! with the repository's cluster records: bundles are built for enabled
//! records, wholesale-replaced on credential or metrics-endpoint drift, and
//! disposed when a record is removed or disabled.
//!
//! ```text
//! [ ClusterRecord ] --reconcile--> [ ClientBundle ] --get(name)--> handlers
//! ```
//!
//! Reconciliation runs on a single task, woken by a 60 s timer or a
//! one-slot coalescing signal; readers resolve bundles by name through a
//! read lock and never observe a bundle mutating in place.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod bundle;
mod import;
mod manager;

#[cfg(test)]
mod tests;

pub use self::{
    bundle::{ClientBundle, MetricsClient},
    import::split_contexts,
    manager::{manager, ClusterManager, ClusterSummary, Reconciler},
};
