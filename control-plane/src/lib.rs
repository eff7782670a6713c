//! Composition root for the Kite control plane.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use kite_control_plane_authz as authz;
pub use kite_control_plane_core as core;
pub use kite_control_plane_k8s as k8s;
pub use kite_control_plane_server as server;
pub use kite_control_plane_store as store;
pub use kite_control_plane_stream as stream;

mod args;

pub use self::args::Args;
