//! Streaming session substrate for the Kite control plane.
//!
//! A streaming session is a duplex channel between one client connection
//! and a Kubernetes resource. Three variants share the same envelope
//! format:
//!
//! - multi-pod log fan-in ([`logs`]),
//! - interactive exec/attach terminals ([`terminal`]),
//! - node terminals that bootstrap a privileged agent pod before attaching
//!   ([`node`]).
//!
//! Sessions speak [`Envelope`]s over a pair of bounded channels
//! ([`SessionIo`]); the HTTP layer adapts those channels onto a WebSocket.
//! Port-forward sessions ([`forward`]) are registry state rather than
//! envelope streams.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod envelope;
pub mod forward;
pub mod logs;
pub mod node;
mod session;
pub mod terminal;

pub use self::{
    envelope::{Envelope, TerminalDimensions},
    forward::{PortForwardManager, PortForwardSession, PortPair},
    session::SessionIo,
};
