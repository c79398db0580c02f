//! `relay_server`
//!
//! Server-side systems:
//! - Shared client/group registry behind a single lock
//! - Per-connection handler implementing the instruction/data protocol
//! - UDP presence beacon
//!
//! Networking model:
//! - TCP: both control plane and data plane, length-prefixed JSON frames
//! - UDP: discovery only

pub mod handler;
pub mod registry;
pub mod server;

pub use registry::Registry;
pub use server::RelayServer;
