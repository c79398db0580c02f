//! `relay_shared`
//!
//! Library shared by the relay client and server.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (wire codec, protocol types, socket pool,
//!   discovery, config).
//! - Traits for abstraction and dependency injection.
//! - No `unsafe`.

pub mod config;
pub mod discovery;
pub mod error;
pub mod net;
pub mod protocol;
pub mod socket_pool;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::discovery::{BeaconKind, DiscoveryBeacon, DiscoveryConfig, DiscoveryHandler};
    pub use crate::error::RelayError;
    pub use crate::net::{Conn, ConnReader, ConnWriter, Listener};
    pub use crate::protocol::*;
    pub use crate::socket_pool::SocketPool;
}
