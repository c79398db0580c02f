//! `relay_client`
//!
//! Client-side systems:
//! - Master/slave connection management
//! - Single-flight-locked control RPCs
//! - Background receive pipeline (N reader tasks + one orchestrator)
//! - UDP presence beacon

pub mod client;

pub use client::{ChatAgent, NullRecvHandler, RecvHandler};
