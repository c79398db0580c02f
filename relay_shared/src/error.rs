//! Semantic error types layered over `anyhow`-wrapped transport failures.
//!
//! Transport failures (connect/accept/read/write) propagate as
//! `anyhow::Error` with `.context(...)`, matching the rest of the codec.
//! `RelayError` exists for callers that need to distinguish "the peer hung
//! up" from "the peer sent garbage" without string-matching an anyhow chain.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("duplicate username: {0}")]
    DuplicateUsername(String),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
