//! Remote index sources.
//!
//! The resolver talks to an [`IndexSource`]; production uses
//! [`McpIndexClient`], tests substitute in-process fakes.
//!
//! ## Error taxonomy
//!
//! | Variant   | Cause                                              |
//! |-----------|----------------------------------------------------|
//! | Transport | connection, TLS, body read failures                |
//! | Status    | non-success HTTP status                            |
//! | Session   | handshake did not yield a session token            |
//! | Protocol  | no event-stream data line, unparseable payload     |
//! | Rpc       | JSON-RPC error envelope from the server            |
//!
//! None of these cross the [`IndexSource`] boundary: the client logs them,
//! drops its session and reports "no value".

mod client;
pub mod protocol;

use async_trait::async_trait;
use thiserror::Error;

use crate::period::Period;
use crate::types::IndexType;

pub use client::{McpClientConfig, McpIndexClient};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Non-success status {0}")]
    Status(u16),

    #[error("Session failure: {0}")]
    Session(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON-RPC error: {0}")]
    Rpc(String),
}

/// A source of authoritative index values.
#[async_trait]
pub trait IndexSource: Send + Sync {
    /// Whether this source can ever produce values for `index_type`.
    fn supports(&self, index_type: IndexType) -> bool;

    /// Fetch the value for `period`, or `None` when unavailable for any reason.
    async fn fetch(&self, index_type: IndexType, period: Period) -> Option<f64>;
}
