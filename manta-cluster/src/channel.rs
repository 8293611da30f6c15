//! The wire channel abstraction.
//!
//! The core does not specify the byte-level transport; it only requires a
//! request/response channel whose connectivity failures are distinguishable
//! from protocol failures, since the former escalate to topology
//! invalidation while the latter stay with the operation.

use async_trait::async_trait;
use thiserror::Error;

use crate::server::ServerEndpoint;

/// Transport errors.
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    /// A socket-level failure: the server may be unreachable.
    #[error("i/o failure: {0}")]
    Io(String),

    /// The peer answered, but not with a valid response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The channel was closed.
    #[error("channel is closed")]
    Closed,
}

impl ChannelError {
    /// Whether this error suggests the server itself is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Closed)
    }
}

/// A request/response transport to one server process.
///
/// Responses correlate to requests one-to-one. Cancellation is the
/// caller's concern: wrap calls in a timeout and drop the future.
#[async_trait]
pub trait WireChannel: Send + Sync {
    /// Send one request.
    async fn send(&mut self, request: &[u8]) -> Result<(), ChannelError>;

    /// Receive the response to the last request.
    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError>;

    /// Close the channel. Best-effort; errors are discarded.
    async fn close(&mut self);
}

/// Opens wire channels to server endpoints.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Open a channel to an endpoint.
    async fn connect(&self, endpoint: &ServerEndpoint) -> Result<Box<dyn WireChannel>, ChannelError>;
}
