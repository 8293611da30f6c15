//! Server descriptions: immutable snapshots of one server's observed state.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelError;

/// A server's network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl ServerEndpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The role a server reported in its last heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerType {
    /// A standalone server.
    Standalone,
    /// The writable primary of a replica set.
    Primary,
    /// A readable secondary of a replica set.
    Secondary,
    /// A non-data-bearing arbiter.
    Arbiter,
    /// Role unknown (not yet contacted, or last heartbeat failed).
    Unknown,
}

impl ServerType {
    /// Whether writes can be sent to this server.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Standalone | Self::Primary)
    }

    /// Whether reads can be sent to this server.
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::Standalone | Self::Primary | Self::Secondary)
    }
}

/// Monitor-observed connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    /// Not reachable, or not yet contacted.
    Disconnected,
    /// A first heartbeat is in progress.
    Connecting,
    /// The last heartbeat succeeded.
    Connected,
}

/// One server's observed state. Descriptions are immutable: a heartbeat
/// outcome produces a new description that replaces the old one in the
/// cluster snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescription {
    /// The server's address.
    pub endpoint: ServerEndpoint,
    /// The reported role.
    pub server_type: ServerType,
    /// The connectivity state.
    pub state: ServerState,
    /// Round-trip latency of the last successful heartbeat.
    pub latency: Option<Duration>,
    /// The last heartbeat error, if the server is unreachable.
    pub last_error: Option<String>,
}

impl ServerDescription {
    /// The initial description: unknown and disconnected.
    pub fn unknown(endpoint: ServerEndpoint) -> Self {
        Self {
            endpoint,
            server_type: ServerType::Unknown,
            state: ServerState::Disconnected,
            latency: None,
            last_error: None,
        }
    }

    /// A description for a heartbeat in progress.
    pub fn connecting(endpoint: ServerEndpoint) -> Self {
        Self {
            endpoint,
            server_type: ServerType::Unknown,
            state: ServerState::Connecting,
            latency: None,
            last_error: None,
        }
    }

    /// A description after a successful heartbeat.
    pub fn connected(endpoint: ServerEndpoint, server_type: ServerType, latency: Duration) -> Self {
        Self {
            endpoint,
            server_type,
            state: ServerState::Connected,
            latency: Some(latency),
            last_error: None,
        }
    }

    /// A description after a failed heartbeat.
    pub fn unreachable(endpoint: ServerEndpoint, error: impl Into<String>) -> Self {
        Self {
            endpoint,
            server_type: ServerType::Unknown,
            state: ServerState::Disconnected,
            latency: None,
            last_error: Some(error.into()),
        }
    }

    /// Whether operations can be routed to this server.
    pub fn is_available(&self) -> bool {
        self.state == ServerState::Connected && self.server_type != ServerType::Unknown
    }
}

/// A successful heartbeat's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatReply {
    /// The role the server reported.
    pub server_type: ServerType,
    /// The round-trip time of the exchange.
    pub latency: Duration,
}

/// The monitor's hello round-trip, abstracted so tests can script it.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check one server's health.
    async fn check(&self, endpoint: &ServerEndpoint) -> Result<HeartbeatReply, ChannelError>;
}
