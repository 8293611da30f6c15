//! # manta-cluster
//!
//! Connection management, pooling, and cluster topology monitoring for
//! the Manta driver core.
//!
//! This crate provides:
//! - Abstract collaborator interfaces: wire channels, credential
//!   providers, health probes
//! - The connection state machine with per-database authentication rules
//! - A per-server connection pool with request pinning and background
//!   eviction
//! - Per-server heartbeat monitors feeding immutable topology snapshots
//! - Composable server selection with a timeout distinct from
//!   connectivity failures
//!
//! ## Example
//!
//! ```rust,ignore
//! use manta_cluster::prelude::*;
//!
//! let cluster = Cluster::new(ClusterConfig::default(), probe, seeds);
//! let server = cluster.select_server(&WritableSelector).await?;
//! let pool = ConnectionPool::new(server.endpoint, PoolConfig::default(), factory, provider);
//! let connection = pool.acquire("orders", Some(&credential), None).await?;
//! ```

pub mod channel;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod selector;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelError, ChannelFactory, WireChannel};
pub use cluster::{Cluster, ClusterDescription};
pub use config::{ClusterConfig, PoolConfig};
pub use connection::{Connection, ConnectionState};
pub use credential::{Credential, CredentialProvider};
pub use error::{ClusterError, ClusterResult};
pub use pool::{ConnectionPool, RequestScope, SharedConnection};
pub use selector::{
    CompositeSelector, EndpointSelector, LatencySelector, ReadPreference, ReadPreferenceSelector,
    ServerSelector, WritableSelector,
};
pub use server::{
    HealthProbe, HeartbeatReply, ServerDescription, ServerEndpoint, ServerState, ServerType,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::channel::{ChannelError, ChannelFactory, WireChannel};
    pub use crate::cluster::{Cluster, ClusterDescription};
    pub use crate::config::{ClusterConfig, PoolConfig};
    pub use crate::connection::{Connection, ConnectionState};
    pub use crate::credential::{Credential, CredentialProvider};
    pub use crate::error::{ClusterError, ClusterResult};
    pub use crate::pool::{ConnectionPool, RequestScope};
    pub use crate::selector::{
        EndpointSelector, LatencySelector, ReadPreference, ReadPreferenceSelector, ServerSelector,
        WritableSelector,
    };
    pub use crate::server::{
        HealthProbe, HeartbeatReply, ServerDescription, ServerEndpoint, ServerState, ServerType,
    };
}
