//! The connection state machine.
//!
//! A connection moves `Created → Open → (Authenticating)* → Ready →
//! Closed`. Authentication state is tracked per database name with the
//! admin-exclusivity rules: a connection is only ever in one of three
//! authentication configurations: no authentications at all, a single
//! authentication against `admin`, or one authentication per non-admin
//! database.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use crate::channel::{ChannelError, WireChannel};
use crate::credential::{Credential, CredentialProvider};
use crate::error::{ClusterError, ClusterResult};
use crate::server::ServerEndpoint;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, no channel attached yet.
    Created,
    /// Channel attached, no authentication performed.
    Open,
    /// An authentication exchange is in flight.
    Authenticating,
    /// Usable for operations.
    Ready,
    /// Closed; never reused.
    Closed,
}

/// A single transport to one server, with per-database authentication
/// state.
pub struct Connection {
    id: u64,
    endpoint: ServerEndpoint,
    generation: u64,
    state: ConnectionState,
    channel: Option<Box<dyn WireChannel>>,
    authentications: HashMap<String, Credential>,
    created_at: Instant,
    last_used: Instant,
    had_socket_error: bool,
}

impl Connection {
    /// Create a connection record; attach its channel with
    /// [`open`](Self::open).
    pub fn new(id: u64, endpoint: ServerEndpoint, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            endpoint,
            generation,
            state: ConnectionState::Created,
            channel: None,
            authentications: HashMap::new(),
            created_at: now,
            last_used: now,
            had_socket_error: false,
        }
    }

    /// Attach the connected channel.
    pub fn open(&mut self, channel: Box<dyn WireChannel>) -> ClusterResult<()> {
        if self.state != ConnectionState::Created {
            return Err(ClusterError::invalid_state("open called more than once"));
        }
        self.channel = Some(channel);
        self.state = ConnectionState::Open;
        debug!(connection = self.id, endpoint = %self.endpoint, "connection opened");
        Ok(())
    }

    /// The connection's pool-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The server this connection talks to.
    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// The pool generation this connection was created under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// When the connection was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the connection was last returned to its pool.
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Refresh the last-used timestamp.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Whether a socket-level failure was observed on this connection.
    pub fn had_socket_error(&self) -> bool {
        self.had_socket_error
    }

    /// Databases this connection is authenticated against.
    pub fn authenticated_databases(&self) -> impl Iterator<Item = &str> {
        self.authentications.keys().map(String::as_str)
    }

    /// Whether the connection already satisfies the requested
    /// authentication.
    pub fn is_authenticated_for(&self, database: &str, credential: Option<&Credential>) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        match credential {
            None => self.authentications.is_empty(),
            Some(credential) => {
                let auth_db = credential.authentication_database(database);
                self.authentications.get(auth_db) == Some(credential)
            }
        }
    }

    /// Whether the connection could legally take on the requested
    /// authentication.
    ///
    /// The valid configurations are: no authentications; a single admin
    /// authentication; or one authentication per non-admin database. New
    /// admin credentials are refused once anything else is authenticated,
    /// and an admin-authenticated connection takes nothing further.
    pub fn can_authenticate(&self, database: &str, credential: Option<&Credential>) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        if self.authentications.is_empty() {
            return true;
        }
        let Some(credential) = credential else {
            // an authenticated connection can't serve credential-less use
            return false;
        };
        if credential.use_admin {
            return false;
        }
        if self.authentications.contains_key("admin") {
            return false;
        }
        !self
            .authentications
            .contains_key(credential.authentication_database(database))
    }

    /// Ensure the requested authentication, performing the exchange if
    /// needed. This is the slow step a pool runs outside its own lock.
    pub async fn ensure_authenticated(
        &mut self,
        database: &str,
        credential: Option<&Credential>,
        provider: &dyn CredentialProvider,
    ) -> ClusterResult<()> {
        if self.state == ConnectionState::Closed {
            return Err(ClusterError::ConnectionClosed);
        }

        let Some(credential) = credential else {
            if !self.authentications.is_empty() {
                return Err(ClusterError::AuthenticationConflict(database.to_string()));
            }
            self.state = ConnectionState::Ready;
            return Ok(());
        };

        let auth_db = credential.authentication_database(database).to_string();
        if let Some(existing) = self.authentications.get(&auth_db) {
            if existing != credential {
                return Err(ClusterError::invalid_state(format!(
                    "connection already authenticated to '{auth_db}' with different credentials"
                )));
            }
            self.state = ConnectionState::Ready;
            return Ok(());
        }
        if auth_db == "admin" && !self.authentications.is_empty() {
            return Err(ClusterError::AuthenticationConflict(auth_db));
        }
        if self.authentications.contains_key("admin") {
            return Err(ClusterError::AuthenticationConflict(auth_db));
        }

        let channel = self
            .channel
            .as_mut()
            .ok_or(ClusterError::ConnectionClosed)?;
        self.state = ConnectionState::Authenticating;
        debug!(connection = self.id, database = %auth_db, "authenticating connection");
        match provider.authenticate(channel.as_mut(), &auth_db, credential).await {
            Ok(()) => {
                self.authentications.insert(auth_db, credential.clone());
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(err) => {
                if err.is_connectivity_error() {
                    self.record_socket_error().await;
                } else {
                    self.state = ConnectionState::Open;
                }
                Err(err)
            }
        }
    }

    /// Send a request and wait for its response. A socket-level failure
    /// closes the connection; the owning pool then discards it and treats
    /// the server as possibly unreachable.
    pub async fn round_trip(&mut self, request: &[u8]) -> ClusterResult<Vec<u8>> {
        if self.state != ConnectionState::Ready && self.state != ConnectionState::Open {
            return Err(ClusterError::ConnectionClosed);
        }
        let channel = self
            .channel
            .as_mut()
            .ok_or(ClusterError::ConnectionClosed)?;

        let outcome: Result<Vec<u8>, ChannelError> = async {
            channel.send(request).await?;
            channel.receive().await
        }
        .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_connectivity() {
                    self.record_socket_error().await;
                }
                Err(err.into())
            }
        }
    }

    /// Roll back a cancelled authentication exchange so the connection can
    /// be pooled again.
    pub fn reset_authenticating(&mut self) {
        if self.state == ConnectionState::Authenticating {
            self.state = ConnectionState::Open;
        }
    }

    /// Mark a socket-level failure and close.
    pub async fn record_socket_error(&mut self) {
        warn!(connection = self.id, endpoint = %self.endpoint, "socket error on connection");
        self.had_socket_error = true;
        self.close().await;
    }

    /// Close the connection. Best-effort: channel shutdown errors are
    /// discarded since the resource is being thrown away.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.state = ConnectionState::Closed;
        debug!(connection = self.id, endpoint = %self.endpoint, "connection closed");
    }
}
