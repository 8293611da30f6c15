//! Error types for connection and cluster operations.

use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelError;

/// Result type for connection and cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors raised by connections, pools, and server selection.
///
/// Selection timeouts are deliberately distinct from connectivity
/// failures: "no suitable server within the timeout" prompts the caller's
/// retry policy, while a channel failure discards the connection and
/// escalates to topology invalidation.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Transport-level failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The credential provider rejected the credentials.
    #[error("authentication failed for database '{database}': {message}")]
    Authentication {
        /// The authentication database.
        database: String,
        /// Provider-reported detail.
        message: String,
    },

    /// The connection's existing authentications forbid the requested one.
    #[error("connection cannot authenticate for database '{0}' with its existing authentications")]
    AuthenticationConflict(String),

    /// The connection is closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The pool is closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A connection could not be acquired in time.
    #[error("timed out acquiring a connection after {0:?}")]
    AcquireTimeout(Duration),

    /// No qualifying server appeared within the selection timeout.
    #[error("no suitable server found within {0:?}")]
    SelectionTimeout(Duration),

    /// An internal invariant did not hold.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl ClusterError {
    /// Create an authentication error.
    pub fn authentication(database: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            database: database.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Check if this is a selection timeout.
    pub fn is_selection_timeout(&self) -> bool {
        matches!(self, Self::SelectionTimeout(_))
    }

    /// Check if this error indicates the server may be unreachable.
    pub fn is_connectivity_error(&self) -> bool {
        matches!(self, Self::Channel(e) if e.is_connectivity())
    }

    /// Check if this is an authentication error of either kind.
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::AuthenticationConflict(_)
        )
    }
}
