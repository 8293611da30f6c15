//! Credentials and the credential provider abstraction.

use async_trait::async_trait;

use crate::channel::WireChannel;
use crate::error::ClusterResult;

/// A set of credentials for one database, or for the admin database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// The user name.
    pub username: String,
    /// The password or token material, opaque to this crate.
    pub secret: String,
    /// Authenticate against the admin database instead of the target
    /// database, granting cluster-wide access.
    pub use_admin: bool,
}

impl Credential {
    /// Credentials for the target database.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            use_admin: false,
        }
    }

    /// Credentials for the admin database.
    pub fn admin(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            use_admin: true,
        }
    }

    /// The database this credential authenticates against.
    pub fn authentication_database<'a>(&self, database: &'a str) -> &'a str {
        if self.use_admin { "admin" } else { database }
    }
}

/// Performs the mechanism-specific authentication exchange.
///
/// Implemented externally (SCRAM, OIDC, ...); the connection state machine
/// only needs the outcome.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Authenticate a channel against a database.
    async fn authenticate(
        &self,
        channel: &mut dyn WireChannel,
        database: &str,
        credential: &Credential,
    ) -> ClusterResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_database() {
        let plain = Credential::new("app", "s3cret");
        assert_eq!(plain.authentication_database("orders"), "orders");

        let admin = Credential::admin("root", "s3cret");
        assert_eq!(admin.authentication_database("orders"), "admin");
    }
}
