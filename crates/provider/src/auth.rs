//! Interactive authorization seam.
//!
//! Adapters never talk to the user directly. Whenever a handshake needs a
//! human (opening a browser, typing a password) they ask the injected
//! [`Authorizer`].

use crate::error::Result;
use crate::models::Provider;
use async_trait::async_trait;

/// Login details for providers using HTTP basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub url: String,
    pub username: String,
    pub password: String,
}
impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Send the user to `url` and return the authorization code the provider
    /// shows them once they approve access.
    async fn authorization_code(&self, provider: Provider, url: &str) -> Result<String>;

    /// Ask the user for a server URL plus username and password.
    async fn basic_credentials(&self, provider: Provider) -> Result<BasicCredentials>;
}
