//! Credential Resolution
//!
//! Turns an opaque locator (a key vault URL in cloud deployments, the key
//! itself on the edge) into a usable credential. Routing only depends on the
//! [`CredentialResolver`] trait so a secret-store backed implementation can be
//! dropped in later.

use std::fmt;

use async_trait::async_trait;
use tracing::Level;

use crate::context::InvocationContext;

#[cfg(test)]
mod tests;

/// An access credential. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Credential resolution errors
#[derive(Debug)]
pub enum ResolutionError {
    /// The backing store could not be reached
    Unreachable(String),
    /// The locator does not name a known secret
    NotFound(String),
    /// Other error
    Other(String),
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::Unreachable(msg) => write!(f, "Secret store unreachable: {}", msg),
            ResolutionError::NotFound(locator) => write!(f, "Secret not found: {}", locator),
            ResolutionError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ResolutionError {}

/// Resolves credential locators
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve `locator` to a credential
    async fn resolve(
        &self,
        locator: &str,
        ctx: &InvocationContext,
    ) -> Result<Credential, ResolutionError>;
}

#[async_trait]
impl<T: CredentialResolver + ?Sized> CredentialResolver for std::sync::Arc<T> {
    async fn resolve(
        &self,
        locator: &str,
        ctx: &InvocationContext,
    ) -> Result<Credential, ResolutionError> {
        (**self).resolve(locator, ctx).await
    }
}

/// Returns the locator itself as the credential.
///
/// Used on the edge where no external secret store is available and the
/// locator is the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl CredentialResolver for PassthroughResolver {
    async fn resolve(
        &self,
        locator: &str,
        ctx: &InvocationContext,
    ) -> Result<Credential, ResolutionError> {
        ctx.log(Level::DEBUG, "Returning IoT Central key from locator");
        Ok(Credential::new(locator))
    }
}
