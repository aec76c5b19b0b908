//! Invocation Context
//!
//! The immutable context every routing call receives. It is built once at
//! startup from configuration and shared by reference, replacing any ambient
//! logging or settings state.

use std::fmt;
use std::sync::Arc;

use tracing::Level;

use crate::credential::{Credential, CredentialResolver, ResolutionError};


/// Logging capability handed to routing calls, resolvers and invokers
pub trait ContextLog: Send + Sync {
    /// Emit a log line at the given level
    fn log(&self, level: Level, message: &str);
}

/// Forwards context log lines to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl ContextLog for TracingLog {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "iotc", "{}", message),
            Level::WARN => tracing::warn!(target: "iotc", "{}", message),
            Level::INFO => tracing::info!(target: "iotc", "{}", message),
            Level::DEBUG => tracing::debug!(target: "iotc", "{}", message),
            _ => tracing::trace!(target: "iotc", "{}", message),
        }
    }
}

impl<T: ContextLog + ?Sized> ContextLog for Arc<T> {
    fn log(&self, level: Level, message: &str) {
        (**self).log(level, message);
    }
}

/// Process-wide context for routing calls
pub struct InvocationContext {
    /// IoT Central identity scope
    id_scope: String,
    /// Locator for the IoT Central access key
    key_locator: String,
    /// Log sink
    log: Arc<dyn ContextLog>,
    /// Credential lookup
    resolver: Arc<dyn CredentialResolver>,
}

impl InvocationContext {
    /// Create a new context
    pub fn new(
        id_scope: impl Into<String>,
        key_locator: impl Into<String>,
        log: Arc<dyn ContextLog>,
        resolver: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            id_scope: id_scope.into(),
            key_locator: key_locator.into(),
            log,
            resolver,
        }
    }

    /// Identity scope the credential belongs to
    pub fn id_scope(&self) -> &str {
        &self.id_scope
    }

    /// Configured credential locator
    pub fn key_locator(&self) -> &str {
        &self.key_locator
    }

    /// Log through the context's sink
    pub fn log(&self, level: Level, message: &str) {
        self.log.log(level, message);
    }

    /// Borrow the log sink
    pub fn log_sink(&self) -> &dyn ContextLog {
        self.log.as_ref()
    }

    /// Resolve the configured locator to a credential
    pub async fn resolve_credential(&self) -> Result<Credential, ResolutionError> {
        self.resolver.resolve(&self.key_locator, self).await
    }

    /// Extend the context with a resolved credential for one invoker call
    pub fn with_credential(&self, credential: Credential) -> BridgeContext<'_> {
        BridgeContext {
            id_scope: &self.id_scope,
            credential,
            log: self.log.as_ref(),
        }
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("id_scope", &self.id_scope)
            .field("key_locator", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Context seen by the bridge invoker for a single call
pub struct BridgeContext<'a> {
    /// IoT Central identity scope
    pub id_scope: &'a str,
    /// Credential resolved for this call
    pub credential: Credential,
    /// Log sink
    pub log: &'a dyn ContextLog,
}

impl BridgeContext<'_> {
    /// Log through the context's sink
    pub fn log(&self, level: Level, message: &str) {
        self.log.log(level, message);
    }
}
