//! Bridge Invoker Module
//!
//! The ingestion bridge is consumed as an opaque capability: the router hands
//! it a [`BridgeContext`] plus the decoded telemetry and awaits the result.
//! Implementations:
//! - [`DryRunInvoker`]: logs what would be forwarded, for local testing
//! - [`HttpInvoker`]: POSTs the telemetry record to an ingestion endpoint

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::InvokerConfig;
use crate::context::BridgeContext;
use crate::envelope::Measurements;

mod dry_run;
mod http;


pub use dry_run::DryRunInvoker;
pub use http::HttpInvoker;

/// Bridge invocation errors
#[derive(Debug)]
pub enum InvokeError {
    /// Could not reach the bridge
    Unavailable(String),
    /// Bridge answered with a failure status
    Rejected { status: u16, body: String },
    /// Call did not complete in time
    Timeout,
    /// Invalid invoker configuration
    InvalidConfig(String),
    /// Other error
    Other(String),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Unavailable(msg) => write!(f, "Bridge unavailable: {}", msg),
            InvokeError::Rejected { status, body } if body.is_empty() => {
                write!(f, "Bridge rejected request ({})", status)
            }
            InvokeError::Rejected { status, body } => {
                write!(f, "Bridge rejected request ({}): {}", status, body)
            }
            InvokeError::Timeout => write!(f, "Bridge call timed out"),
            InvokeError::InvalidConfig(msg) => write!(f, "Invalid invoker config: {}", msg),
            InvokeError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for InvokeError {}

/// Forwards decoded telemetry to the ingestion bridge
#[async_trait]
pub trait BridgeInvoker: Send + Sync {
    /// Forward one device's measurements
    ///
    /// # Arguments
    /// * `ctx` - Identity scope, resolved credential and log sink
    /// * `device_id` - Device the measurements belong to
    /// * `measurements` - Measurement values keyed by name
    /// * `timestamp` - Optional ISO-8601 timestamp from the device
    async fn invoke(
        &self,
        ctx: &BridgeContext<'_>,
        device_id: &str,
        measurements: &Measurements,
        timestamp: Option<&str>,
    ) -> Result<(), InvokeError>;
}

#[async_trait]
impl<T: BridgeInvoker + ?Sized> BridgeInvoker for Arc<T> {
    async fn invoke(
        &self,
        ctx: &BridgeContext<'_>,
        device_id: &str,
        measurements: &Measurements,
        timestamp: Option<&str>,
    ) -> Result<(), InvokeError> {
        (**self)
            .invoke(ctx, device_id, measurements, timestamp)
            .await
    }
}

/// Build the invoker selected in configuration
pub fn from_config(config: &InvokerConfig) -> Result<Arc<dyn BridgeInvoker>, InvokeError> {
    match config {
        InvokerConfig::DryRun => Ok(Arc::new(DryRunInvoker)),
        InvokerConfig::Http { endpoint, timeout } => {
            Ok(Arc::new(HttpInvoker::new(endpoint, *timeout)?))
        }
    }
}
