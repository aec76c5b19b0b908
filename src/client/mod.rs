//! Module Client
//!
//! Connection to the IoT Edge hub that delivers input messages to this module.
//! The hub speaks MQTT 3.1.1; input messages for module `m` on device `d`
//! arrive on `devices/{d}/modules/{m}/inputs/{channel}[/{properties}]`.
//!
//! Two halves come out of [`EdgeHubClient::open`]:
//! - an [`Acknowledger`] used by the router to complete deliveries
//! - an [`EdgeHubConnection`] that drives the event loop and feeds envelopes
//!   into a channel until shutdown

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::envelope::InputEnvelope;

mod edge_hub;
mod topic;


pub use edge_hub::{EdgeHubAcknowledger, EdgeHubClient, EdgeHubConnection};
pub use topic::parse_input_channel;

/// Error type for module client operations
#[derive(Debug)]
pub enum ClientError {
    /// Connection to the edge hub failed or was lost
    Connection(String),
    /// The edge hub refused the connection or a subscription
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// The envelope consumer went away
    ChannelClosed,
    /// Other error
    Other(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Connection(msg) => write!(f, "Connection failed: {}", msg),
            ClientError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            ClientError::Timeout => write!(f, "Operation timed out"),
            ClientError::ChannelClosed => write!(f, "Envelope channel closed"),
            ClientError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<rumqttc::ClientError> for ClientError {
    fn from(e: rumqttc::ClientError) -> Self {
        ClientError::Connection(e.to_string())
    }
}

/// Status of the edge hub connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and subscribed
    Connected,
    /// Connection refused or lost
    Failed,
}

impl ConnectionStatus {
    /// Lower-case name for logs and probes
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        }
    }
}

/// Shared, cheaply cloneable view of the connection status
#[derive(Debug, Clone)]
pub struct StatusHandle(Arc<RwLock<ConnectionStatus>>);

impl StatusHandle {
    /// Create a handle starting in [`ConnectionStatus::Disconnected`]
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(ConnectionStatus::Disconnected)))
    }

    /// Current status
    pub fn get(&self) -> ConnectionStatus {
        *self.0.read()
    }

    /// Replace the status
    pub fn set(&self, status: ConnectionStatus) {
        *self.0.write() = status;
    }

    /// Whether the connection is up
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionStatus::Connected
    }
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes deliveries on the transport
///
/// Completion tells the transport the message has been taken; it does not
/// wait for the message to be processed.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledge an envelope. Envelopes that owe no acknowledgement succeed
    /// without touching the transport.
    async fn complete(&self, envelope: &InputEnvelope) -> Result<(), ClientError>;
}

#[async_trait]
impl<T: Acknowledger + ?Sized> Acknowledger for Arc<T> {
    async fn complete(&self, envelope: &InputEnvelope) -> Result<(), ClientError> {
        (**self).complete(envelope).await
    }
}
