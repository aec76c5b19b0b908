//! IoT Central Edge Bridge
//!
//! An IoT Edge module that listens on its `iotc` input channel and forwards
//! device telemetry to an IoT Central ingestion bridge. Every input message is
//! acknowledged on arrival; messages that fail to decode or forward are logged
//! and dropped without affecting the ones after them.

pub mod client;
pub mod config;
pub mod context;
pub mod credential;
pub mod envelope;
pub mod invoker;
pub mod listener;
pub mod metrics;
pub mod router;

pub use client::{Acknowledger, ClientError, EdgeHubClient, StatusHandle};
pub use config::Config;
pub use context::{BridgeContext, ContextLog, InvocationContext, TracingLog};
pub use credential::{Credential, CredentialResolver, PassthroughResolver, ResolutionError};
pub use envelope::{DeliveryTag, InputEnvelope, TelemetryRequest};
pub use invoker::{BridgeInvoker, DryRunInvoker, HttpInvoker, InvokeError};
pub use listener::{Listener, ListenerConfig};
pub use metrics::{Metrics, MetricsServer};
pub use router::{RouteError, Router};
