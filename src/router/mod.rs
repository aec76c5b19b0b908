//! Message Router
//!
//! Handles one input envelope end to end:
//! 1. acknowledge it on the transport, whatever happens next
//! 2. drop it quietly unless it arrived on the bridge channel
//! 3. decode the telemetry record
//! 4. resolve the IoT Central credential
//! 5. hand everything to the bridge invoker
//!
//! Failures in steps 3 to 5 end the call for that envelope only. They are
//! logged through the invocation context and never reach the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span, warn, Instrument, Level, Span};

use crate::client::Acknowledger;
use crate::context::InvocationContext;
use crate::credential::ResolutionError;
use crate::envelope::{DecodeError, InputEnvelope};
use crate::invoker::{BridgeInvoker, InvokeError};
use crate::metrics::Metrics;


/// Default name of the input channel that carries telemetry for the bridge
pub const DEFAULT_BRIDGE_CHANNEL: &str = "iotc";

/// Per-message routing failure
#[derive(Debug)]
pub enum RouteError {
    /// Payload is not a telemetry record
    Decode(DecodeError),
    /// Credential could not be resolved
    Credential(ResolutionError),
    /// Bridge call failed
    Invoke(InvokeError),
}

impl RouteError {
    /// Stage that failed, used as a metrics label
    pub fn stage(&self) -> &'static str {
        match self {
            RouteError::Decode(_) => "decode",
            RouteError::Credential(_) => "credential",
            RouteError::Invoke(_) => "invoke",
        }
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::Decode(e) => write!(f, "{}", e),
            RouteError::Credential(e) => write!(f, "{}", e),
            RouteError::Invoke(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RouteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouteError::Decode(e) => Some(e),
            RouteError::Credential(e) => Some(e),
            RouteError::Invoke(e) => Some(e),
        }
    }
}

impl From<DecodeError> for RouteError {
    fn from(e: DecodeError) -> Self {
        RouteError::Decode(e)
    }
}

impl From<ResolutionError> for RouteError {
    fn from(e: ResolutionError) -> Self {
        RouteError::Credential(e)
    }
}

impl From<InvokeError> for RouteError {
    fn from(e: InvokeError) -> Self {
        RouteError::Invoke(e)
    }
}

/// Keeps the in-flight gauge balanced even if routing panics
struct InFlight<'a>(Option<&'a Metrics>);

impl<'a> InFlight<'a> {
    fn start(metrics: Option<&'a Metrics>) -> Self {
        if let Some(m) = metrics {
            m.routing_started();
        }
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(m) = self.0 {
            m.routing_finished();
        }
    }
}

/// Routes input envelopes to the bridge invoker
pub struct Router {
    bridge_channel: String,
    acknowledger: Arc<dyn Acknowledger>,
    invoker: Arc<dyn BridgeInvoker>,
    metrics: Option<Arc<Metrics>>,
}

impl Router {
    /// Create a router forwarding envelopes from `bridge_channel`
    pub fn new(
        bridge_channel: impl Into<String>,
        acknowledger: Arc<dyn Acknowledger>,
        invoker: Arc<dyn BridgeInvoker>,
    ) -> Self {
        Self {
            bridge_channel: bridge_channel.into(),
            acknowledger,
            invoker,
            metrics: None,
        }
    }

    /// Record routing outcomes in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Channel whose envelopes are forwarded
    pub fn bridge_channel(&self) -> &str {
        &self.bridge_channel
    }

    /// Route one envelope. Never fails; see the module docs.
    pub async fn route(&self, envelope: InputEnvelope, ctx: &InvocationContext) {
        let span = info_span!(
            parent: Span::none(),
            "route_message",
            channel = %envelope.channel,
            payload_size = envelope.payload.len(),
            device_id = tracing::field::Empty,
        );

        async {
            let metrics = self.metrics.as_deref();
            if let Some(m) = metrics {
                m.envelope_received(&envelope.channel);
            }

            if let Err(e) = self.acknowledger.complete(&envelope).await {
                warn!("Failed to acknowledge message on '{}': {}", envelope.channel, e);
                if let Some(m) = metrics {
                    m.ack_failed();
                }
            }
            info!("Receiving message on '{}'", envelope.channel);

            if envelope.channel != self.bridge_channel {
                debug!("Ignoring message on channel '{}'", envelope.channel);
                if let Some(m) = metrics {
                    m.envelope_ignored();
                }
                return;
            }

            let _in_flight = InFlight::start(metrics);
            if let Err(e) = self.process(&envelope, ctx).await {
                if let Some(m) = metrics {
                    m.routing_failed(e.stage());
                }
                ctx.log(
                    Level::ERROR,
                    &format!("failed to route message on '{}': {}", envelope.channel, e),
                );
            }
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        envelope: &InputEnvelope,
        ctx: &InvocationContext,
    ) -> Result<(), RouteError> {
        let request = envelope.decode()?;
        Span::current().record("device_id", request.device_id.as_str());

        let started = Instant::now();
        let credential = ctx.resolve_credential().await?;
        let bridge_ctx = ctx.with_credential(credential);

        self.invoker
            .invoke(
                &bridge_ctx,
                &request.device_id,
                &request.measurements,
                request.timestamp.as_deref(),
            )
            .await?;

        if let Some(m) = &self.metrics {
            m.telemetry_dispatched(started.elapsed());
        }
        debug!(
            "Forwarded {} measurements for device '{}'",
            request.measurements.len(),
            request.device_id
        );
        Ok(())
    }
}
