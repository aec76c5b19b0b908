//! Edge Hub Client
//!
//! MQTT connection to the IoT Edge hub, built on `rumqttc`. Deliveries are
//! acknowledged manually so that completion is decided by the router rather
//! than by the event loop.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, Publish, QoS,
    SubscribeReasonCode, Transport,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::topic::parse_input_channel;
use super::{Acknowledger, ClientError, ConnectionStatus, StatusHandle};
use crate::config::EdgeConfig;
use crate::envelope::{DeliveryTag, InputEnvelope};

/// How long shutdown waits for DISCONNECT to reach the hub
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

/// Client for the IoT Edge hub
pub struct EdgeHubClient {
    config: EdgeConfig,
    status: StatusHandle,
}

impl EdgeHubClient {
    /// Create a new client. Nothing is connected until [`EdgeHubClient::open`].
    pub fn new(config: EdgeConfig) -> Self {
        Self {
            config,
            status: StatusHandle::new(),
        }
    }

    /// Shared connection status
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// MQTT options derived from the edge configuration
    ///
    /// Fails if the configured CA bundle cannot be read.
    pub(crate) fn options(&self) -> Result<MqttOptions, ClientError> {
        let config = &self.config;
        let mut options = MqttOptions::new(config.client_id(), config.host.clone(), config.port);
        options.set_keep_alive(config.keepalive_duration());
        options.set_clean_session(config.clean_session);
        options.set_manual_acks(true);
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
        options.set_credentials(
            config.username(),
            config.sas_token.clone().unwrap_or_default(),
        );
        if config.tls {
            let transport = match &config.ca_file {
                Some(path) => {
                    let ca = std::fs::read(path).map_err(|e| {
                        ClientError::Other(format!(
                            "failed to read CA bundle {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    Transport::tls(ca, None, None)
                }
                None => Transport::tls_with_default_config(),
            };
            options.set_transport(transport);
        }
        Ok(options)
    }

    /// Connect to the edge hub and subscribe to this module's inputs.
    ///
    /// Fails if the hub cannot be reached or refuses the connection within
    /// `connect_timeout`.
    pub async fn open(self) -> Result<(EdgeHubAcknowledger, EdgeHubConnection), ClientError> {
        let options = match self.options() {
            Ok(options) => options,
            Err(e) => {
                self.status.set(ConnectionStatus::Failed);
                return Err(e);
            }
        };
        let (client, mut eventloop) = AsyncClient::new(options, self.config.event_capacity);

        self.status.set(ConnectionStatus::Connecting);
        debug!(
            "Connecting to edge hub at {}:{} as '{}'",
            self.config.host,
            self.config.port,
            self.config.client_id()
        );

        let connected = timeout(self.config.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| ClientError::Timeout)
            .and_then(|result| result);
        if let Err(e) = connected {
            self.status.set(ConnectionStatus::Failed);
            return Err(e);
        }

        let filter = self.config.inputs_filter();
        client.subscribe(filter.as_str(), QoS::AtLeastOnce).await?;
        debug!("Subscribing to {}", filter);

        let acknowledger = EdgeHubAcknowledger {
            client: client.clone(),
        };
        let connection = EdgeHubConnection {
            inputs_prefix: self.config.inputs_prefix(),
            filter,
            client,
            eventloop,
            status: self.status,
        };

        Ok((acknowledger, connection))
    }
}

/// Poll until the hub answers CONNECT
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ClientError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(connection_error(e)),
        }
    }
}

fn connection_error(e: ConnectionError) -> ClientError {
    match e {
        ConnectionError::ConnectionRefused(code) => {
            ClientError::Rejected(format!("connection refused: {:?}", code))
        }
        other => ClientError::Connection(other.to_string()),
    }
}

/// Completes edge hub deliveries with PUBACK
#[derive(Clone)]
pub struct EdgeHubAcknowledger {
    pub(super) client: AsyncClient,
}

#[async_trait]
impl Acknowledger for EdgeHubAcknowledger {
    async fn complete(&self, envelope: &InputEnvelope) -> Result<(), ClientError> {
        if !envelope.delivery.requires_ack {
            return Ok(());
        }

        // Inputs are subscribed at QoS 1, so completion is always a PUBACK
        let mut publish = Publish::new("", QoS::AtLeastOnce, Vec::<u8>::new());
        publish.pkid = envelope.delivery.packet_id;
        self.client.ack(&publish).await?;
        Ok(())
    }
}

/// Drives the edge hub event loop
pub struct EdgeHubConnection {
    inputs_prefix: String,
    filter: String,
    client: AsyncClient,
    eventloop: EventLoop,
    status: StatusHandle,
}

impl EdgeHubConnection {
    /// Forward input messages to `sink` until `shutdown` fires.
    ///
    /// The connection is not re-established: a transport error, a refused
    /// subscription or an unexpected DISCONNECT ends the loop with an error.
    pub async fn run(
        mut self,
        sink: mpsc::Sender<InputEnvelope>,
        shutdown: CancellationToken,
    ) -> Result<(), ClientError> {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => {
                    self.disconnect().await;
                    return Ok(());
                }
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.deliver(publish, &sink, &shutdown).await?;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let refused = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    if refused {
                        self.status.set(ConnectionStatus::Failed);
                        return Err(ClientError::Rejected(format!(
                            "subscription to {} refused",
                            self.filter
                        )));
                    }
                    self.status.set(ConnectionStatus::Connected);
                    info!("Subscribed to {}", self.filter);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.status.set(ConnectionStatus::Failed);
                    return Err(ClientError::Connection(
                        "edge hub sent DISCONNECT".to_string(),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    self.status.set(ConnectionStatus::Failed);
                    error!("Edge hub connection lost: {}", e);
                    return Err(connection_error(e));
                }
            }
        }
    }

    /// Hand an inbound PUBLISH to the envelope channel
    async fn deliver(
        &mut self,
        publish: Publish,
        sink: &mpsc::Sender<InputEnvelope>,
        shutdown: &CancellationToken,
    ) -> Result<(), ClientError> {
        let delivery = match publish.qos {
            QoS::AtMostOnce => DeliveryTag::unacked(),
            _ => DeliveryTag::acked(publish.pkid),
        };

        let Some(channel) = parse_input_channel(&self.inputs_prefix, &publish.topic) else {
            debug!("Ignoring message on unexpected topic '{}'", publish.topic);
            // Never wait on the request queue from the task that drains it
            if delivery.requires_ack {
                if let Err(e) = self.client.try_ack(&publish) {
                    warn!("Failed to acknowledge message on '{}': {}", publish.topic, e);
                }
            }
            return Ok(());
        };

        let envelope = InputEnvelope::new(channel, publish.payload.clone(), delivery);
        tokio::select! {
            sent = sink.send(envelope) => sent.map_err(|_| ClientError::ChannelClosed),
            _ = shutdown.cancelled() => Ok(()),
        }
    }

    /// Send DISCONNECT and give the event loop a moment to flush it
    async fn disconnect(&mut self) {
        self.status.set(ConnectionStatus::Disconnected);
        if self.client.try_disconnect().is_err() {
            return;
        }

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if timeout(DISCONNECT_FLUSH, flush).await.is_err() {
            debug!("DISCONNECT not flushed before shutdown");
        }
        info!("Disconnected from edge hub");
    }
}
