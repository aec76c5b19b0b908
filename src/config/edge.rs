//! Edge Hub Configuration
//!
//! Connection settings for the IoT Edge hub the module talks to.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default IoT Hub MQTT API version used in the username
pub const DEFAULT_API_VERSION: &str = "2018-06-30";

/// Largest MQTT packet accepted from the hub: a 256 KiB IoT Hub message plus
/// room for the topic and its properties
pub const DEFAULT_MAX_PACKET_SIZE: usize = 264 * 1024;

/// Configuration for the edge hub connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Edge hub hostname (IOTEDGE_GATEWAYHOSTNAME)
    pub host: String,

    /// Edge hub MQTT port
    pub port: u16,

    /// Connect over TLS
    pub tls: bool,

    /// PEM bundle trusted for the hub's certificate (EdgeModuleCACertificateFile).
    /// The public web roots are used when unset
    pub ca_file: Option<PathBuf>,

    /// IoT Hub hostname used in the username (IOTEDGE_IOTHUBHOSTNAME).
    /// Defaults to `host` if not specified
    pub hub_hostname: Option<String>,

    /// Device the module runs on (IOTEDGE_DEVICEID)
    pub device_id: String,

    /// This module's identity (IOTEDGE_MODULEID)
    pub module_id: String,

    /// Shared access signature used as the MQTT password (EDGE_SAS_TOKEN)
    pub sas_token: Option<String>,

    /// IoT Hub API version
    pub api_version: String,

    /// Keep-alive interval in seconds
    pub keepalive: u16,

    /// Resume the previous session on connect
    pub clean_session: bool,

    /// Time allowed for the initial CONNECT/CONNACK exchange
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Capacity of the inbound event queue
    pub event_capacity: usize,

    /// Largest packet, in bytes, read from or written to the hub
    pub max_packet_size: usize,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            tls: true,
            ca_file: None,
            hub_hostname: None,
            device_id: String::new(),
            module_id: String::new(),
            sas_token: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            keepalive: 60,
            clean_session: false,
            connect_timeout: Duration::from_secs(30),
            event_capacity: 1024,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl EdgeConfig {
    /// MQTT client identifier: `{device_id}/{module_id}`
    pub fn client_id(&self) -> String {
        format!("{}/{}", self.device_id, self.module_id)
    }

    /// MQTT username expected by the edge hub
    pub fn username(&self) -> String {
        format!(
            "{}/{}/{}/?api-version={}",
            self.hub_hostname.as_deref().unwrap_or(&self.host),
            self.device_id,
            self.module_id,
            self.api_version
        )
    }

    /// Topic prefix under which input messages for this module arrive
    pub fn inputs_prefix(&self) -> String {
        format!(
            "devices/{}/modules/{}/inputs/",
            self.device_id, self.module_id
        )
    }

    /// Subscription filter covering every input of this module
    pub fn inputs_filter(&self) -> String {
        format!("{}#", self.inputs_prefix())
    }

    /// Get the keep-alive as Duration
    pub fn keepalive_duration(&self) -> Duration {
        Duration::from_secs(self.keepalive as u64)
    }
}
