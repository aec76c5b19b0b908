//! HTTP ingestion invoker
//!
//! Sends the telemetry record to an ingestion endpoint with a plain HTTP/1.1
//! POST, one connection per call. The body mirrors the IoT Central bridge
//! request:
//!
//! ```json
//! { "device": { "deviceId": "sensor1" }, "measurements": { "temp": 21.5 }, "timestamp": "..." }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, Uri};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{BridgeInvoker, InvokeError};
use crate::context::BridgeContext;
use crate::envelope::Measurements;

/// Header carrying the IoT Central identity scope
pub const ID_SCOPE_HEADER: &str = "x-iotc-id-scope";
/// Header carrying the resolved IoT Central key
pub const KEY_HEADER: &str = "x-iotc-key";

#[derive(Serialize)]
struct DeviceRef<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
}

#[derive(Serialize)]
struct IngestRequest<'a> {
    device: DeviceRef<'a>,
    measurements: &'a Measurements,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a str>,
}

/// Forwards telemetry to an HTTP ingestion endpoint
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    endpoint: Uri,
    host: String,
    port: u16,
    timeout: Option<Duration>,
}

impl HttpInvoker {
    /// Create an invoker for an `http://` endpoint
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> Result<Self, InvokeError> {
        let uri: Uri = endpoint.parse().map_err(|e| {
            InvokeError::InvalidConfig(format!("Invalid endpoint '{}': {}", endpoint, e))
        })?;

        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(InvokeError::InvalidConfig(format!(
                    "Unsupported endpoint scheme '{}' (only http is supported)",
                    other
                )));
            }
            None => {
                return Err(InvokeError::InvalidConfig(format!(
                    "Endpoint '{}' must be an absolute http:// URL",
                    endpoint
                )));
            }
        }

        let host = uri
            .host()
            .ok_or_else(|| InvokeError::InvalidConfig(format!("Endpoint '{}' has no host", endpoint)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(80);

        Ok(Self {
            endpoint: uri,
            host,
            port,
            timeout,
        })
    }

    /// The configured endpoint
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    async fn post(&self, body: Vec<u8>, id_scope: &str, key: &str) -> Result<(), InvokeError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| InvokeError::Unavailable(e.to_string()))?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| InvokeError::Unavailable(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Bridge connection closed with error: {}", e);
            }
        });

        let path = self
            .endpoint
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        let authority = self
            .endpoint
            .authority()
            .map(|a| a.as_str())
            .unwrap_or(self.host.as_str());

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, authority)
            .header(CONTENT_TYPE, "application/json")
            .header(ID_SCOPE_HEADER, id_scope)
            .header(KEY_HEADER, key)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| InvokeError::Other(format!("Failed to build request: {}", e)))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| InvokeError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = match response.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(_) => String::new(),
        };
        Err(InvokeError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl BridgeInvoker for HttpInvoker {
    async fn invoke(
        &self,
        ctx: &BridgeContext<'_>,
        device_id: &str,
        measurements: &Measurements,
        timestamp: Option<&str>,
    ) -> Result<(), InvokeError> {
        let body = serde_json::to_vec(&IngestRequest {
            device: DeviceRef { device_id },
            measurements,
            timestamp,
        })
        .map_err(|e| InvokeError::Other(format!("Failed to encode request: {}", e)))?;

        debug!(
            "Posting {} bytes for device '{}' to {}",
            body.len(),
            device_id,
            self.endpoint
        );

        let call = self.post(body, ctx.id_scope, ctx.credential.expose());
        match self.timeout {
            Some(limit) => timeout(limit, call)
                .await
                .map_err(|_| InvokeError::Timeout)?,
            None => call.await,
        }
    }
}
