//! Integration Tests for the edge bridge
//!
//! These tests run the whole relay: a minimal MQTT edge hub written against
//! raw sockets delivers input messages, the module client hands them to the
//! listener, and the router forwards telemetry to an HTTP ingestion endpoint.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use iotc_edge_bridge::client::EdgeHubClient;
use iotc_edge_bridge::config::{Config, EdgeConfig};
use iotc_edge_bridge::context::{InvocationContext, TracingLog};
use iotc_edge_bridge::credential::PassthroughResolver;
use iotc_edge_bridge::invoker::HttpInvoker;
use iotc_edge_bridge::listener::{Listener, ListenerConfig};
use iotc_edge_bridge::router::Router;

const WAIT: Duration = Duration::from_secs(5);
const INPUTS: &str = "devices/edge-device-01/modules/IOTCBridgeModule/inputs";

#[derive(Debug, Clone)]
struct Posted {
    id_scope: Option<String>,
    key: Option<String>,
    body: serde_json::Value,
}

/// HTTP endpoint recording every POST it receives
async fn spawn_ingestion_endpoint() -> (SocketAddr, mpsc::UnboundedReceiver<Posted>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let tx = tx.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let tx = tx.clone();
                    async move {
                        let header = |name: &str| {
                            req.headers()
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string)
                        };
                        let id_scope = header("x-iotc-id-scope");
                        let key = header("x-iotc-key");
                        let bytes = req.into_body().collect().await.unwrap().to_bytes();
                        let _ = tx.send(Posted {
                            id_scope,
                            key,
                            body: serde_json::from_slice(&bytes).unwrap(),
                        });
                        Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"OK"))))
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, rx)
}

async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let header = stream.read_u8().await.unwrap();
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.unwrap();
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    (header, body)
}

fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

fn publish_packet(topic: &str, packet_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x32];
    encode_remaining_length(2 + topic.len() + 2 + payload.len(), &mut packet);
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(&packet_id.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Edge hub stand-in: accepts the module, publishes `messages` and reports
/// every PUBACK packet id it receives
async fn spawn_edge_hub(
    messages: Vec<(String, u16, Vec<u8>)>,
) -> (u16, mpsc::UnboundedReceiver<u16>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let (header, _) = read_packet(&mut stream).await;
        assert_eq!(header, 0x10);
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let (header, body) = read_packet(&mut stream).await;
        assert_eq!(header, 0x82);
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x01])
            .await
            .unwrap();

        for (topic, packet_id, payload) in &messages {
            stream
                .write_all(&publish_packet(topic, *packet_id, payload))
                .await
                .unwrap();
        }

        loop {
            let (header, body) = read_packet(&mut stream).await;
            match header {
                0x40 => {
                    let _ = tx.send(u16::from_be_bytes([body[0], body[1]]));
                }
                0xE0 => break,
                _ => {}
            }
        }
    });

    (port, rx)
}

fn edge_config(port: u16) -> EdgeConfig {
    EdgeConfig {
        host: "127.0.0.1".to_string(),
        port,
        tls: false,
        device_id: "edge-device-01".to_string(),
        module_id: "IOTCBridgeModule".to_string(),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_relay_forwards_bridge_channel_only() {
    let (endpoint, mut posted) = spawn_ingestion_endpoint().await;
    let (port, mut pubacks) = spawn_edge_hub(vec![
        (
            format!("{}/iotc", INPUTS),
            1,
            br#"{"device":"sensor1","measurements":{"temp":21.5},"timestamp":"2023-01-01T00:00:00Z"}"#
                .to_vec(),
        ),
        (format!("{}/telemetry", INPUTS), 2, br#"{"device":"x","measurements":{}}"#.to_vec()),
        (format!("{}/iotc", INPUTS), 3, b"not json".to_vec()),
        (
            format!("{}/iotc/%24.ct=application%2Fjson", INPUTS),
            4,
            br#"{"device":"sensor2","measurements":{"open":true}}"#.to_vec(),
        ),
    ])
    .await;

    let (acknowledger, connection) = timeout(WAIT, EdgeHubClient::new(edge_config(port)).open())
        .await
        .unwrap()
        .unwrap();

    let invoker = HttpInvoker::new(&format!("http://{}/api/IoTCIntegration", endpoint), None)
        .unwrap();
    let router = Router::new("iotc", Arc::new(acknowledger), Arc::new(invoker));
    let ctx = InvocationContext::new(
        "0ne000000A1",
        "primary-key",
        Arc::new(TracingLog),
        Arc::new(PassthroughResolver),
    );
    let listener = Listener::new(Arc::new(router), Arc::new(ctx), ListenerConfig::default());

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);
    let connection_task = tokio::spawn(connection.run(tx, shutdown.clone()));
    let listener_shutdown = shutdown.clone();
    let listener_task = tokio::spawn(async move { listener.run(rx, listener_shutdown).await });

    // Every delivery is acknowledged, forwarded or not
    let mut acked = Vec::new();
    for _ in 0..4 {
        acked.push(timeout(WAIT, pubacks.recv()).await.unwrap().unwrap());
    }
    acked.sort_unstable();
    assert_eq!(acked, vec![1, 2, 3, 4]);

    let mut bodies = Vec::new();
    for _ in 0..2 {
        let post = timeout(WAIT, posted.recv()).await.unwrap().unwrap();
        assert_eq!(post.id_scope.as_deref(), Some("0ne000000A1"));
        assert_eq!(post.key.as_deref(), Some("primary-key"));
        bodies.push(post.body);
    }
    bodies.sort_by_key(|body| body["device"]["deviceId"].as_str().unwrap().to_string());
    assert_eq!(
        bodies,
        vec![
            json!({
                "device": {"deviceId": "sensor1"},
                "measurements": {"temp": 21.5},
                "timestamp": "2023-01-01T00:00:00Z"
            }),
            json!({
                "device": {"deviceId": "sensor2"},
                "measurements": {"open": true}
            }),
        ]
    );

    shutdown.cancel();
    assert!(timeout(WAIT, connection_task).await.unwrap().unwrap().is_ok());
    assert_eq!(timeout(WAIT, listener_task).await.unwrap().unwrap(), 0);

    // Nothing else reached the endpoint
    assert!(posted.try_recv().is_err());
}

#[test]
fn test_config_from_module_environment() {
    let vars = [
        ("IOTEDGE_DEVICEID", "edge-device-01"),
        ("IOTEDGE_MODULEID", "IOTCBridgeModule"),
        ("IOTEDGE_GATEWAYHOSTNAME", "edgeHub"),
        ("ID_SCOPE", "0ne000000A1"),
        ("IOTC_KEY", "primary-key"),
    ];
    let config = Config::load_with("/nonexistent/config.toml", |name| {
        vars.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    })
    .unwrap();

    assert_eq!(config.edge.client_id(), "edge-device-01/IOTCBridgeModule");
    assert_eq!(config.edge.host, "edgeHub");
    assert_eq!(config.router.input_channel, "iotc");
    assert_eq!(config.iotc.key_locator, "primary-key");
}
