//! Listener tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::client::{Acknowledger, ClientError};
use crate::context::{BridgeContext, TracingLog};
use crate::credential::PassthroughResolver;
use crate::envelope::{DeliveryTag, Measurements};
use crate::invoker::{BridgeInvoker, InvokeError};

#[derive(Default)]
struct CountingAcknowledger {
    calls: AtomicUsize,
}

#[async_trait]
impl Acknowledger for CountingAcknowledger {
    async fn complete(&self, _envelope: &InputEnvelope) -> Result<(), ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sleeps on every call and tracks peak concurrency
#[derive(Default)]
struct SlowInvoker {
    delay: Duration,
    panic_on: Option<&'static str>,
    current: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

#[async_trait]
impl BridgeInvoker for SlowInvoker {
    async fn invoke(
        &self,
        _ctx: &BridgeContext<'_>,
        device_id: &str,
        _measurements: &Measurements,
        _timestamp: Option<&str>,
    ) -> Result<(), InvokeError> {
        if self.panic_on == Some(device_id) {
            panic!("invoker blew up on {}", device_id);
        }
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn build_listener(
    invoker: Arc<SlowInvoker>,
    acks: Arc<CountingAcknowledger>,
    config: ListenerConfig,
) -> Listener {
    let router = Arc::new(Router::new("iotc", acks, invoker));
    let ctx = Arc::new(InvocationContext::new(
        "scope",
        "key",
        Arc::new(TracingLog),
        Arc::new(PassthroughResolver),
    ));
    Listener::new(router, ctx, config)
}

fn telemetry(device: &str) -> InputEnvelope {
    InputEnvelope::new(
        "iotc",
        format!(r#"{{"device":"{}","measurements":{{"temp":20}}}}"#, device),
        DeliveryTag::acked(1),
    )
}

async fn queue(envelopes: Vec<InputEnvelope>) -> mpsc::Receiver<InputEnvelope> {
    let (tx, rx) = mpsc::channel(envelopes.len().max(1));
    for envelope in envelopes {
        tx.send(envelope).await.unwrap();
    }
    rx
}

#[tokio::test]
async fn test_routes_until_queue_closes() {
    let invoker = Arc::new(SlowInvoker::default());
    let acks = Arc::new(CountingAcknowledger::default());
    let listener = build_listener(invoker.clone(), acks.clone(), ListenerConfig::default());

    let rx = queue(vec![
        telemetry("d1"),
        telemetry("d2"),
        InputEnvelope::new("other", "{}", DeliveryTag::acked(2)),
    ])
    .await;

    let abandoned = listener.run(rx, CancellationToken::new()).await;

    assert_eq!(abandoned, 0);
    assert_eq!(acks.calls.load(Ordering::SeqCst), 3);
    assert_eq!(invoker.completed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unbounded_routes_concurrently() {
    let invoker = Arc::new(SlowInvoker {
        delay: Duration::from_millis(50),
        ..Default::default()
    });
    let listener = build_listener(
        invoker.clone(),
        Arc::new(CountingAcknowledger::default()),
        ListenerConfig::default(),
    );

    let rx = queue((0..4).map(|i| telemetry(&format!("d{}", i))).collect()).await;
    listener.run(rx, CancellationToken::new()).await;

    assert_eq!(invoker.completed.load(Ordering::SeqCst), 4);
    assert_eq!(invoker.peak.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_max_in_flight_bounds_concurrency() {
    let invoker = Arc::new(SlowInvoker {
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let listener = build_listener(
        invoker.clone(),
        Arc::new(CountingAcknowledger::default()),
        ListenerConfig {
            max_in_flight: 2,
            ..Default::default()
        },
    );

    let rx = queue((0..6).map(|i| telemetry(&format!("d{}", i))).collect()).await;
    listener.run(rx, CancellationToken::new()).await;

    assert_eq!(invoker.completed.load(Ordering::SeqCst), 6);
    assert!(invoker.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_shutdown_abandons_after_grace() {
    let invoker = Arc::new(SlowInvoker {
        delay: Duration::from_secs(30),
        ..Default::default()
    });
    let acks = Arc::new(CountingAcknowledger::default());
    let listener = build_listener(
        invoker.clone(),
        acks.clone(),
        ListenerConfig {
            max_in_flight: 0,
            shutdown_grace: Duration::from_millis(50),
        },
    );

    let (tx, rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();

    let started = tokio::time::Instant::now();
    let (abandoned, _) = tokio::join!(listener.run(rx, shutdown), async move {
        tx.send(telemetry("slow")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
        // Keep the sender alive past cancellation
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(tx);
    });

    assert_eq!(abandoned, 1);
    assert_eq!(acks.calls.load(Ordering::SeqCst), 1);
    assert_eq!(invoker.completed.load(Ordering::SeqCst), 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_panicking_route_is_contained() {
    let invoker = Arc::new(SlowInvoker {
        panic_on: Some("boom"),
        ..Default::default()
    });
    let acks = Arc::new(CountingAcknowledger::default());
    let listener = build_listener(invoker.clone(), acks.clone(), ListenerConfig::default());

    let rx = queue(vec![telemetry("boom"), telemetry("fine")]).await;
    let abandoned = listener.run(rx, CancellationToken::new()).await;

    assert_eq!(abandoned, 0);
    assert_eq!(acks.calls.load(Ordering::SeqCst), 2);
    assert_eq!(invoker.completed.load(Ordering::SeqCst), 1);
}
