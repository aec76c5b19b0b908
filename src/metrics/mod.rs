//! Prometheus metrics for the bridge module
//!
//! Exposes routing counters at the /metrics endpoint, alongside /health and
//! /ready probes for the container runtime.

use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

mod server;


pub use server::MetricsServer;

/// All routing metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Envelope metrics
    pub envelopes_received_total: IntCounterVec,
    pub envelopes_ignored_total: IntCounter,
    pub ack_failures_total: IntCounter,

    // Routing outcome metrics
    pub telemetry_dispatched_total: IntCounter,
    pub routing_failures_total: IntCounterVec,
    pub routing_in_flight: IntGauge,

    // Performance metrics
    pub dispatch_latency: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let envelopes_received_total = IntCounterVec::new(
            Opts::new(
                "iotc_bridge_envelopes_received_total",
                "Input envelopes received, by channel",
            ),
            &["channel"],
        )?;

        let envelopes_ignored_total = IntCounter::with_opts(Opts::new(
            "iotc_bridge_envelopes_ignored_total",
            "Input envelopes received on channels other than the bridge channel",
        ))?;

        let ack_failures_total = IntCounter::with_opts(Opts::new(
            "iotc_bridge_ack_failures_total",
            "Envelopes whose acknowledgement failed",
        ))?;

        let telemetry_dispatched_total = IntCounter::with_opts(Opts::new(
            "iotc_bridge_telemetry_dispatched_total",
            "Telemetry records accepted by the bridge",
        ))?;

        let routing_failures_total = IntCounterVec::new(
            Opts::new(
                "iotc_bridge_routing_failures_total",
                "Envelopes that failed to route, by stage",
            ),
            &["stage"],
        )?;

        let routing_in_flight = IntGauge::with_opts(Opts::new(
            "iotc_bridge_routing_in_flight",
            "Envelopes currently being routed",
        ))?;

        let dispatch_latency = Histogram::with_opts(
            HistogramOpts::new(
                "iotc_bridge_dispatch_latency_seconds",
                "Time from credential resolution to bridge completion",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
        )?;

        registry.register(Box::new(envelopes_received_total.clone()))?;
        registry.register(Box::new(envelopes_ignored_total.clone()))?;
        registry.register(Box::new(ack_failures_total.clone()))?;
        registry.register(Box::new(telemetry_dispatched_total.clone()))?;
        registry.register(Box::new(routing_failures_total.clone()))?;
        registry.register(Box::new(routing_in_flight.clone()))?;
        registry.register(Box::new(dispatch_latency.clone()))?;

        Ok(Metrics {
            registry,
            envelopes_received_total,
            envelopes_ignored_total,
            ack_failures_total,
            telemetry_dispatched_total,
            routing_failures_total,
            routing_in_flight,
            dispatch_latency,
        })
    }

    // Helper methods for common operations

    pub fn envelope_received(&self, channel: &str) {
        self.envelopes_received_total
            .with_label_values(&[channel])
            .inc();
    }

    pub fn envelope_ignored(&self) {
        self.envelopes_ignored_total.inc();
    }

    pub fn ack_failed(&self) {
        self.ack_failures_total.inc();
    }

    pub fn routing_started(&self) {
        self.routing_in_flight.inc();
    }

    pub fn routing_finished(&self) {
        self.routing_in_flight.dec();
    }

    pub fn telemetry_dispatched(&self, elapsed: Duration) {
        self.telemetry_dispatched_total.inc();
        self.dispatch_latency.observe(elapsed.as_secs_f64());
    }

    pub fn routing_failed(&self, stage: &str) {
        self.routing_failures_total.with_label_values(&[stage]).inc();
    }
}
