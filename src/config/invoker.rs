//! Bridge invoker configuration

use std::time::Duration;

use serde::Deserialize;

/// Which bridge invoker to use
///
/// ```toml
/// [invoker]
/// kind = "http"
/// endpoint = "http://iotc-bridge:8080/api/IoTCIntegration"
/// timeout = "30s"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvokerConfig {
    /// Log telemetry instead of forwarding it
    #[default]
    DryRun,
    /// POST telemetry to an HTTP ingestion endpoint
    Http {
        /// Absolute `http://` URL
        endpoint: String,
        /// Optional per-call timeout (none by default)
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
    },
}

impl InvokerConfig {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InvokerConfig::DryRun => "dry_run",
            InvokerConfig::Http { .. } => "http",
        }
    }
}
