//! Invoker that only logs

use async_trait::async_trait;
use tracing::Level;

use super::{BridgeInvoker, InvokeError};
use crate::context::BridgeContext;
use crate::envelope::Measurements;

/// Logs each call through the context instead of forwarding it
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunInvoker;

#[async_trait]
impl BridgeInvoker for DryRunInvoker {
    async fn invoke(
        &self,
        ctx: &BridgeContext<'_>,
        device_id: &str,
        measurements: &Measurements,
        timestamp: Option<&str>,
    ) -> Result<(), InvokeError> {
        let names: Vec<&str> = measurements.keys().map(String::as_str).collect();
        ctx.log(
            Level::INFO,
            &format!(
                "Dry run: device '{}' in scope '{}' -> [{}] at {}",
                device_id,
                ctx.id_scope,
                names.join(", "),
                timestamp.unwrap_or("<now>")
            ),
        );
        Ok(())
    }
}
