//! Listener
//!
//! Single consumer of the envelope queue fed by the module client. Every
//! envelope is routed on its own task so a slow or failing bridge call never
//! holds up the next message.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::context::InvocationContext;
use crate::envelope::InputEnvelope;
use crate::router::Router;

#[cfg(test)]
mod tests;

/// Listener settings
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Maximum concurrent routing tasks (0 = unbounded)
    pub max_in_flight: usize,
    /// How long to wait for in-flight routing after the queue stops
    pub shutdown_grace: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 0,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Pulls envelopes off the queue and routes them concurrently
pub struct Listener {
    router: Arc<Router>,
    ctx: Arc<InvocationContext>,
    config: ListenerConfig,
}

impl Listener {
    pub fn new(router: Arc<Router>, ctx: Arc<InvocationContext>, config: ListenerConfig) -> Self {
        Self {
            router,
            ctx,
            config,
        }
    }

    /// Route envelopes until `shutdown` fires or the queue closes.
    ///
    /// Returns the number of routing calls still running when the grace
    /// period ran out.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<InputEnvelope>,
        shutdown: CancellationToken,
    ) -> usize {
        let tracker = TaskTracker::new();
        let limit = match self.config.max_in_flight {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        info!(
            "Listening on channel '{}' (max in flight: {})",
            self.router.bridge_channel(),
            match self.config.max_in_flight {
                0 => "unbounded".to_string(),
                n => n.to_string(),
            }
        );

        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Some(envelope) => envelope,
                    None => {
                        debug!("Envelope queue closed");
                        break;
                    }
                },
            };

            // Acknowledgement waits for a permit, the hub redelivers anything
            // left unacknowledged at shutdown
            let permit = match &limit {
                Some(semaphore) => tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            let router = self.router.clone();
            let ctx = self.ctx.clone();
            tracker.spawn(async move {
                let _permit = permit;
                router.route(envelope, &ctx).await;
            });
        }

        tracker.close();
        debug!("Waiting for {} routing calls to finish", tracker.len());

        if tokio::time::timeout(self.config.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            let abandoned = tracker.len();
            warn!(
                "Shutdown grace period elapsed, abandoning {} routing calls",
                abandoned
            );
            return abandoned;
        }

        info!("Listener stopped");
        0
    }
}
