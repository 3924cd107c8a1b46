use crate::acquisition::AcquisitionEngine;
use crate::config::Settings;
use crate::health::HealthAggregator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Contains references to shared resources and a cancellation token
/// for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Request pipeline: queue sweep, monitor and delivery.
    pub engine: Arc<AcquisitionEngine>,

    /// Probes for the health_check job.
    pub health: Arc<HealthAggregator>,
}

impl JobContext {
    /// Create a new job context with the given dependencies.
    pub fn new(
        cancellation_token: CancellationToken,
        engine: Arc<AcquisitionEngine>,
        health: Arc<HealthAggregator>,
    ) -> Self {
        Self {
            cancellation_token,
            engine,
            health,
        }
    }

    /// Copy of this context bound to a different token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    /// Live settings snapshot.
    pub fn settings(&self) -> Arc<Settings> {
        self.engine.settings().snapshot()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
