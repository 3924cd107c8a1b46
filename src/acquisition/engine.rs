//! Engine state shared by every stage.

use crate::config::{Settings, SettingsHandle};
use crate::download_clients::{ClientRegistry, Submitter};
use crate::duplicates::DuplicateDetector;
use crate::error::EngineError;
use crate::library::{default_viewer_factory, ViewerFactory};
use crate::notifications::{Notification, Notifier, TracingNotifier};
use crate::post_processing::PostProcessor;
use crate::search::{build_providers, ProviderFactory, SearchAggregator};
use crate::store::{AcquisitionStore, RecoveryReport, Request};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Descriptor fetches are small; they should not hang a search task.
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Pluggable collaborators of the engine.
pub struct EngineComponents {
    pub providers: ProviderFactory,
    pub registry: Arc<ClientRegistry>,
    pub viewers: ViewerFactory,
    pub notifier: Arc<dyn Notifier>,
}

impl EngineComponents {
    /// Real HTTP providers, clients and library viewer; notifications go
    /// to the log.
    pub fn production() -> Self {
        Self {
            providers: Arc::new(build_providers),
            registry: Arc::new(ClientRegistry::new()),
            viewers: default_viewer_factory(),
            notifier: Arc::new(TracingNotifier),
        }
    }
}

/// Drives requests through the state machine. Each stage hands off to the
/// next by a conditional status transition in the store.
pub struct AcquisitionEngine {
    pub(super) store: Arc<dyn AcquisitionStore>,
    pub(super) settings: SettingsHandle,
    pub(super) aggregator: SearchAggregator,
    pub(super) registry: Arc<ClientRegistry>,
    pub(super) submitter: Submitter,
    pub(super) post_processor: PostProcessor,
    pub(super) duplicates: DuplicateDetector,
    pub(super) notifier: Arc<dyn Notifier>,
}

impl AcquisitionEngine {
    pub fn new(
        store: Arc<dyn AcquisitionStore>,
        settings: SettingsHandle,
        components: EngineComponents,
    ) -> Result<Self, EngineError> {
        let submitter = Submitter::new(components.registry.clone(), DESCRIPTOR_TIMEOUT)?;
        Ok(Self {
            aggregator: SearchAggregator::new(components.providers),
            post_processor: PostProcessor::new(
                store.clone(),
                components.notifier.clone(),
                components.viewers,
            ),
            duplicates: DuplicateDetector::new(store.clone()),
            registry: components.registry,
            notifier: components.notifier,
            submitter,
            settings,
            store,
        })
    }

    pub fn store(&self) -> &Arc<dyn AcquisitionStore> {
        &self.store
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub(super) fn snapshot(&self) -> Arc<Settings> {
        self.settings.snapshot()
    }

    /// Reset work interrupted by a previous crash and mirror the configured
    /// download clients into the store. Run once before the jobs start.
    pub fn recover(&self) -> anyhow::Result<RecoveryReport> {
        let settings = self.snapshot();
        self.sync_clients(&settings)?;
        let report = self.store.recover_interrupted()?;
        if report != RecoveryReport::default() {
            info!(
                "Startup recovery: {} search(es) reset, {} delivery(ies) escalated, {} submission(s) abandoned",
                report.searches_reset, report.processing_escalated, report.submissions_abandoned
            );
        }
        Ok(report)
    }

    /// Store the non-secret client configuration and drop adapters for
    /// clients that are gone.
    pub fn sync_clients(&self, settings: &Settings) -> anyhow::Result<()> {
        let now = super::now();
        let records: Vec<_> = settings
            .download_clients
            .iter()
            .map(|c| c.to_record(now))
            .collect();
        self.store.sync_download_clients(&records)?;
        self.registry.retain_configured(settings);
        Ok(())
    }

    /// Validate and apply new settings.
    pub fn apply_settings(&self, settings: Settings) -> anyhow::Result<()> {
        self.settings.update(settings)?;
        let current = self.snapshot();
        self.sync_clients(&current)
    }

    /// Set attention on a request and tell its requester. Status is left
    /// unchanged.
    pub(super) fn escalate(&self, request: &Request, message: &str) {
        match self.store.flag_attention(&request.id, message) {
            Ok(true) => {
                warn!("Request {} needs attention: {}", request.id, message);
                self.notifier
                    .notify(&Notification::attention(request, message, super::now()));
            }
            Ok(false) => info!(
                "Request {} is already terminal, not escalating: {}",
                request.id, message
            ),
            Err(err) => warn!("Could not flag request {}: {:#}", request.id, err),
        }
    }
}
