//! Completion monitor: polls clients for every active download.

use super::engine::AcquisitionEngine;
use crate::config::Settings;
use crate::download_clients::{DownloadClient, TransferState, TransferStatus};
use crate::error::{EngineError, ErrorKind};
use crate::post_processing::ProcessOutcome;
use crate::store::{Download, DownloadStatus, Request};
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub checked: usize,
    pub progressed: usize,
    pub completed: usize,
    pub failed: usize,
    pub delivered: usize,
    pub errors: usize,
}

enum Check {
    Unchanged,
    Progressed,
    Completed(Download),
    Failed,
    Error,
}

impl AcquisitionEngine {
    /// One pass over all active downloads. Clients are polled concurrently
    /// and completed downloads are delivered before the pass returns.
    pub async fn run_download_monitor(self: &Arc<Self>) -> Result<MonitorReport> {
        let settings = self.snapshot();
        let downloads = self.store.list_active_downloads()?;
        let mut report = MonitorReport {
            checked: downloads.len(),
            ..MonitorReport::default()
        };
        if downloads.is_empty() {
            return Ok(report);
        }
        debug!("Checking {} active download(s)", downloads.len());

        let checks = join_all(
            downloads
                .iter()
                .map(|download| self.check_download(&settings, download)),
        )
        .await;

        let mut finished = Vec::new();
        for check in checks {
            match check {
                Check::Unchanged => {}
                Check::Progressed => report.progressed += 1,
                Check::Completed(done) => {
                    report.completed += 1;
                    finished.push(done);
                }
                Check::Failed => report.failed += 1,
                Check::Error => report.errors += 1,
            }
        }

        let deliveries = finished.into_iter().map(|download| {
            let engine = Arc::clone(self);
            let settings = Arc::clone(&settings);
            tokio::spawn(async move { engine.deliver(&settings, download).await })
        });
        for result in join_all(deliveries.collect::<Vec<_>>()).await {
            match result {
                Ok(Some(ProcessOutcome::Delivered(_))) => report.delivered += 1,
                Ok(_) => {}
                Err(err) => warn!("Delivery task panicked: {}", err),
            }
        }
        Ok(report)
    }

    async fn check_download(&self, settings: &Settings, download: &Download) -> Check {
        let (Some(client_id), Some(external_id)) =
            (download.client_id.as_deref(), download.external_id.as_deref())
        else {
            return Check::Unchanged;
        };

        let adapter = match self.registry.adapter_by_id(settings, client_id) {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!("Download {}: {}", download.id, err);
                self.fail(download, &format!("Cannot check download: {}", err));
                return Check::Failed;
            }
        };

        let status = match adapter.status(external_id).await {
            Ok(status) => status,
            Err(err) => return self.status_error(download, client_id, err),
        };

        let Some(transfer) = status else {
            let message = format!("'{}' was removed from download client {}", download.name, client_id);
            self.fail(download, &message);
            return Check::Failed;
        };

        match transfer.state {
            TransferState::Failed => {
                let reason = transfer
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string());
                let message = format!("Download of '{}' failed in {}: {}", download.name, client_id, reason);
                self.fail(download, &message);
                remove_quietly(adapter.as_ref(), external_id).await;
                Check::Failed
            }
            TransferState::Completed => self.complete(download, &transfer),
            _ => self.progress(download, &transfer),
        }
    }

    fn status_error(&self, download: &Download, client_id: &str, err: EngineError) -> Check {
        match err.kind() {
            ErrorKind::Connection => {
                debug!("{} unreachable for download {}, next sweep: {}", client_id, download.id, err);
            }
            ErrorKind::Authentication => {
                self.escalate_download(download, &format!("Download client {}: {}", client_id, err));
            }
            _ => warn!("Status of download {} on {} failed: {}", download.id, client_id, err),
        }
        Check::Error
    }

    fn progress(&self, download: &Download, transfer: &TransferStatus) -> Check {
        let started = download.status == DownloadStatus::Queued
            && matches!(transfer.state, TransferState::Downloading);
        if transfer.progress == download.progress && !started {
            return Check::Unchanged;
        }
        match self.store.update_download_progress(&download.id, transfer.progress) {
            Ok(_) => {
                debug!("Download {} at {}%", download.id, transfer.progress);
                Check::Progressed
            }
            Err(err) => {
                warn!("Could not store progress of {}: {:#}", download.id, err);
                Check::Error
            }
        }
    }

    fn complete(&self, download: &Download, transfer: &TransferStatus) -> Check {
        match self
            .store
            .complete_download(&download.id, transfer.path.as_deref())
        {
            Ok(true) => {}
            Ok(false) => return Check::Unchanged,
            Err(err) => {
                warn!("Could not complete download {}: {:#}", download.id, err);
                return Check::Error;
            }
        }
        info!("Download '{}' finished", download.name);
        match self.store.get_download(&download.id) {
            Ok(Some(done)) => Check::Completed(done),
            Ok(None) => Check::Unchanged,
            Err(err) => {
                warn!("Could not reload download {}: {:#}", download.id, err);
                Check::Error
            }
        }
    }

    fn fail(&self, download: &Download, message: &str) {
        if let Err(err) = self.store.fail_download(&download.id, message) {
            warn!("Could not fail download {}: {:#}", download.id, err);
        }
        self.escalate_download(download, message);
    }

    fn escalate_download(&self, download: &Download, message: &str) {
        match self.store.get_request(&download.request_id) {
            Ok(Some(request)) => self.escalate(&request, message),
            Ok(None) => debug!("Download {} has no request left", download.id),
            Err(err) => warn!("Could not load request {}: {:#}", download.request_id, err),
        }
    }

    async fn deliver(&self, settings: &Settings, download: Download) -> Option<ProcessOutcome> {
        let request: Request = match self.store.get_request(&download.request_id) {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(err) => {
                warn!("Could not load request {}: {:#}", download.request_id, err);
                return None;
            }
        };
        Some(self.post_processor.process(settings, &request, &download).await)
    }
}

async fn remove_quietly(adapter: &dyn DownloadClient, external_id: &str) {
    if let Err(err) = adapter.remove(external_id).await {
        debug!("Could not remove failed transfer {}: {}", external_id, err);
    }
}
