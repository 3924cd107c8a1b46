//! Acceptance of a candidate and its submission to a download client.

use super::engine::AcquisitionEngine;
use super::search_stage::SearchStageOutcome;
use crate::config::Settings;
use crate::store::{Download, Request, SearchResult};
use tracing::{info, warn};

impl AcquisitionEngine {
    /// Mark `candidate` selected, create its queued Download and submit it.
    /// Used by automatic and manual selection alike.
    pub(super) async fn accept_and_submit(
        &self,
        settings: &Settings,
        request: &Request,
        candidate: &SearchResult,
    ) -> SearchStageOutcome {
        let Some(link) = candidate.link().map(str::to_string) else {
            let message = format!("'{}' has no usable download link", candidate.title);
            self.escalate(request, &message);
            return SearchStageOutcome::Escalated(message);
        };

        let download = Download::queued_for(candidate, super::now());
        match self.store.accept_candidate(&candidate.id, &download) {
            Ok(true) => {}
            Ok(false) => {
                info!("Request {} already has an active download", request.id);
                return SearchStageOutcome::Skipped;
            }
            Err(err) => {
                warn!("Could not accept candidate {}: {:#}", candidate.id, err);
                return SearchStageOutcome::Skipped;
            }
        }

        self.submit_download(settings, request, &download, &link).await
    }

    async fn submit_download(
        &self,
        settings: &Settings,
        request: &Request,
        download: &Download,
        link: &str,
    ) -> SearchStageOutcome {
        let (client, adapter) = match self.registry.select(settings, download.download_type).await {
            Ok(selected) => selected,
            Err(err) => {
                self.abandon_download(download, &err.to_string());
                return self.submission_failed(
                    settings,
                    request,
                    format!("No usable download client: {}", err),
                    err.is_retryable(),
                );
            }
        };

        let outcome = self
            .submitter
            .submit(&client.id, adapter.as_ref(), link, &settings.submission)
            .await;
        match outcome {
            Ok(outcome) => {
                match self
                    .store
                    .record_submission(&download.id, &client.id, &outcome.external_id)
                {
                    Ok(true) => {
                        info!(
                            "Request {} downloading '{}' on {} ({})",
                            request.id, download.name, client.name, outcome.external_id
                        );
                        SearchStageOutcome::Submitted
                    }
                    // Cancelled while submitting; the transfer stays in the client
                    Ok(false) => {
                        warn!(
                            "Request {} went away during submission, leaving {} on {}",
                            request.id, outcome.external_id, client.name
                        );
                        self.abandon_download(download, "Request cancelled during submission");
                        SearchStageOutcome::Skipped
                    }
                    Err(err) => {
                        warn!("Could not record submission for {}: {:#}", request.id, err);
                        self.abandon_download(download, "Submission could not be recorded");
                        let message = format!(
                            "'{}' was sent to {} as {} but could not be recorded: {:#}",
                            download.name, client.name, outcome.external_id, err
                        );
                        self.escalate(request, &message);
                        SearchStageOutcome::Escalated(message)
                    }
                }
            }
            Err(err) => {
                self.abandon_download(download, &err.to_string());
                self.submission_failed(
                    settings,
                    request,
                    format!("Submission to {} failed: {}", client.name, err),
                    err.is_retryable(),
                )
            }
        }
    }

    fn submission_failed(
        &self,
        settings: &Settings,
        request: &Request,
        message: String,
        retryable: bool,
    ) -> SearchStageOutcome {
        if retryable {
            warn!("Request {}: {}, will retry", request.id, message);
            return self.schedule_retry(settings, request);
        }
        self.escalate(request, &message);
        SearchStageOutcome::Escalated(message)
    }

    fn abandon_download(&self, download: &Download, message: &str) {
        if let Err(err) = self.store.fail_download(&download.id, message) {
            warn!("Could not fail download {}: {:#}", download.id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AcquisitionStore, ClientType, DownloadStatus, RequestStatus};
    use crate::test_support::{hit, EngineFixture, FakeProvider, SubmitBehavior};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unrecorded_submission_escalates() {
        let f = EngineFixture::new(
            vec![Arc::new(FakeProvider::returning("p", vec![hit("a", Some(10))]))],
            &[("qb", ClientType::Qbittorrent, 1)],
        );
        f.store
            .execute_batch(
                "CREATE TRIGGER reject_submission BEFORE UPDATE OF external_id ON downloads
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
            .unwrap();
        let request = f.claimed_request();

        let outcome = f.engine.process_search(request.clone()).await;

        assert!(
            matches!(outcome, SearchStageOutcome::Escalated(ref m) if m.contains("could not be recorded")),
            "{:?}",
            outcome
        );
        assert_eq!(f.client("qb").submitted().len(), 1);
        assert!(f.store.active_download_for_request(&request.id).unwrap().is_none());
        let request = f.request(&request.id);
        assert!(request.attention_needed);
        assert_eq!(f.engine.retry_request(&request.id).await.unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_silent_drop_escalates_and_frees_request() {
        let f = EngineFixture::new(
            vec![Arc::new(FakeProvider::returning("p", vec![hit("a", Some(10))]))],
            &[("qb", ClientType::Qbittorrent, 1)],
        );
        f.client("qb").queue_submit(SubmitBehavior::SilentDrop);
        let request = f.claimed_request();

        let outcome = f.engine.process_search(request.clone()).await;

        assert!(matches!(outcome, SearchStageOutcome::Escalated(m) if m.contains("Submission to qb failed")));
        let downloads = f.store.downloads_for_request(&request.id).unwrap();
        assert_eq!(downloads[0].status, DownloadStatus::Failed);
        assert!(f.store.active_download_for_request(&request.id).unwrap().is_none());
        assert_eq!(f.request(&request.id).status, RequestStatus::Searching);
    }

    #[tokio::test]
    async fn test_no_client_for_transfer_type_escalates() {
        let f = EngineFixture::new(
            vec![Arc::new(FakeProvider::returning("p", vec![hit("a", Some(10))]))],
            &[("nzb", ClientType::Sabnzbd, 1)],
        );
        let request = f.claimed_request();

        let outcome = f.engine.process_search(request.clone()).await;

        assert!(matches!(outcome, SearchStageOutcome::Escalated(m) if m.contains("No usable download client")));
        assert!(f.store.active_download_for_request(&request.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_client_escalates() {
        let f = EngineFixture::new(
            vec![Arc::new(FakeProvider::returning("p", vec![hit("a", Some(10))]))],
            &[("qb", ClientType::Qbittorrent, 1)],
        );
        f.client("qb").set_reachable(false);
        let request = f.claimed_request();

        let outcome = f.engine.process_search(request).await;
        assert!(matches!(outcome, SearchStageOutcome::Escalated(m) if m.contains("No download client available")));
    }
}
