//! Download monitor background job.
//!
//! Polls download clients for every active download and hands completed
//! ones to post-processing.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::Settings;
use async_trait::async_trait;
use tracing::{debug, info};

pub struct DownloadMonitorJob;

#[async_trait]
impl BackgroundJob for DownloadMonitorJob {
    fn id(&self) -> &'static str {
        "download_monitor"
    }

    fn name(&self) -> &'static str {
        "Download Monitor"
    }

    fn description(&self) -> &'static str {
        "Track download progress and deliver finished downloads"
    }

    fn schedule(&self, settings: &Settings) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(settings.scheduler.monitor_interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // A delivery interrupted mid-copy leaves a partial file in the library
        ShutdownBehavior::WaitForCompletion
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = ctx
            .engine
            .run_download_monitor()
            .await
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        if report.completed > 0 || report.failed > 0 {
            info!(
                "Download monitor: {} checked, {} completed, {} delivered, {} failed",
                report.checked, report.completed, report.delivered, report.failed
            );
        } else {
            debug!(
                "Download monitor: {} checked, {} progressed, {} error(s)",
                report.checked, report.progressed, report.errors
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download_clients::TransferState;
    use crate::store::{AcquisitionStore, ClientType, DownloadStatus};
    use crate::test_support::{hit, EngineFixture, FakeProvider};
    use std::sync::Arc;

    #[test]
    fn test_waits_for_completion_on_shutdown() {
        assert_eq!(
            DownloadMonitorJob.shutdown_behavior(),
            ShutdownBehavior::WaitForCompletion
        );
    }

    #[tokio::test]
    async fn test_execute_records_progress() {
        let f = EngineFixture::new(
            vec![Arc::new(FakeProvider::returning("p", vec![hit("a", Some(3))]))],
            &[("qb", ClientType::Qbittorrent, 1)],
        );
        let request = f.claimed_request();
        f.engine.process_search(request.clone()).await;
        let download = f.store.active_download_for_request(&request.id).unwrap().unwrap();
        f.client("qb")
            .set_progress(download.external_id.as_deref().unwrap(), 55, TransferState::Downloading);

        DownloadMonitorJob.execute(&f.job_context()).await.unwrap();

        let stored = f.store.get_download(&download.id).unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Downloading);
        assert_eq!(stored.progress, 55);
    }
}
