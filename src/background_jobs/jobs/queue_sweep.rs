//! Queue sweep background job.
//!
//! Promotes due retries, claims a batch of pending requests and runs the
//! search stage for each.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::Settings;
use async_trait::async_trait;
use tracing::{debug, info};

pub struct QueueSweepJob;

#[async_trait]
impl BackgroundJob for QueueSweepJob {
    fn id(&self) -> &'static str {
        "queue_sweep"
    }

    fn name(&self) -> &'static str {
        "Queue Sweep"
    }

    fn description(&self) -> &'static str {
        "Search for pending requests and submit the best result"
    }

    fn schedule(&self, settings: &Settings) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(settings.scheduler.queue_interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Claimed requests left in searching are reset on the next startup
        ShutdownBehavior::Cancellable
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = ctx
            .engine
            .run_queue_sweep()
            .await
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        if report.dispatched > 0 || report.promoted > 0 {
            info!(
                "Queue sweep: {} promoted, {} dispatched, {} submitted, {} retry scheduled, {} escalated",
                report.promoted,
                report.dispatched,
                report.submitted,
                report.retry_scheduled,
                report.escalated
            );
        } else {
            debug!("Queue sweep: nothing pending");
        }
        Ok(())
    }
}
