//! Health check background job.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use crate::config::Settings;
use async_trait::async_trait;
use tracing::debug;

pub struct HealthCheckJob;

#[async_trait]
impl BackgroundJob for HealthCheckJob {
    fn id(&self) -> &'static str {
        "health_check"
    }

    fn name(&self) -> &'static str {
        "Health Check"
    }

    fn description(&self) -> &'static str {
        "Probe search providers, download clients and the library viewer"
    }

    fn schedule(&self, settings: &Settings) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(settings.health.interval),
            hooks: vec![HookEvent::OnStartup, HookEvent::OnSettingsReload],
        }
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let settings = ctx.settings();
        let report = ctx
            .health
            .run(&settings)
            .await
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;
        debug!(
            "Health check: {} service(s), {} request(s) escalated",
            report.services.len(),
            report.escalated
        );
        Ok(())
    }
}
