use super::job::{BackgroundJob, JobError, JobSchedule};
use crate::config::SettingsHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Runs kept per job for `get_job_history`.
pub(super) const HISTORY_LIMIT: usize = 20;

/// Information about a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

/// Serializable schedule information.
#[derive(Debug, Clone, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<String>>,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        match schedule {
            JobSchedule::Interval(duration) => JobScheduleInfo {
                schedule_type: "interval".to_string(),
                value_secs: Some(duration.as_secs()),
                hooks: None,
            },
            JobSchedule::Hook(event) => JobScheduleInfo {
                schedule_type: "hook".to_string(),
                hooks: Some(vec![event.to_string()]),
                value_secs: None,
            },
            JobSchedule::Combined { interval, hooks } => JobScheduleInfo {
                schedule_type: "combined".to_string(),
                value_secs: interval.map(|d| d.as_secs()),
                hooks: Some(hooks.iter().map(|h| h.to_string()).collect()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
            JobRunStatus::Cancelled => "cancelled",
        }
    }
}

/// One execution of a job, kept in memory.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

/// Serializable job run information.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        JobRunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            error_message: run.error_message,
            triggered_by: run.triggered_by,
        }
    }
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    /// Static job info (set at registration, never changes)
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    /// Currently running job IDs
    pub running_jobs: HashSet<String>,
    /// Next timer firing per interval job
    pub next_runs: HashMap<String, DateTime<Utc>>,
    /// Most recent runs per job, newest last
    pub history: HashMap<String, VecDeque<JobRun>>,
}

impl SharedJobState {
    pub(super) fn record_run(&mut self, job_id: &str, run: JobRun) {
        let runs = self.history.entry(job_id.to_string()).or_default();
        runs.push_back(run);
        while runs.len() > HISTORY_LIMIT {
            runs.pop_front();
        }
    }

    /// Replace the newest run of a job, the one started last.
    pub(super) fn finish_run(&mut self, job_id: &str, f: impl FnOnce(&mut JobRun)) {
        if let Some(run) = self.history.get_mut(job_id).and_then(|runs| runs.back_mut()) {
            f(run);
        }
    }
}

/// Handle to interact with the job scheduler from the CLI and signal
/// handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// Channel to send commands to the scheduler
    command_tx: mpsc::Sender<SchedulerCommand>,
    /// Shared state for reading job info
    shared_state: Arc<RwLock<SharedJobState>>,
    /// Settings the job schedules are derived from
    settings: SettingsHandle,
}

impl SchedulerHandle {
    /// Create a new scheduler handle.
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
            settings,
        }
    }

    fn job_info(&self, state: &SharedJobState, job_id: &str) -> Option<JobInfo> {
        let job = state.jobs.get(job_id)?;
        let settings = self.settings.snapshot();
        Some(JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: job.schedule(&settings).into(),
            is_running: state.running_jobs.contains(job_id),
            last_run: state
                .history
                .get(job_id)
                .and_then(|runs| runs.back())
                .cloned()
                .map(JobRunInfo::from),
            next_run_at: state.next_runs.get(job_id).map(|at| at.to_rfc3339()),
        })
    }

    /// Get information about all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared_state.read().await;
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .keys()
            .filter_map(|job_id| self.job_info(&state, job_id))
            .collect();

        // Sort by job ID for consistent ordering
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Get information about a specific job.
    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        let state = self.shared_state.read().await;
        self.job_info(&state, job_id)
    }

    /// Trigger a job manually.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    /// Most recent runs of a job, newest first.
    pub async fn get_job_history(&self, job_id: &str, limit: usize) -> Vec<JobRunInfo> {
        let state = self.shared_state.read().await;
        state
            .history
            .get(job_id)
            .map(|runs| {
                runs.iter()
                    .rev()
                    .take(limit)
                    .cloned()
                    .map(JobRunInfo::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check if a job is currently running.
    pub async fn is_job_running(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.running_jobs.contains(job_id)
    }

    /// Check if a job with the given ID exists.
    pub async fn job_exists(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.jobs.contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::job::HookEvent;
    use std::time::Duration;

    #[test]
    fn test_job_schedule_info_from_interval() {
        let schedule = JobSchedule::Interval(Duration::from_secs(3600));
        let info: JobScheduleInfo = schedule.into();

        assert_eq!(info.schedule_type, "interval");
        assert_eq!(info.value_secs, Some(3600));
        assert!(info.hooks.is_none());
    }

    #[test]
    fn test_job_schedule_info_from_combined() {
        let schedule = JobSchedule::Combined {
            interval: Some(Duration::from_secs(60)),
            hooks: vec![HookEvent::OnStartup, HookEvent::OnSettingsReload],
        };
        let info: JobScheduleInfo = schedule.into();

        assert_eq!(info.schedule_type, "combined");
        assert_eq!(info.value_secs, Some(60));
        assert_eq!(
            info.hooks,
            Some(vec!["OnStartup".to_string(), "OnSettingsReload".to_string()])
        );
    }

    #[test]
    fn test_history_is_capped() {
        let mut state = SharedJobState::default();
        for i in 0..(HISTORY_LIMIT + 5) {
            state.record_run(
                "job",
                JobRun {
                    started_at: Utc::now(),
                    finished_at: None,
                    status: JobRunStatus::Running,
                    error_message: None,
                    triggered_by: format!("run-{}", i),
                },
            );
        }
        state.finish_run("job", |run| run.status = JobRunStatus::Completed);

        let runs = &state.history["job"];
        assert_eq!(runs.len(), HISTORY_LIMIT);
        assert_eq!(runs.front().unwrap().triggered_by, "run-5");
        assert_eq!(runs.back().unwrap().status, JobRunStatus::Completed);
    }

    #[test]
    fn test_job_run_info_conversion() {
        let run = JobRun {
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            status: JobRunStatus::Failed,
            error_message: Some("boom".to_string()),
            triggered_by: "manual".to_string(),
        };
        let info = JobRunInfo::from(run);
        assert_eq!(info.status, "failed");
        assert_eq!(info.triggered_by, "manual");
        assert!(info.finished_at.is_some());
    }
}
