use super::context::JobContext;
use super::handle::{JobRun, JobRunStatus, SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on one scheduler sleep, so settings changes to intervals
/// are picked up even when nothing else wakes the loop.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// How long shutdown waits for a job that must finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Currently running jobs with their task handles (not shared, managed by scheduler loop)
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Receiver for hook events (startup, settings reload).
    hook_receiver: mpsc::Receiver<HookEvent>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,

    /// Poked by finished jobs so the loop re-arms their timers.
    wakeup: Arc<Notify>,
}

impl JobScheduler {
    pub fn new(
        hook_receiver: mpsc::Receiver<HookEvent>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            hook_receiver,
            command_receiver,
            shutdown_token,
            job_context,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Register a job with the scheduler. Interval jobs first fire one
    /// interval from now unless a hook runs them earlier.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let settings = self.job_context.settings();
        let mut state = self.shared_state.write().await;
        if let Some(interval) = job.schedule(&settings).interval() {
            state.next_runs.insert(job_id.clone(), after(interval));
        }
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                _ = self.wakeup.notified() => {}
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Handle a command from the SchedulerHandle.
    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }

        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    /// Calculate time until the next scheduled job should run.
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let state = self.shared_state.read().await;
        let now = Utc::now();
        state
            .next_runs
            .iter()
            .filter(|(job_id, _)| !state.running_jobs.contains(*job_id))
            .map(|(_, next_run)| (*next_run - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP)
    }

    /// Run all jobs that are due for scheduled execution.
    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let jobs_to_run: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .next_runs
                .iter()
                .filter(|(job_id, next_run)| {
                    **next_run <= now && !state.running_jobs.contains(*job_id)
                })
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Trigger all jobs that listen for a specific hook event.
    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let settings = self.job_context.settings();
        let mut jobs_to_trigger = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    debug!("Skipping hook trigger for already running job: {}", job_id);
                    continue;
                }
                if job.schedule(&settings).listens_to(event) {
                    jobs_to_trigger.push(job_id.clone());
                }
            }
        }

        for job_id in jobs_to_trigger {
            let trigger = format!("hook:{}", event);
            self.spawn_job(&job_id, &trigger).await;
        }
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let mut state = self.shared_state.write().await;
            let Some(job) = state.jobs.get(job_id).map(Arc::clone) else {
                error!("Attempted to spawn unknown job: {}", job_id);
                return;
            };
            state.running_jobs.insert(job_id.to_string());
            state.next_runs.remove(job_id);
            state.record_run(
                job_id,
                JobRun {
                    started_at: Utc::now(),
                    finished_at: None,
                    status: JobRunStatus::Running,
                    error_message: None,
                    triggered_by: triggered_by.to_string(),
                },
            );
            job
        };

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token.clone());

        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);
        let wakeup = Arc::clone(&self.wakeup);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = match job.shutdown_behavior() {
                ShutdownBehavior::WaitForCompletion => job.execute(&ctx).await,
                ShutdownBehavior::Cancellable => tokio::select! {
                    result = job.execute(&ctx) => result,
                    _ = cancel_token.cancelled() => Err(JobError::Cancelled),
                },
            };
            let elapsed = start_time.elapsed();

            let (status, error_msg) = match result {
                Ok(()) => {
                    debug!("Job {} completed in {:?}", job_id_owned, elapsed);
                    (JobRunStatus::Completed, None)
                }
                Err(JobError::Cancelled) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (JobRunStatus::Cancelled, Some("Cancelled".to_string()))
                }
                Err(e) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()))
                }
            };

            // Re-arm from the end of this run with the interval currently
            // configured.
            let settings = ctx.settings();
            let mut state = shared_state.write().await;
            state.finish_run(&job_id_owned, |run| {
                run.finished_at = Some(Utc::now());
                run.status = status;
                run.error_message = error_msg;
            });
            state.running_jobs.remove(&job_id_owned);
            if let Some(interval) = job.schedule(&settings).interval() {
                state.next_runs.insert(job_id_owned, after(interval));
            }
            drop(state);
            wakeup.notify_one();
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Clean up handles for completed jobs.
    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                if let Err(e) = handle.await {
                    error!("Job {} panicked: {}", job_id, e);
                    self.recover_panicked(&job_id).await;
                }
            }
            self.job_cancel_tokens.remove(&job_id);
        }
    }

    /// A panicked job never reached its own bookkeeping.
    async fn recover_panicked(&self, job_id: &str) {
        let settings = self.job_context.settings();
        let mut state = self.shared_state.write().await;
        state.finish_run(job_id, |run| {
            run.finished_at = Some(Utc::now());
            run.status = JobRunStatus::Failed;
            run.error_message = Some("Task panic".to_string());
        });
        state.running_jobs.remove(job_id);
        let interval = state
            .jobs
            .get(job_id)
            .and_then(|job| job.schedule(&settings).interval());
        if let Some(interval) = interval {
            state.next_runs.insert(job_id.to_string(), after(interval));
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        {
            let state = self.shared_state.read().await;
            for job_id in &state.running_jobs {
                if let Some(job) = state.jobs.get(job_id) {
                    if job.shutdown_behavior() == ShutdownBehavior::Cancellable {
                        if let Some(token) = self.job_cancel_tokens.get(job_id) {
                            debug!("Cancelling job: {}", job_id);
                            token.cancel();
                        }
                    }
                }
            }
        }

        let mut wait_jobs = Vec::new();
        for (job_id, handle) in self.running_handles.drain() {
            let behavior = {
                let state = self.shared_state.read().await;
                state
                    .jobs
                    .get(&job_id)
                    .map(|j| j.shutdown_behavior())
                    .unwrap_or_default()
            };
            wait_jobs.push((job_id, handle, behavior));
        }

        for (job_id, handle, behavior) in wait_jobs {
            if behavior == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} to complete...", job_id);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Job {} did not finish within {:?}", job_id, SHUTDOWN_GRACE);
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

fn after(interval: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default()
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    hook_receiver: mpsc::Receiver<HookEvent>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));
    let settings = job_context.engine.settings().clone();

    let scheduler = JobScheduler::new(
        hook_receiver,
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );

    let handle = SchedulerHandle::new(command_tx, shared_state, settings);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::job::JobSchedule;
    use crate::config::Settings;
    use crate::test_support::EngineFixture;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        execution_count: Arc<AtomicUsize>,
        should_fail: Arc<AtomicBool>,
        hold: Duration,
    }

    impl TestJob {
        fn new(id: &'static str, schedule: JobSchedule) -> Self {
            Self {
                id,
                schedule,
                execution_count: Arc::new(AtomicUsize::new(0)),
                should_fail: Arc::new(AtomicBool::new(false)),
                hold: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn schedule(&self, _settings: &Settings) -> JobSchedule {
            self.schedule.clone()
        }

        async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            if self.should_fail.load(Ordering::SeqCst) {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn create_test_scheduler(
        fixture: &EngineFixture,
    ) -> (JobScheduler, SchedulerHandle, mpsc::Sender<HookEvent>, CancellationToken) {
        let (hook_sender, hook_receiver) = mpsc::channel(10);
        let shutdown_token = CancellationToken::new();
        let ctx = fixture.job_context().with_token(shutdown_token.child_token());
        let (scheduler, handle) = create_scheduler(hook_receiver, shutdown_token.clone(), ctx);
        (scheduler, handle, hook_sender, shutdown_token)
    }

    async fn wait_for(count: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if count.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job ran {} times, expected {}", count.load(Ordering::SeqCst), expected);
    }

    #[tokio::test]
    async fn test_register_and_list_jobs() {
        let f = EngineFixture::new(vec![], &[]);
        let (mut scheduler, handle, _hooks, _shutdown) = create_test_scheduler(&f);

        assert!(handle.list_jobs().await.is_empty());
        scheduler
            .register_job(Arc::new(TestJob::new("job_b", JobSchedule::Interval(Duration::from_secs(60)))))
            .await;
        scheduler
            .register_job(Arc::new(TestJob::new("job_a", JobSchedule::Hook(HookEvent::OnStartup))))
            .await;

        let jobs = handle.list_jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "job_a");
        assert!(jobs[0].next_run_at.is_none());
        assert!(jobs[1].next_run_at.is_some());
        assert!(!jobs[1].is_running);
        assert!(jobs[1].last_run.is_none());
        assert!(handle.job_exists("job_a").await);
        assert!(handle.get_job("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_startup_hook_and_manual_trigger() {
        let f = EngineFixture::new(vec![], &[]);
        let (mut scheduler, handle, _hooks, shutdown) = create_test_scheduler(&f);
        let job = Arc::new(TestJob::new("startup", JobSchedule::Hook(HookEvent::OnStartup)));
        let count = job.execution_count.clone();
        scheduler.register_job(job).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        wait_for(&count, 1).await;

        // wait until the startup run has been booked as finished
        for _ in 0..200 {
            if !handle.is_job_running("startup").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.trigger_job("startup").await.unwrap();
        wait_for(&count, 2).await;
        assert_eq!(handle.trigger_job("missing").await, Err(JobError::NotFound));

        shutdown.cancel();
        task.await.unwrap();
        let history = handle.get_job_history("startup", 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].triggered_by, "manual");
        assert_eq!(history[1].triggered_by, "hook:OnStartup");
    }

    #[tokio::test]
    async fn test_interval_job_rearms_after_run() {
        let f = EngineFixture::new(vec![], &[]);
        let (mut scheduler, handle, _hooks, shutdown) = create_test_scheduler(&f);
        let job = Arc::new(TestJob::new(
            "ticker",
            JobSchedule::Interval(Duration::from_millis(30)),
        ));
        job.should_fail.store(true, Ordering::SeqCst);
        let count = job.execution_count.clone();
        scheduler.register_job(job).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        wait_for(&count, 3).await;
        shutdown.cancel();
        task.await.unwrap();

        let last = handle.get_job("ticker").await.unwrap().last_run.unwrap();
        assert!(last.status == "failed" || last.status == "running" || last.status == "cancelled");
        let history = handle.get_job_history("ticker", 50).await;
        assert!(history.iter().any(|r| r.error_message.as_deref() == Some("Execution failed: Test failure")));
    }

    #[tokio::test]
    async fn test_running_job_cannot_be_triggered_twice() {
        let f = EngineFixture::new(vec![], &[]);
        let (mut scheduler, handle, _hooks, shutdown) = create_test_scheduler(&f);
        let mut job = TestJob::new("slow", JobSchedule::Hook(HookEvent::OnSettingsReload));
        job.hold = Duration::from_millis(300);
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        handle.trigger_job("slow").await.unwrap();
        wait_for(&count, 1).await;
        assert_eq!(handle.trigger_job("slow").await, Err(JobError::AlreadyRunning));

        shutdown.cancel();
        task.await.unwrap();
        let history = handle.get_job_history("slow", 10).await;
        assert_eq!(history[0].status, "cancelled");
    }

    #[tokio::test]
    async fn test_hook_event_triggers_listening_jobs_only() {
        let f = EngineFixture::new(vec![], &[]);
        let (mut scheduler, _handle, hooks, shutdown) = create_test_scheduler(&f);
        let reload = Arc::new(TestJob::new("reload", JobSchedule::Hook(HookEvent::OnSettingsReload)));
        let startup = Arc::new(TestJob::new("startup", JobSchedule::Hook(HookEvent::OnStartup)));
        let reload_count = reload.execution_count.clone();
        let startup_count = startup.execution_count.clone();
        scheduler.register_job(reload).await;
        scheduler.register_job(startup).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        wait_for(&startup_count, 1).await;
        assert_eq!(reload_count.load(Ordering::SeqCst), 0);

        hooks.send(HookEvent::OnSettingsReload).await.unwrap();
        wait_for(&reload_count, 1).await;
        assert_eq!(startup_count.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        task.await.unwrap();
    }
}
