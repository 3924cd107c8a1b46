//! The pipeline's periodic jobs.

pub mod download_monitor;
pub mod health_check;
pub mod queue_sweep;

pub use download_monitor::DownloadMonitorJob;
pub use health_check::HealthCheckJob;
pub use queue_sweep::QueueSweepJob;
