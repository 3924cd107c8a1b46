//! The acquisition engine: request intake, the queue sweep, search and
//! selection, submission to download clients, completion monitoring and
//! hand-off to post-processing.

mod download_stage;
mod engine;
mod intake;
mod monitor;
mod queue;
mod retry_policy;
mod search_stage;

pub use engine::{AcquisitionEngine, EngineComponents};
pub use intake::{CreatedRequest, NewRequest, RequestError};
pub use monitor::MonitorReport;
pub use queue::SweepReport;
pub use retry_policy::RetryPolicy;
pub use search_stage::SearchStageOutcome;

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
