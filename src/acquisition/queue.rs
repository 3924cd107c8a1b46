//! The queue sweep: promote due retries, claim pending requests and
//! dispatch their searches.

use super::engine::AcquisitionEngine;
use super::search_stage::SearchStageOutcome;
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts from one queue sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub promoted: usize,
    pub dispatched: usize,
    pub submitted: usize,
    pub retry_scheduled: usize,
    pub escalated: usize,
}

impl AcquisitionEngine {
    /// One pass of the queue. Claimed requests are searched concurrently,
    /// each start delayed by the rate-limit delay times its position, and
    /// the sweep returns once all of them have finished.
    pub async fn run_queue_sweep(self: &Arc<Self>) -> Result<SweepReport> {
        let settings = self.snapshot();
        let now = super::now();

        let promoted = self.store.promote_due_retries(now)?;
        if promoted > 0 {
            info!("{} request(s) due for another search", promoted);
        }

        let claimed = self
            .store
            .claim_pending(settings.scheduler.batch_size, now)?;
        if claimed.is_empty() {
            debug!("Queue sweep: nothing pending");
            return Ok(SweepReport {
                promoted,
                ..SweepReport::default()
            });
        }
        info!("Queue sweep: dispatching {} search(es)", claimed.len());

        let delay = settings.scheduler.rate_limit_delay;
        let handles: Vec<_> = claimed
            .into_iter()
            .enumerate()
            .map(|(position, request)| {
                let engine = Arc::clone(self);
                let stagger = delay.saturating_mul(position as u32);
                tokio::spawn(async move {
                    if !stagger.is_zero() {
                        tokio::time::sleep(stagger).await;
                    }
                    engine.process_search(request).await
                })
            })
            .collect();

        let mut report = SweepReport {
            promoted,
            dispatched: handles.len(),
            ..SweepReport::default()
        };
        for result in join_all(handles).await {
            match result {
                Ok(SearchStageOutcome::Submitted) => report.submitted += 1,
                Ok(SearchStageOutcome::RetryScheduled) => report.retry_scheduled += 1,
                Ok(SearchStageOutcome::Escalated(_)) => report.escalated += 1,
                Ok(_) => {}
                Err(err) => warn!("Search task panicked: {}", err),
            }
        }
        Ok(report)
    }
}
