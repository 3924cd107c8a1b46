//! Search and automatic selection for one claimed request.

use super::engine::AcquisitionEngine;
use super::retry_policy::RetryPolicy;
use crate::config::Settings;
use crate::search::selector::{self, Selection};
use crate::search::SearchOutcome;
use crate::store::{Request, RequestStatus, SearchResult};
use tracing::{debug, info, warn};

/// Where a search left its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStageOutcome {
    /// A candidate was accepted and handed to a download client.
    Submitted,
    /// Nothing usable; retry scheduled.
    RetryScheduled,
    /// Flagged for attention with this message.
    Escalated(String),
    /// Candidates stored, waiting for a manual pick.
    AwaitingSelection(usize),
    /// The request changed under us (cancelled, failed) and was skipped.
    Skipped,
}

impl AcquisitionEngine {
    /// Search all providers for a request in `searching` and act on the
    /// result. Never returns an error: failures end up on the request.
    pub async fn process_search(&self, request: Request) -> SearchStageOutcome {
        if request.status != RequestStatus::Searching {
            return SearchStageOutcome::Skipped;
        }
        let settings = self.snapshot();
        let book = match self.store.get_book(&request.book_id) {
            Ok(Some(book)) => book,
            Ok(None) => {
                let message = format!("Book {} no longer exists", request.book_id);
                if let Err(e) = self.store.mark_failed(&request.id, &message) {
                    warn!("Could not fail request {}: {:#}", request.id, e);
                }
                return SearchStageOutcome::Escalated(message);
            }
            Err(err) => {
                warn!("Could not load book for request {}: {:#}", request.id, err);
                return SearchStageOutcome::Skipped;
            }
        };

        let outcome = self
            .aggregator
            .search(&settings, &request, &book, super::now())
            .await;

        match outcome {
            SearchOutcome::NotConfigured => {
                self.escalate_search(&request, "No search providers are configured".to_string())
            }
            SearchOutcome::AllFailed(err) if err.is_retryable() => {
                info!("All providers failed for request {} ({}), will retry", request.id, err);
                self.schedule_retry(&settings, &request)
            }
            SearchOutcome::AllFailed(err) => {
                self.escalate_search(&request, format!("Search failed: {}", err))
            }
            SearchOutcome::Empty => {
                info!("No results for request {}", request.id);
                self.schedule_retry(&settings, &request)
            }
            SearchOutcome::Found(candidates) => {
                if let Err(err) = self.store.replace_candidates(&request.id, &candidates) {
                    warn!("Could not store candidates for request {}: {:#}", request.id, err);
                    return SearchStageOutcome::Skipped;
                }
                info!("{} candidate(s) for request {}", candidates.len(), request.id);
                self.select_automatically(&settings, &request, &candidates)
                    .await
            }
        }
    }

    async fn select_automatically(
        &self,
        settings: &Settings,
        request: &Request,
        candidates: &[SearchResult],
    ) -> SearchStageOutcome {
        if !settings.selection.auto_select {
            self.escalate(
                request,
                &format!("{} results found, pick one", candidates.len()),
            );
            return SearchStageOutcome::AwaitingSelection(candidates.len());
        }

        match selector::select(candidates, &settings.selection) {
            Selection::Accept(candidate) => {
                debug!(
                    "Auto-selected '{}' ({:?} seeders) for request {}",
                    candidate.title, candidate.seeders, request.id
                );
                self.accept_and_submit(settings, request, &candidate).await
            }
            Selection::NoUsableLink => self.escalate_search(
                request,
                format!(
                    "None of the {} results has a usable download link",
                    candidates.len()
                ),
            ),
            Selection::BelowThreshold {
                title,
                seeders,
                min_seeders,
            } => self.escalate_search(
                request,
                format!(
                    "Best result '{}' has {} seeder(s), below the minimum of {}; pick one manually",
                    title, seeders, min_seeders
                ),
            ),
        }
    }

    fn escalate_search(&self, request: &Request, message: String) -> SearchStageOutcome {
        self.escalate(request, &message);
        SearchStageOutcome::Escalated(message)
    }

    /// Move a searching request to `not_found` with its next retry time.
    pub(super) fn schedule_retry(&self, settings: &Settings, request: &Request) -> SearchStageOutcome {
        let policy = RetryPolicy::new(&settings.scheduler);
        let now = super::now();
        let next = policy.next_retry_at(request.retry_count, now);
        match self.store.mark_not_found(&request.id, next) {
            Ok(true) => {
                info!(
                    "Request {} not found, retry #{} in {}s",
                    request.id,
                    request.retry_count + 1,
                    next - now
                );
                SearchStageOutcome::RetryScheduled
            }
            Ok(false) => SearchStageOutcome::Skipped,
            Err(err) => {
                warn!("Could not schedule retry for {}: {:#}", request.id, err);
                SearchStageOutcome::Skipped
            }
        }
    }
}
