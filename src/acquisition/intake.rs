//! Operator and user facing request operations.

use super::engine::AcquisitionEngine;
use super::search_stage::SearchStageOutcome;
use crate::duplicates::{BookIdentity, DuplicateCheck};
use crate::error::EngineError;
use crate::post_processing::ProcessOutcome;
use crate::store::{Book, BookType, CancelOutcome, Request, RequestStatus, SearchResult};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("Request {0} not found")]
    NotFound(String),

    #[error("Request is {0} and cannot be cancelled")]
    NotCancellable(RequestStatus),

    #[error("Request is {0} without an open issue; nothing to retry")]
    NotRetryable(RequestStatus),

    #[error("Request is {0}; candidates can only be picked while searching")]
    NotSelectable(RequestStatus),

    #[error("Request {0} already has an active download")]
    AlreadyDownloading(String),

    #[error("Candidate {0} not found for this request")]
    CandidateNotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// A book someone wants, as submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRequest {
    pub requester_id: String,
    pub title: String,
    pub author: Option<String>,
    pub book_type: BookType,
    pub work_source: Option<String>,
    pub work_id: Option<String>,
    pub edition_id: Option<String>,
    pub year: Option<i32>,
    pub publisher: Option<String>,
    /// Language of the book itself.
    pub language: Option<String>,
    /// Per-request search language override.
    pub search_language: Option<String>,
}

impl NewRequest {
    fn identity(&self) -> BookIdentity {
        BookIdentity {
            title: self.title.trim().to_string(),
            author: self.author.clone(),
            book_type: self.book_type,
            work_id: self.work_id.clone(),
            edition_id: self.edition_id.clone(),
        }
    }

    fn to_book(&self, now: i64) -> Book {
        Book {
            id: uuid::Uuid::new_v4().to_string(),
            title: self.title.trim().to_string(),
            author: self.author.clone(),
            book_type: self.book_type,
            work_source: self.work_source.clone(),
            work_id: self.work_id.clone(),
            edition_id: self.edition_id.clone(),
            year: self.year,
            publisher: self.publisher.clone(),
            language: self.language.clone(),
            file_path: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRequest {
    pub request: Request,
    pub book: Book,
    /// Duplicate-check warning shown to the requester, if any.
    pub warning: Option<String>,
}

impl AcquisitionEngine {
    /// Run the duplicate check and queue a new request.
    pub fn create_request(&self, new: NewRequest) -> Result<CreatedRequest, RequestError> {
        if new.title.trim().is_empty() {
            return Err(RequestError::Invalid("title is required".to_string()));
        }
        if new.requester_id.trim().is_empty() {
            return Err(RequestError::Invalid("requester is required".to_string()));
        }

        let identity = new.identity();
        let warning = match self.duplicates.check(&identity)? {
            DuplicateCheck::Block(reason) => return Err(RequestError::Duplicate(reason)),
            DuplicateCheck::Warn(reason) => Some(reason),
            DuplicateCheck::Allow => None,
        };

        let now = super::now();
        let book = match self.duplicates.resolve_book(&identity)? {
            Some(book) => book,
            None => {
                let book = new.to_book(now);
                self.store.insert_book(&book)?;
                book
            }
        };

        let request = Request::new(&book.id, &new.requester_id, new.search_language.clone(), now);
        self.store.insert_request(&request)?;
        info!(
            "Queued {} request {} for '{}' by {}",
            book.book_type, request.id, book.title, request.requester_id
        );
        Ok(CreatedRequest {
            request,
            book,
            warning,
        })
    }

    /// Delete a request that has not reached processing. A transfer
    /// already accepted by a client is left alone.
    pub fn cancel_request(&self, id: &str) -> Result<bool, RequestError> {
        match self.store.cancel_request(id)? {
            CancelOutcome::Cancelled { book_deleted } => {
                info!(
                    "Cancelled request {}{}",
                    id,
                    if book_deleted { " and its orphaned book" } else { "" }
                );
                Ok(book_deleted)
            }
            CancelOutcome::NotFound => Err(RequestError::NotFound(id.to_string())),
            CancelOutcome::NotCancellable(status) => Err(RequestError::NotCancellable(status)),
        }
    }

    /// Put a request with an open issue back in the queue. A delivery that
    /// needs attention is re-run from the last completed download instead.
    pub async fn retry_request(&self, id: &str) -> Result<Request, RequestError> {
        let request = self.get_request(id)?;

        if request.status == RequestStatus::Processing {
            if !request.attention_needed {
                return Err(RequestError::NotRetryable(request.status));
            }
            let download = self
                .store
                .latest_completed_download(&request.id)?
                .ok_or_else(|| RequestError::NotRetryable(request.status))?;
            let settings = self.snapshot();
            info!("Re-running delivery for request {}", request.id);
            if let ProcessOutcome::Skipped = self
                .post_processor
                .process(&settings, &request, &download)
                .await
            {
                return Err(RequestError::NotRetryable(request.status));
            }
            return self.get_request(id);
        }

        if !self.store.reset_for_retry(&request.id)? {
            return Err(RequestError::NotRetryable(request.status));
        }
        info!("Request {} queued for retry", request.id);
        self.get_request(id)
    }

    /// Accept a candidate picked by hand.
    pub async fn select_candidate(
        &self,
        request_id: &str,
        candidate_id: &str,
    ) -> Result<(Request, SearchStageOutcome), RequestError> {
        let request = self.get_request(request_id)?;
        let candidate = self
            .store
            .get_candidate(candidate_id)?
            .filter(|c| c.request_id == request.id)
            .ok_or_else(|| RequestError::CandidateNotFound(candidate_id.to_string()))?;

        match request.status {
            RequestStatus::Searching => {}
            RequestStatus::Downloading => {
                if self.store.active_download_for_request(&request.id)?.is_some() {
                    return Err(RequestError::AlreadyDownloading(request.id));
                }
                // The previous transfer failed or vanished; pick again
                self.store.transition(
                    &request.id,
                    &[RequestStatus::Downloading],
                    RequestStatus::Searching,
                )?;
            }
            status => return Err(RequestError::NotSelectable(status)),
        }

        let settings = self.snapshot();
        info!("Manual pick of '{}' for request {}", candidate.title, request.id);
        let outcome = self
            .accept_and_submit(&settings, &request, &candidate)
            .await;
        Ok((self.get_request(request_id)?, outcome))
    }

    pub fn get_request(&self, id: &str) -> Result<Request, RequestError> {
        self.store
            .get_request(id)?
            .ok_or_else(|| RequestError::NotFound(id.to_string()))
    }

    pub fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<Request>, RequestError> {
        Ok(self.store.list_requests(status)?)
    }

    /// Candidates for a request, best first.
    pub fn list_candidates(&self, request_id: &str) -> Result<Vec<SearchResult>, RequestError> {
        Ok(self.store.list_candidates(request_id)?)
    }
}
