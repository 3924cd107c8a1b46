use super::{build_query, selector, ProviderFactory, SearchHit, SearchProvider};
use crate::config::Settings;
use crate::error::{EngineError, ErrorKind};
use crate::store::{Book, CandidateStatus, Request, SearchResult};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a search over all providers produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Normalized candidates, deduplicated by guid.
    Found(Vec<SearchResult>),
    /// At least one provider answered, none had hits.
    Empty,
    /// No provider is configured; nothing was queried.
    NotConfigured,
    /// Every provider failed. Holds the most actionable error.
    AllFailed(EngineError),
}

pub struct SearchAggregator {
    factory: ProviderFactory,
}

impl SearchAggregator {
    pub fn new(factory: ProviderFactory) -> Self {
        Self { factory }
    }

    pub async fn search(
        &self,
        settings: &Settings,
        request: &Request,
        book: &Book,
        now: i64,
    ) -> SearchOutcome {
        let providers: Vec<Arc<dyn SearchProvider>> = (self.factory)(settings)
            .into_iter()
            .filter(|p| p.is_configured())
            .collect();
        if providers.is_empty() {
            return SearchOutcome::NotConfigured;
        }

        let query = build_query(book, request.language.as_deref(), &settings.search.default_language);
        info!(
            "Searching {} provider(s) for request {}: {:?}",
            providers.len(),
            request.id,
            query
        );

        let results = join_all(providers.iter().map(|provider| {
            let query = query.clone();
            async move {
                let result = provider.search(&query, book.book_type).await;
                (provider.name().to_string(), result)
            }
        }))
        .await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut answered = 0usize;
        let mut errors: Vec<EngineError> = Vec::new();

        for (source, result) in results {
            match result {
                Ok(hits) => {
                    answered += 1;
                    debug!("{} returned {} hit(s)", source, hits.len());
                    for hit in hits {
                        if !seen.insert(hit.guid.clone()) {
                            continue;
                        }
                        candidates.push(to_candidate(hit, &source, request, settings, now));
                    }
                }
                Err(err) => {
                    warn!("Search provider {} failed for request {}: {}", source, request.id, err);
                    errors.push(err);
                }
            }
        }

        if !candidates.is_empty() {
            SearchOutcome::Found(candidates)
        } else if answered > 0 {
            SearchOutcome::Empty
        } else {
            SearchOutcome::AllFailed(most_actionable(errors))
        }
    }
}

/// Authentication beats client errors beat transient ones: a human must
/// fix the first two, retrying fixes the last.
fn most_actionable(errors: Vec<EngineError>) -> EngineError {
    let rank = |e: &EngineError| match e.kind() {
        ErrorKind::Authentication => 0,
        ErrorKind::NotConfigured => 1,
        ErrorKind::Client | ErrorKind::Validation | ErrorKind::Storage => 2,
        ErrorKind::Connection => 3,
    };
    errors
        .into_iter()
        .min_by_key(|e| rank(e))
        .unwrap_or_else(|| EngineError::Client("All search providers failed".to_string()))
}

fn to_candidate(
    hit: SearchHit,
    source: &str,
    request: &Request,
    settings: &Settings,
    now: i64,
) -> SearchResult {
    let mut candidate = SearchResult {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request.id.clone(),
        guid: hit.guid,
        title: hit.title,
        indexer: hit.indexer,
        source: source.to_string(),
        size_bytes: hit.size_bytes,
        seeders: hit.seeders,
        leechers: hit.leechers,
        download_url: hit.download_url,
        magnet_url: hit.magnet_url,
        info_url: hit.info_url,
        published_at: hit.published_at,
        download_type: hit.download_type,
        status: CandidateStatus::Pending,
        score: 0.0,
        created_at: now,
    };
    candidate.score = selector::score(&candidate, &settings.selection);
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{hit, sample_book, FakeProvider};

    fn aggregator(providers: Vec<Arc<FakeProvider>>) -> SearchAggregator {
        SearchAggregator::new(Arc::new(move |_: &Settings| -> Vec<Arc<dyn SearchProvider>> {
            providers
                .iter()
                .map(|p| p.clone() as Arc<dyn SearchProvider>)
                .collect()
        }))
    }

    fn request() -> Request {
        Request::new("book-1", "user-1", None, 100)
    }

    #[tokio::test]
    async fn test_hits_from_two_providers_tagged_by_source() {
        let empty = Arc::new(FakeProvider::returning("prowlarr", vec![]));
        let full = Arc::new(FakeProvider::returning(
            "jackett",
            vec![hit("g1", Some(5)), hit("g2", Some(3)), hit("g3", None)],
        ));
        let outcome = aggregator(vec![empty, full])
            .search(&Settings::default(), &request(), &sample_book(), 200)
            .await;

        let SearchOutcome::Found(candidates) = outcome else {
            panic!("expected candidates");
        };
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.source == "jackett"));
        assert!(candidates.iter().all(|c| c.status == CandidateStatus::Pending));
    }

    #[tokio::test]
    async fn test_duplicate_guids_collapsed() {
        let a = Arc::new(FakeProvider::returning("a", vec![hit("same", Some(1))]));
        let b = Arc::new(FakeProvider::returning("b", vec![hit("same", Some(9))]));
        let outcome = aggregator(vec![a, b])
            .search(&Settings::default(), &request(), &sample_book(), 200)
            .await;
        let SearchOutcome::Found(candidates) = outcome else {
            panic!("expected candidates");
        };
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_swallowed_when_another_provider_answers() {
        let broken = Arc::new(FakeProvider::failing(
            "broken",
            EngineError::Client("bot protection page".into()),
        ));
        let empty = Arc::new(FakeProvider::returning("empty", vec![]));
        let outcome = aggregator(vec![broken, empty])
            .search(&Settings::default(), &request(), &sample_book(), 200)
            .await;
        assert_eq!(outcome, SearchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_unconfigured_providers_never_queried() {
        let unconfigured = Arc::new(FakeProvider::returning("p", vec![hit("g", Some(1))]));
        unconfigured.set_configured(false);
        let outcome = aggregator(vec![unconfigured.clone()])
            .search(&Settings::default(), &request(), &sample_book(), 200)
            .await;
        assert_eq!(outcome, SearchOutcome::NotConfigured);
        assert_eq!(unconfigured.search_count(), 0);
    }

    #[tokio::test]
    async fn test_auth_error_preferred_when_all_fail() {
        let timeout = Arc::new(FakeProvider::failing("a", EngineError::Connection("timeout".into())));
        let auth = Arc::new(FakeProvider::failing("b", EngineError::Authentication("bad key".into())));
        let outcome = aggregator(vec![timeout, auth])
            .search(&Settings::default(), &request(), &sample_book(), 200)
            .await;
        assert!(matches!(outcome, SearchOutcome::AllFailed(EngineError::Authentication(_))));
    }
}
