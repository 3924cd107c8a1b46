//! Search providers, result aggregation and candidate selection.

mod aggregator;
mod jackett;
mod prowlarr;
mod query;
pub mod selector;

pub use aggregator::{SearchAggregator, SearchOutcome};
pub use jackett::JackettProvider;
pub use prowlarr::ProwlarrProvider;
pub use query::{build_query, language_name};

use crate::config::{SearchProviderSettings, Settings};
use crate::error::EngineError;
use crate::store::{BookType, DownloadType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Indexer aggregators we know how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Prowlarr,
    Jackett,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Prowlarr => "prowlarr",
            ProviderKind::Jackett => "jackett",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "prowlarr" => Some(ProviderKind::Prowlarr),
            "jackett" => Some(ProviderKind::Jackett),
            _ => None,
        }
    }

    /// Newznab categories: 3030 audiobooks, 7020 ebooks.
    pub fn default_categories(&self, book_type: BookType) -> Vec<u32> {
        match book_type {
            BookType::Audiobook => vec![3030],
            BookType::Ebook => vec![7020],
        }
    }
}

/// One normalized hit as returned by a provider, before it is attached to
/// a request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub guid: String,
    pub title: String,
    pub indexer: Option<String>,
    pub size_bytes: Option<i64>,
    pub seeders: Option<i64>,
    pub leechers: Option<i64>,
    pub download_url: Option<String>,
    pub magnet_url: Option<String>,
    pub info_url: Option<String>,
    pub published_at: Option<i64>,
    pub download_type: DownloadType,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Label attached to every hit as its source.
    fn name(&self) -> &str;

    /// Whether endpoint and credentials are present. Unconfigured
    /// providers are skipped without network I/O.
    fn is_configured(&self) -> bool;

    async fn search(&self, query: &str, book_type: BookType) -> Result<Vec<SearchHit>, EngineError>;

    async fn test(&self) -> Result<(), EngineError>;
}

/// Builds the provider set from the current settings.
pub type ProviderFactory = Arc<dyn Fn(&Settings) -> Vec<Arc<dyn SearchProvider>> + Send + Sync>;

/// Enabled providers from settings, one adapter per entry.
pub fn build_providers(settings: &Settings) -> Vec<Arc<dyn SearchProvider>> {
    settings
        .search_providers
        .iter()
        .filter(|p| p.enabled)
        .filter_map(|p| match build_provider(p, settings.search.timeout) {
            Ok(provider) => Some(provider),
            Err(err) => {
                tracing::warn!("Skipping search provider {}: {}", p.name, err);
                None
            }
        })
        .collect()
}

fn build_provider(
    settings: &SearchProviderSettings,
    timeout: Duration,
) -> Result<Arc<dyn SearchProvider>, EngineError> {
    Ok(match settings.kind {
        ProviderKind::Prowlarr => Arc::new(ProwlarrProvider::new(settings.clone(), timeout)?),
        ProviderKind::Jackett => Arc::new(JackettProvider::new(settings.clone(), timeout)?),
    })
}

/// Providers answer with JSON; an HTML body means a bot-protection page or
/// a URL pointing at the web UI.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    service: &str,
    body: &str,
) -> Result<T, EngineError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let lower = trimmed.to_ascii_lowercase();
        let reason = if lower.contains("just a moment") || lower.contains("cloudflare") {
            "bot protection page"
        } else {
            "HTML page"
        };
        return Err(EngineError::Client(format!(
            "{} returned a {} instead of results",
            service, reason
        )));
    }
    serde_json::from_str(body)
        .map_err(|e| EngineError::Client(format!("{} returned unreadable results: {}", service, e)))
}

/// Parse RFC 3339 dates as Prowlarr and Jackett emit them.
pub(crate) fn parse_published(value: Option<&str>) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(value?.trim())
        .ok()
        .map(|dt| dt.timestamp())
}
