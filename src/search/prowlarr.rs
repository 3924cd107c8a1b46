use super::{parse_json, parse_published, SearchHit, SearchProvider};
use crate::config::SearchProviderSettings;
use crate::error::EngineError;
use crate::store::{BookType, DownloadType};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProwlarrRelease {
    guid: String,
    title: String,
    #[serde(default)]
    indexer: Option<String>,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    seeders: Option<i64>,
    #[serde(default)]
    leechers: Option<i64>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    magnet_url: Option<String>,
    #[serde(default)]
    info_url: Option<String>,
    #[serde(default)]
    publish_date: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
}

impl From<ProwlarrRelease> for SearchHit {
    fn from(release: ProwlarrRelease) -> Self {
        let download_type = match release.protocol.as_deref() {
            Some("usenet") => DownloadType::Usenet,
            _ => DownloadType::Torrent,
        };
        let (seeders, leechers) = match download_type {
            DownloadType::Torrent => (release.seeders, release.leechers),
            DownloadType::Usenet => (None, None),
        };
        SearchHit {
            guid: release.guid,
            title: release.title,
            indexer: release.indexer,
            size_bytes: release.size,
            seeders,
            leechers,
            download_url: release.download_url,
            magnet_url: release.magnet_url,
            info_url: release.info_url,
            published_at: parse_published(release.publish_date.as_deref()),
            download_type,
        }
    }
}

/// Prowlarr v1 search API, authenticated with `X-Api-Key`.
pub struct ProwlarrProvider {
    settings: SearchProviderSettings,
    http: Client,
}

impl ProwlarrProvider {
    pub fn new(settings: SearchProviderSettings, timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::from_reqwest("Prowlarr", e))?;
        Ok(Self { settings, http })
    }

    fn endpoint(&self, path: &str) -> Result<(String, &str), EngineError> {
        match (&self.settings.url, &self.settings.api_key) {
            (Some(url), Some(key)) => Ok((
                format!("{}/api/v1/{}", url.trim_end_matches('/'), path),
                key.as_str(),
            )),
            _ => Err(EngineError::NotConfigured(format!(
                "Prowlarr provider '{}' needs url and api_key",
                self.settings.name
            ))),
        }
    }
}

#[async_trait]
impl SearchProvider for ProwlarrProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn is_configured(&self) -> bool {
        self.settings.url.is_some() && self.settings.api_key.is_some()
    }

    async fn search(&self, query: &str, book_type: BookType) -> Result<Vec<SearchHit>, EngineError> {
        let (url, api_key) = self.endpoint("search")?;
        let categories = match book_type {
            BookType::Audiobook => &self.settings.audiobook_categories,
            BookType::Ebook => &self.settings.ebook_categories,
        };
        let mut params: Vec<(&str, String)> = vec![
            ("query", query.to_string()),
            ("type", "search".to_string()),
        ];
        params.extend(categories.iter().map(|c| ("categories", c.to_string())));

        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", api_key)
            .query(&params)
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest("Prowlarr", e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::from_reqwest("Prowlarr", e))?;
        if !status.is_success() {
            return Err(EngineError::from_status("Prowlarr", status, &body));
        }

        let releases: Vec<ProwlarrRelease> = parse_json("Prowlarr", &body)?;
        Ok(releases.into_iter().map(SearchHit::from).collect())
    }

    async fn test(&self) -> Result<(), EngineError> {
        let (url, api_key) = self.endpoint("system/status")?;
        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", api_key)
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest("Prowlarr", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::from_status("Prowlarr", status, &body));
        }
        Ok(())
    }
}
