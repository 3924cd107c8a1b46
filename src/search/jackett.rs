use super::{parse_json, parse_published, SearchHit, SearchProvider};
use crate::config::SearchProviderSettings;
use crate::error::EngineError;
use crate::store::{BookType, DownloadType};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JackettResponse {
    #[serde(default)]
    results: Vec<JackettResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JackettResult {
    #[serde(default)]
    guid: Option<String>,
    title: String,
    #[serde(default)]
    tracker: Option<String>,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    seeders: Option<i64>,
    #[serde(default)]
    peers: Option<i64>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    magnet_uri: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    publish_date: Option<String>,
}

impl JackettResult {
    fn into_hit(self) -> Option<SearchHit> {
        let guid = self
            .guid
            .or_else(|| self.details.clone())
            .or_else(|| self.link.clone())
            .or_else(|| self.magnet_uri.clone())?;
        // Jackett reports peers including seeders
        let leechers = match (self.peers, self.seeders) {
            (Some(peers), Some(seeders)) => Some((peers - seeders).max(0)),
            _ => None,
        };
        Some(SearchHit {
            guid,
            title: self.title,
            indexer: self.tracker,
            size_bytes: self.size,
            seeders: self.seeders,
            leechers,
            download_url: self.link,
            magnet_url: self.magnet_uri,
            info_url: self.details,
            published_at: parse_published(self.publish_date.as_deref()),
            download_type: DownloadType::Torrent,
        })
    }
}

/// Jackett aggregate endpoint (`indexers/all`), authenticated with the
/// `apikey` query parameter.
pub struct JackettProvider {
    settings: SearchProviderSettings,
    http: Client,
}

impl JackettProvider {
    pub fn new(settings: SearchProviderSettings, timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::from_reqwest("Jackett", e))?;
        Ok(Self { settings, http })
    }

    fn credentials(&self) -> Result<(&str, &str), EngineError> {
        match (&self.settings.url, &self.settings.api_key) {
            (Some(url), Some(key)) => Ok((url.trim_end_matches('/'), key.as_str())),
            _ => Err(EngineError::NotConfigured(format!(
                "Jackett provider '{}' needs url and api_key",
                self.settings.name
            ))),
        }
    }

    async fn query(&self, params: Vec<(&str, String)>) -> Result<JackettResponse, EngineError> {
        let (base, api_key) = self.credentials()?;
        let url = format!("{}/api/v2.0/indexers/all/results", base);
        let mut query = vec![("apikey", api_key.to_string())];
        query.extend(params);

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest("Jackett", e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::from_reqwest("Jackett", e))?;
        if !status.is_success() {
            return Err(EngineError::from_status("Jackett", status, &body));
        }
        parse_json("Jackett", &body)
    }
}

#[async_trait]
impl SearchProvider for JackettProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn is_configured(&self) -> bool {
        self.settings.url.is_some() && self.settings.api_key.is_some()
    }

    async fn search(&self, query: &str, book_type: BookType) -> Result<Vec<SearchHit>, EngineError> {
        let categories = match book_type {
            BookType::Audiobook => &self.settings.audiobook_categories,
            BookType::Ebook => &self.settings.ebook_categories,
        };
        let mut params = vec![("Query", query.to_string())];
        params.extend(categories.iter().map(|c| ("Category[]", c.to_string())));

        let response = self.query(params).await?;
        Ok(response
            .results
            .into_iter()
            .filter_map(JackettResult::into_hit)
            .collect())
    }

    async fn test(&self) -> Result<(), EngineError> {
        // An empty query returns quickly and still validates the key
        self.query(vec![("Query", String::new())]).await?;
        Ok(())
    }
}
