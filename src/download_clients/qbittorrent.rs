//! qBittorrent WebUI API v2 adapter.
//!
//! Authenticates with a session cookie that is cached per instance. A 403
//! on any call drops the cookie and logs in again once before giving up.

use super::{join_remote_path, progress_from_fraction, DownloadClient, TransferState, TransferStatus};
use crate::error::EngineError;
use crate::store::ClientType;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SERVICE: &str = "qBittorrent";

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    total_size: Option<i64>,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    save_path: Option<String>,
    #[serde(default)]
    content_path: Option<String>,
}

impl TorrentInfo {
    fn into_status(self) -> TransferStatus {
        let state = map_state(&self.state, self.progress);
        let path = self
            .content_path
            .filter(|p| !p.is_empty())
            .or_else(|| {
                self.save_path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(|dir| join_remote_path(dir, &self.name))
            });
        let error_message = (state == TransferState::Failed)
            .then(|| format!("qBittorrent reports state '{}'", self.state));
        TransferStatus {
            id: self.hash.to_lowercase(),
            name: Some(self.name),
            progress: progress_from_fraction(self.progress),
            state,
            size_bytes: self.total_size.or(self.size),
            path,
            error_message,
        }
    }
}

fn map_state(state: &str, progress: f64) -> TransferState {
    match state {
        "error" | "missingFiles" => TransferState::Failed,
        "uploading" | "stalledUP" | "pausedUP" | "stoppedUP" | "queuedUP" | "forcedUP"
        | "checkingUP" => TransferState::Completed,
        "pausedDL" | "stoppedDL" => TransferState::Paused,
        "queuedDL" | "checkingDL" | "checkingResumeData" | "allocating" | "metaDL"
        | "forcedMetaDL" => TransferState::Queued,
        _ if progress >= 1.0 => TransferState::Completed,
        _ => TransferState::Downloading,
    }
}

/// Client for one qBittorrent instance.
pub struct QbittorrentClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    category: Option<String>,
    session_cookie: Mutex<Option<String>>,
}

impl QbittorrentClient {
    pub fn new(
        base_url: &str,
        username: Option<String>,
        password: Option<String>,
        category: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
            category,
            session_cookie: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    async fn login(&self) -> Result<String, EngineError> {
        let response = self
            .http
            .post(self.url("auth/login"))
            .header(reqwest::header::REFERER, &self.base_url)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(EngineError::Authentication(
                "qBittorrent refused the login (too many failed attempts, IP banned)".to_string(),
            ));
        }

        let cookie = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| {
                v.split(';')
                    .next()
                    .filter(|pair| pair.trim_start().starts_with("SID="))
                    .map(|pair| pair.trim().to_string())
            });
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(EngineError::from_status(SERVICE, status, &body));
        }
        if body.trim() != "Ok." {
            return Err(EngineError::Authentication(
                "qBittorrent rejected the username or password".to_string(),
            ));
        }

        match cookie {
            Some(cookie) => {
                info!("Logged in to qBittorrent at {}", self.base_url);
                Ok(cookie)
            }
            // Auth bypassed for local/whitelisted clients
            None => Ok(String::new()),
        }
    }

    async fn session(&self) -> Result<String, EngineError> {
        let mut guard = self.session_cookie.lock().await;
        if let Some(cookie) = guard.as_ref() {
            return Ok(cookie.clone());
        }
        let cookie = self.login().await?;
        *guard = Some(cookie.clone());
        Ok(cookie)
    }

    async fn invalidate_session(&self) {
        *self.session_cookie.lock().await = None;
    }

    /// Send an authenticated request, re-authenticating once on 403.
    async fn send<F>(&self, build: F) -> Result<Response, EngineError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        for attempt in 0..2 {
            let cookie = self.session().await?;
            let mut request = build(&self.http);
            if !cookie.is_empty() {
                request = request.header(reqwest::header::COOKIE, cookie);
            }
            let response = request
                .send()
                .await
                .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;

            if response.status() == StatusCode::FORBIDDEN && attempt == 0 {
                debug!("qBittorrent session expired, logging in again");
                self.invalidate_session().await;
                continue;
            }
            if response.status() == StatusCode::FORBIDDEN {
                self.invalidate_session().await;
                return Err(EngineError::Authentication(
                    "qBittorrent rejected the session after re-login".to_string(),
                ));
            }
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(EngineError::from_status(SERVICE, status, &body));
            }
            return Ok(response);
        }
        Err(EngineError::Authentication(
            "qBittorrent authentication failed".to_string(),
        ))
    }

    async fn torrents(&self, hashes: Option<&str>) -> Result<Vec<TorrentInfo>, EngineError> {
        let url = self.url("torrents/info");
        let category = self.category.clone();
        let hashes = hashes.map(|h| h.to_lowercase());
        let response = self
            .send(|http| {
                let mut query: Vec<(&str, String)> = Vec::new();
                if let Some(hashes) = &hashes {
                    query.push(("hashes", hashes.clone()));
                } else if let Some(category) = &category {
                    query.push(("category", category.clone()));
                }
                http.get(&url).query(&query)
            })
            .await?;
        response
            .json()
            .await
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))
    }
}

#[async_trait]
impl DownloadClient for QbittorrentClient {
    fn client_type(&self) -> ClientType {
        ClientType::Qbittorrent
    }

    async fn submit(&self, link: &str) -> Result<Option<String>, EngineError> {
        let url = self.url("torrents/add");
        let mut form = vec![("urls", link.to_string())];
        if let Some(category) = &self.category {
            form.push(("category", category.clone()));
        }
        let response = self.send(|http| http.post(&url).form(&form)).await?;
        let body = response.text().await.unwrap_or_default();
        if body.trim() == "Fails." {
            return Err(EngineError::Client(
                "qBittorrent rejected the torrent (invalid link or duplicate)".to_string(),
            ));
        }
        // qBittorrent never returns the new hash
        Ok(None)
    }

    async fn status(&self, transfer_id: &str) -> Result<Option<TransferStatus>, EngineError> {
        let torrents = self.torrents(Some(transfer_id)).await?;
        Ok(torrents
            .into_iter()
            .map(TorrentInfo::into_status)
            .find(|t| super::same_transfer_id(&t.id, transfer_id)))
    }

    async fn list(&self) -> Result<Vec<TransferStatus>, EngineError> {
        Ok(self
            .torrents(None)
            .await?
            .into_iter()
            .map(TorrentInfo::into_status)
            .collect())
    }

    async fn test_connection(&self) -> Result<(), EngineError> {
        let url = self.url("app/version");
        self.send(|http| http.get(&url)).await?;
        Ok(())
    }

    async fn remove(&self, transfer_id: &str) -> Result<(), EngineError> {
        let url = self.url("torrents/delete");
        let form = [
            ("hashes", transfer_id.to_lowercase()),
            ("deleteFiles", "false".to_string()),
        ];
        self.send(|http| http.post(&url).form(&form)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state("downloading", 0.3), TransferState::Downloading);
        assert_eq!(map_state("stalledUP", 1.0), TransferState::Completed);
        assert_eq!(map_state("pausedDL", 0.5), TransferState::Paused);
        assert_eq!(map_state("metaDL", 0.0), TransferState::Queued);
        assert_eq!(map_state("missingFiles", 0.2), TransferState::Failed);
        assert_eq!(map_state("someNewState", 1.0), TransferState::Completed);
    }

    #[test]
    fn test_content_path_preferred() {
        let info = TorrentInfo {
            hash: "ABCDEF".into(),
            name: "Dune".into(),
            progress: 0.5,
            state: "downloading".into(),
            total_size: Some(10),
            size: None,
            save_path: Some("/downloads".into()),
            content_path: Some("/downloads/Dune".into()),
        };
        let status = info.into_status();
        assert_eq!(status.id, "abcdef");
        assert_eq!(status.path.as_deref(), Some("/downloads/Dune"));
        assert_eq!(status.progress, 50);

        let info = TorrentInfo {
            hash: "abc".into(),
            name: "Dune".into(),
            progress: 1.0,
            state: "uploading".into(),
            total_size: None,
            size: Some(7),
            save_path: Some("/downloads/".into()),
            content_path: None,
        };
        let status = info.into_status();
        assert_eq!(status.path.as_deref(), Some("/downloads/Dune"));
        assert_eq!(status.size_bytes, Some(7));
    }
}
