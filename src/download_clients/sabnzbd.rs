//! SABnzbd API adapter.
//!
//! A transfer lives in the queue while downloading and moves to history
//! once post-processing finishes, so lookups consult both.

use super::{DownloadClient, TransferState, TransferStatus};
use crate::error::EngineError;
use crate::store::ClientType;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const SERVICE: &str = "SABnzbd";

#[derive(Debug, Deserialize)]
struct QueueResponse {
    queue: Queue,
}

#[derive(Debug, Deserialize)]
struct Queue {
    #[serde(default)]
    slots: Vec<QueueSlot>,
}

#[derive(Debug, Deserialize)]
struct QueueSlot {
    nzo_id: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    percentage: Value,
    #[serde(default)]
    mb: Value,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: History,
}

#[derive(Debug, Deserialize)]
struct History {
    #[serde(default)]
    slots: Vec<HistorySlot>,
}

#[derive(Debug, Deserialize)]
struct HistorySlot {
    nzo_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    bytes: Option<i64>,
    #[serde(default)]
    storage: Option<String>,
    #[serde(default)]
    fail_message: String,
}

/// SABnzbd reports numbers as strings in some fields and numbers in others.
fn loose_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl QueueSlot {
    fn into_status(self) -> TransferStatus {
        let state = match self.status.as_str() {
            "Paused" => TransferState::Paused,
            "Queued" | "Grabbing" | "Fetching" | "Propagating" | "Checking" => {
                TransferState::Queued
            }
            _ => TransferState::Downloading,
        };
        let progress = loose_f64(&self.percentage)
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(0);
        let size_bytes = loose_f64(&self.mb).map(|mb| (mb * 1024.0 * 1024.0) as i64);
        TransferStatus {
            id: self.nzo_id,
            name: Some(self.filename),
            progress,
            state,
            size_bytes,
            path: None,
            error_message: None,
        }
    }
}

impl HistorySlot {
    fn into_status(self) -> TransferStatus {
        let state = match self.status.as_str() {
            "Completed" => TransferState::Completed,
            "Failed" => TransferState::Failed,
            // Verifying, Repairing, Extracting, Moving, Running
            _ => TransferState::Downloading,
        };
        let progress = if state == TransferState::Downloading {
            99
        } else {
            100
        };
        let error_message = (state == TransferState::Failed).then(|| {
            if self.fail_message.is_empty() {
                "SABnzbd reports the download failed".to_string()
            } else {
                self.fail_message.clone()
            }
        });
        TransferStatus {
            id: self.nzo_id,
            name: Some(self.name),
            progress,
            state,
            size_bytes: self.bytes,
            path: self.storage.filter(|s| !s.is_empty()),
            error_message,
        }
    }
}

pub struct SabnzbdClient {
    http: Client,
    api_url: String,
    api_key: String,
    category: Option<String>,
}

impl SabnzbdClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        category: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            http,
            api_url: format!("{}/api", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            category,
        })
    }

    async fn api(&self, mode: &str, params: &[(&str, String)]) -> Result<Value, EngineError> {
        let mut query: Vec<(&str, String)> = vec![
            ("mode", mode.to_string()),
            ("apikey", self.api_key.clone()),
            ("output", "json".to_string()),
        ];
        query.extend(params.iter().cloned());

        let response = self
            .http
            .get(&self.api_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::from_status(SERVICE, status, &body));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;

        if body.get("status").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            if message.to_lowercase().contains("api key") {
                return Err(EngineError::Authentication(format!("SABnzbd: {}", message)));
            }
            return Err(EngineError::Client(format!("SABnzbd: {}", message)));
        }
        Ok(body)
    }

    async fn queue(&self, nzo_id: Option<&str>) -> Result<Vec<TransferStatus>, EngineError> {
        let mut params = Vec::new();
        if let Some(id) = nzo_id {
            params.push(("nzo_ids", id.to_string()));
        } else if let Some(category) = &self.category {
            params.push(("category", category.clone()));
        }
        let body = self.api("queue", &params).await?;
        let parsed: QueueResponse = serde_json::from_value(body)
            .map_err(|e| EngineError::Client(format!("Unexpected SABnzbd queue: {}", e)))?;
        Ok(parsed.queue.slots.into_iter().map(QueueSlot::into_status).collect())
    }

    async fn history(&self, nzo_id: Option<&str>) -> Result<Vec<TransferStatus>, EngineError> {
        let mut params = Vec::new();
        if let Some(id) = nzo_id {
            params.push(("nzo_ids", id.to_string()));
        } else if let Some(category) = &self.category {
            params.push(("category", category.clone()));
        }
        let body = self.api("history", &params).await?;
        let parsed: HistoryResponse = serde_json::from_value(body)
            .map_err(|e| EngineError::Client(format!("Unexpected SABnzbd history: {}", e)))?;
        Ok(parsed
            .history
            .slots
            .into_iter()
            .map(HistorySlot::into_status)
            .collect())
    }
}

#[async_trait]
impl DownloadClient for SabnzbdClient {
    fn client_type(&self) -> ClientType {
        ClientType::Sabnzbd
    }

    async fn submit(&self, link: &str) -> Result<Option<String>, EngineError> {
        let mut params = vec![("name", link.to_string())];
        if let Some(category) = &self.category {
            params.push(("cat", category.clone()));
        }
        let body = self.api("addurl", &params).await?;
        Ok(body
            .get("nzo_ids")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn status(&self, transfer_id: &str) -> Result<Option<TransferStatus>, EngineError> {
        if let Some(found) = self
            .queue(Some(transfer_id))
            .await?
            .into_iter()
            .find(|t| t.id == transfer_id)
        {
            return Ok(Some(found));
        }
        Ok(self
            .history(Some(transfer_id))
            .await?
            .into_iter()
            .find(|t| t.id == transfer_id))
    }

    async fn list(&self) -> Result<Vec<TransferStatus>, EngineError> {
        let mut all = self.queue(None).await?;
        all.extend(self.history(None).await?);
        Ok(all)
    }

    async fn test_connection(&self) -> Result<(), EngineError> {
        self.api("queue", &[("limit", "0".to_string())]).await?;
        Ok(())
    }

    async fn remove(&self, transfer_id: &str) -> Result<(), EngineError> {
        self.api(
            "queue",
            &[("name", "delete".to_string()), ("value", transfer_id.to_string())],
        )
        .await?;
        self.api(
            "history",
            &[
                ("name", "delete".to_string()),
                ("value", transfer_id.to_string()),
                ("del_files", "0".to_string()),
            ],
        )
        .await?;
        Ok(())
    }
}
