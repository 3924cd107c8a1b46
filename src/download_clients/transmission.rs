//! Transmission RPC adapter.

use super::{join_remote_path, progress_from_fraction, DownloadClient, TransferState, TransferStatus};
use crate::error::EngineError;
use crate::store::ClientType;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const SERVICE: &str = "Transmission";
const SESSION_HEADER: &str = "X-Transmission-Session-Id";

const TORRENT_FIELDS: &[&str] = &[
    "hashString",
    "name",
    "percentDone",
    "status",
    "error",
    "errorString",
    "totalSize",
    "downloadDir",
];

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TorrentFields {
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    error: i64,
    #[serde(default)]
    error_string: String,
    #[serde(default)]
    total_size: Option<i64>,
    #[serde(default)]
    download_dir: Option<String>,
}

impl TorrentFields {
    fn into_status(self) -> TransferStatus {
        let state = map_state(self.status, self.error, self.percent_done);
        let path = self
            .download_dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|dir| join_remote_path(dir, &self.name));
        let error_message = (state == TransferState::Failed).then(|| {
            if self.error_string.is_empty() {
                "Transmission reports a local error".to_string()
            } else {
                self.error_string.clone()
            }
        });
        TransferStatus {
            id: self.hash_string.to_lowercase(),
            name: Some(self.name),
            progress: progress_from_fraction(self.percent_done),
            state,
            size_bytes: self.total_size,
            path,
            error_message,
        }
    }
}

/// Status codes: 0 stopped, 1/2 check, 3 queued download, 4 downloading,
/// 5 queued seed, 6 seeding. Error 3 is a local (fatal) error.
fn map_state(status: i64, error: i64, percent_done: f64) -> TransferState {
    if error == 3 {
        return TransferState::Failed;
    }
    if percent_done >= 1.0 || status == 5 || status == 6 {
        return TransferState::Completed;
    }
    match status {
        0 => TransferState::Paused,
        1..=3 => TransferState::Queued,
        _ => TransferState::Downloading,
    }
}

pub struct TransmissionClient {
    http: Client,
    rpc_url: String,
    username: Option<String>,
    password: Option<String>,
    session_id: Mutex<Option<String>>,
}

impl TransmissionClient {
    pub fn new(
        base_url: &str,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;
        let base = base_url.trim_end_matches('/');
        let rpc_url = if base.ends_with("/transmission/rpc") {
            base.to_string()
        } else {
            format!("{}/transmission/rpc", base)
        };
        Ok(Self {
            http,
            rpc_url,
            username,
            password,
            session_id: Mutex::new(None),
        })
    }

    /// Call an RPC method, refreshing the CSRF session id once on 409.
    async fn call(&self, method: &str, arguments: Value) -> Result<Value, EngineError> {
        let body = json!({ "method": method, "arguments": arguments });
        for attempt in 0..2 {
            let mut request = self.http.post(&self.rpc_url).json(&body);
            if let Some(session_id) = self.session_id.lock().await.clone() {
                request = request.header(SESSION_HEADER, session_id);
            }
            if let Some(username) = &self.username {
                request = request.basic_auth(username, self.password.as_ref());
            }
            let response = request
                .send()
                .await
                .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;

            match response.status() {
                StatusCode::CONFLICT if attempt == 0 => {
                    let fresh = response
                        .headers()
                        .get(SESSION_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    if fresh.is_none() {
                        return Err(EngineError::Client(
                            "Transmission returned 409 without a session id".to_string(),
                        ));
                    }
                    debug!("Refreshing Transmission session id");
                    *self.session_id.lock().await = fresh;
                    continue;
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(EngineError::Authentication(
                        "Transmission rejected the username or password".to_string(),
                    ));
                }
                status if !status.is_success() => {
                    let text = response.text().await.unwrap_or_default();
                    return Err(EngineError::from_status(SERVICE, status, &text));
                }
                _ => {}
            }

            let parsed: RpcResponse = response
                .json()
                .await
                .map_err(|e| EngineError::from_reqwest(SERVICE, e))?;
            if parsed.result != "success" {
                return Err(EngineError::Client(format!(
                    "Transmission {} failed: {}",
                    method, parsed.result
                )));
            }
            return Ok(parsed.arguments);
        }
        Err(EngineError::Client(
            "Transmission kept rejecting the session id".to_string(),
        ))
    }

    async fn torrents(&self, ids: Option<&str>) -> Result<Vec<TransferStatus>, EngineError> {
        let mut arguments = json!({ "fields": TORRENT_FIELDS });
        if let Some(id) = ids {
            arguments["ids"] = json!([id.to_lowercase()]);
        }
        let result = self.call("torrent-get", arguments).await?;
        let torrents: Vec<TorrentFields> =
            serde_json::from_value(result.get("torrents").cloned().unwrap_or(Value::Array(vec![])))
                .map_err(|e| {
                    EngineError::Client(format!("Unexpected Transmission torrent list: {}", e))
                })?;
        Ok(torrents.into_iter().map(TorrentFields::into_status).collect())
    }
}

#[async_trait]
impl DownloadClient for TransmissionClient {
    fn client_type(&self) -> ClientType {
        ClientType::Transmission
    }

    async fn submit(&self, link: &str) -> Result<Option<String>, EngineError> {
        let result = self
            .call("torrent-add", json!({ "filename": link }))
            .await?;
        let added = result
            .get("torrent-added")
            .or_else(|| result.get("torrent-duplicate"));
        Ok(added
            .and_then(|t| t.get("hashString"))
            .and_then(Value::as_str)
            .map(str::to_lowercase))
    }

    async fn status(&self, transfer_id: &str) -> Result<Option<TransferStatus>, EngineError> {
        Ok(self
            .torrents(Some(transfer_id))
            .await?
            .into_iter()
            .find(|t| super::same_transfer_id(&t.id, transfer_id)))
    }

    async fn list(&self) -> Result<Vec<TransferStatus>, EngineError> {
        self.torrents(None).await
    }

    async fn test_connection(&self) -> Result<(), EngineError> {
        self.call("session-get", json!({ "fields": ["version"] }))
            .await?;
        Ok(())
    }

    async fn remove(&self, transfer_id: &str) -> Result<(), EngineError> {
        self.call(
            "torrent-remove",
            json!({ "ids": [transfer_id.to_lowercase()], "delete-local-data": false }),
        )
        .await?;
        Ok(())
    }
}
