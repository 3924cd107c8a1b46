//! Builds, caches and selects download client adapters.

use super::{DownloadClient, QbittorrentClient, SabnzbdClient, TransmissionClient};
use crate::config::{DownloadClientSettings, Settings, SubmissionSettings};
use crate::error::EngineError;
use crate::store::{ClientType, DownloadType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Constructs an adapter for one configured client.
pub type ClientFactory = Arc<
    dyn Fn(&DownloadClientSettings, &SubmissionSettings) -> Result<Arc<dyn DownloadClient>, EngineError>
        + Send
        + Sync,
>;

/// Default factory: picks the adapter implementation by client type.
pub fn build_adapter(
    settings: &DownloadClientSettings,
    submission: &SubmissionSettings,
) -> Result<Arc<dyn DownloadClient>, EngineError> {
    let timeout = submission.request_timeout;
    let adapter: Arc<dyn DownloadClient> = match settings.client_type {
        ClientType::Qbittorrent => Arc::new(QbittorrentClient::new(
            &settings.url,
            settings.username.clone(),
            settings.password.clone(),
            settings.category.clone(),
            timeout,
        )?),
        ClientType::Transmission => Arc::new(TransmissionClient::new(
            &settings.url,
            settings.username.clone(),
            settings.password.clone(),
            timeout,
        )?),
        ClientType::Sabnzbd => {
            let api_key = settings.api_key.as_deref().ok_or_else(|| {
                EngineError::NotConfigured(format!("SABnzbd client '{}' has no API key", settings.name))
            })?;
            Arc::new(SabnzbdClient::new(
                &settings.url,
                api_key,
                settings.category.clone(),
                timeout,
            )?)
        }
    };
    Ok(adapter)
}

struct CachedAdapter {
    settings: DownloadClientSettings,
    adapter: Arc<dyn DownloadClient>,
}

/// One adapter instance per configured client id, rebuilt when that
/// client's settings change so session state survives between sweeps.
pub struct ClientRegistry {
    factory: ClientFactory,
    adapters: Mutex<HashMap<String, CachedAdapter>>,
    submission_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(build_adapter))
    }

    pub fn with_factory(factory: ClientFactory) -> Self {
        Self {
            factory,
            adapters: Mutex::new(HashMap::new()),
            submission_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Adapter for a configured client, building it on first use.
    pub fn adapter(
        &self,
        client: &DownloadClientSettings,
        submission: &SubmissionSettings,
    ) -> Result<Arc<dyn DownloadClient>, EngineError> {
        let mut adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = adapters.get(&client.id) {
            if cached.settings == *client {
                return Ok(cached.adapter.clone());
            }
            debug!("Settings changed for download client {}, rebuilding", client.id);
        }
        let adapter = (self.factory)(client, submission)?;
        adapters.insert(
            client.id.clone(),
            CachedAdapter {
                settings: client.clone(),
                adapter: adapter.clone(),
            },
        );
        Ok(adapter)
    }

    /// Adapter for a client id from the current settings.
    pub fn adapter_by_id(
        &self,
        settings: &Settings,
        client_id: &str,
    ) -> Result<Arc<dyn DownloadClient>, EngineError> {
        let client = settings.download_client(client_id).ok_or_else(|| {
            EngineError::NotConfigured(format!("Download client '{}' is no longer configured", client_id))
        })?;
        self.adapter(client, &settings.submission)
    }

    /// Drop cached adapters for clients that are gone from the settings.
    pub fn retain_configured(&self, settings: &Settings) {
        let mut adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
        adapters.retain(|id, _| settings.download_client(id).is_some());
    }

    /// Enabled clients for a transfer type, lowest priority value first.
    pub fn candidates<'a>(
        &self,
        settings: &'a Settings,
        download_type: DownloadType,
    ) -> Vec<&'a DownloadClientSettings> {
        let mut clients: Vec<&DownloadClientSettings> = settings
            .download_clients
            .iter()
            .filter(|c| c.enabled && c.download_type() == download_type)
            .collect();
        clients.sort_by_key(|c| c.priority);
        clients
    }

    /// First enabled client of the right type that answers a probe.
    pub async fn select(
        &self,
        settings: &Settings,
        download_type: DownloadType,
    ) -> Result<(DownloadClientSettings, Arc<dyn DownloadClient>), EngineError> {
        let candidates = self.candidates(settings, download_type);
        if candidates.is_empty() {
            return Err(EngineError::NotConfigured(format!(
                "No enabled {} download client is configured",
                download_type
            )));
        }

        for client in candidates {
            let adapter = match self.adapter(client, &settings.submission) {
                Ok(adapter) => adapter,
                Err(err) => {
                    warn!("Cannot build download client {}: {}", client.name, err);
                    continue;
                }
            };
            if adapter.test().await {
                debug!("Selected download client {} for {}", client.name, download_type);
                return Ok((client.clone(), adapter));
            }
            warn!("Download client {} did not respond, trying next", client.name);
        }

        Err(EngineError::Client(format!(
            "No download client available for {} (all configured clients failed the connection test)",
            download_type
        )))
    }

    /// Serializes snapshot-diff submissions to one client.
    pub fn submission_lock(&self, client_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .submission_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
