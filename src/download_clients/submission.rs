//! Race-safe submission of a link to a download client.
//!
//! A client's "accepted" answer does not prove a transfer was created, and
//! most torrent clients never return the new transfer's id. The id is
//! therefore derived before submitting whenever possible:
//!
//! 1. magnet links carry the info hash in `xt=urn:btih:`;
//! 2. `.torrent` URLs are fetched out-of-band and hashed;
//! 3. as a last resort, the client's transfer list is snapshotted, the
//!    link submitted, and the list polled for a new entry. This runs under
//!    a per-client lock so two submissions to one client cannot mistake
//!    each other's transfer.
//!
//! Every path ends by checking that the client actually knows the transfer.

use super::{info_hash_from_torrent, ClientRegistry, DownloadClient, TransferStatus};
use crate::config::SubmissionSettings;
use crate::error::EngineError;
use crate::store::DownloadType;
use data_encoding::BASE32;
use reqwest::{redirect, Client, Url};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_REDIRECTS: usize = 5;
const MAX_DESCRIPTOR_BYTES: usize = 10 * 1024 * 1024;

/// How the transfer id of a submission was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationMethod {
    Magnet,
    Descriptor,
    Synchronous,
    SnapshotDiff,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOutcome {
    pub external_id: String,
    pub method: IdentificationMethod,
    pub transfer: Option<TransferStatus>,
}

/// Info hash embedded in a magnet URI, as lowercase hex.
pub fn magnet_info_hash(link: &str) -> Option<String> {
    if !link.get(..7)?.eq_ignore_ascii_case("magnet:") {
        return None;
    }
    let url = Url::parse(link).ok()?;
    url.query_pairs()
        .filter(|(key, _)| key == "xt")
        .find_map(|(_, value)| {
            let value = value.trim();
            let hash = value
                .get(..9)
                .filter(|prefix| prefix.eq_ignore_ascii_case("urn:btih:"))
                .map(|_| &value[9..])?;
            normalize_btih(hash)
        })
}

fn normalize_btih(hash: &str) -> Option<String> {
    if hash.len() == 40 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(hash.to_lowercase());
    }
    if hash.len() == 32 {
        let bytes = BASE32.decode(hash.to_uppercase().as_bytes()).ok()?;
        if bytes.len() == 20 {
            return Some(hex::encode(bytes));
        }
    }
    None
}

enum Descriptor {
    InfoHash(String),
    RedirectsToMagnet(String),
}

pub struct Submitter {
    http: Client,
    registry: Arc<ClientRegistry>,
}

impl Submitter {
    pub fn new(registry: Arc<ClientRegistry>, timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| EngineError::from_reqwest("descriptor fetch", e))?;
        Ok(Self { http, registry })
    }

    /// Submit `link` to `client` and return the verified transfer id.
    pub async fn submit(
        &self,
        client_id: &str,
        client: &dyn DownloadClient,
        link: &str,
        settings: &SubmissionSettings,
    ) -> Result<SubmissionOutcome, EngineError> {
        let (external_id, method) = self.identify_and_submit(client_id, client, link, settings).await?;
        let transfer = verify(client, &external_id, settings).await?;
        info!(
            "Submitted to {} as {} (identified via {:?})",
            client_id, external_id, method
        );
        Ok(SubmissionOutcome {
            external_id,
            method,
            transfer: Some(transfer),
        })
    }

    async fn identify_and_submit(
        &self,
        client_id: &str,
        client: &dyn DownloadClient,
        link: &str,
        settings: &SubmissionSettings,
    ) -> Result<(String, IdentificationMethod), EngineError> {
        if let Some(hash) = magnet_info_hash(link) {
            client.submit(link).await?;
            return Ok((hash, IdentificationMethod::Magnet));
        }

        if client.download_type() == DownloadType::Torrent && is_http(link) {
            match self.fetch_descriptor(link).await {
                Some(Descriptor::InfoHash(hash)) => {
                    client.submit(link).await?;
                    return Ok((hash, IdentificationMethod::Descriptor));
                }
                Some(Descriptor::RedirectsToMagnet(magnet)) => {
                    if let Some(hash) = magnet_info_hash(&magnet) {
                        client.submit(&magnet).await?;
                        return Ok((hash, IdentificationMethod::Magnet));
                    }
                }
                None => {}
            }
        }

        self.submit_with_snapshot(client_id, client, link, settings).await
    }

    async fn submit_with_snapshot(
        &self,
        client_id: &str,
        client: &dyn DownloadClient,
        link: &str,
        settings: &SubmissionSettings,
    ) -> Result<(String, IdentificationMethod), EngineError> {
        let lock = self.registry.submission_lock(client_id);
        let _guard = lock.lock().await;

        let before: HashSet<String> = client
            .list()
            .await?
            .into_iter()
            .map(|t| t.id.to_lowercase())
            .collect();

        if let Some(id) = client.submit(link).await? {
            return Ok((id, IdentificationMethod::Synchronous));
        }

        for attempt in 1..=settings.poll_attempts {
            tokio::time::sleep(settings.poll_interval).await;
            let current = match client.list().await {
                Ok(current) => current,
                Err(err) if err.is_retryable() => {
                    debug!("Poll {} of {} failed: {}", attempt, client_id, err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(new) = current
                .into_iter()
                .find(|t| !before.contains(&t.id.to_lowercase()))
            {
                debug!("New transfer {} appeared after {} polls", new.id, attempt);
                return Ok((new.id, IdentificationMethod::SnapshotDiff));
            }
        }

        Err(EngineError::Client(format!(
            "No new transfer appeared in {} after {} polls; the client may have rejected the link",
            client_id, settings.poll_attempts
        )))
    }

    async fn fetch_descriptor(&self, link: &str) -> Option<Descriptor> {
        let mut url = Url::parse(link).ok()?;
        for _ in 0..=MAX_REDIRECTS {
            let response = match self.http.get(url.clone()).send().await {
                Ok(response) => response,
                Err(err) => {
                    debug!("Descriptor fetch from {} failed: {}", url, err);
                    return None;
                }
            };

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)?
                    .to_str()
                    .ok()?
                    .to_string();
                if location
                    .get(..7)
                    .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
                {
                    return Some(Descriptor::RedirectsToMagnet(location));
                }
                url = url.join(&location).ok()?;
                continue;
            }

            if !response.status().is_success() {
                debug!("Descriptor fetch from {} returned {}", url, response.status());
                return None;
            }
            if response
                .content_length()
                .is_some_and(|len| len as usize > MAX_DESCRIPTOR_BYTES)
            {
                return None;
            }
            let bytes = read_capped(response, MAX_DESCRIPTOR_BYTES).await?;
            return match info_hash_from_torrent(&bytes) {
                Some(hash) => Some(Descriptor::InfoHash(hash)),
                None => {
                    debug!("Response from {} is not a torrent file", url);
                    None
                }
            };
        }
        warn!("Too many redirects fetching {}", link);
        None
    }
}

/// Read a response body, giving up once it exceeds `limit`. Chunked
/// responses carry no length up front.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.ok()? {
        if body.len() + chunk.len() > limit {
            debug!("Descriptor from {} exceeds {} bytes", response.url(), limit);
            return None;
        }
        body.extend_from_slice(&chunk);
    }
    Some(body)
}

fn is_http(link: &str) -> bool {
    let lower = link.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Confirm the client knows the transfer, retrying a few times.
async fn verify(
    client: &dyn DownloadClient,
    external_id: &str,
    settings: &SubmissionSettings,
) -> Result<TransferStatus, EngineError> {
    let attempts = settings.verify_attempts.max(1);
    for attempt in 1..=attempts {
        match client.status(external_id).await {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => debug!("Transfer {} not visible yet ({}/{})", external_id, attempt, attempts),
            Err(err) if err.is_retryable() => {
                debug!("Verification of {} failed: {}", external_id, err)
            }
            Err(err) => return Err(err),
        }
        if attempt < attempts {
            tokio::time::sleep(settings.verify_delay).await;
        }
    }
    Err(EngineError::Client(format!(
        "Client accepted the submission but transfer {} never appeared (duplicate, bad save path or invalid link)",
        external_id
    )))
}
