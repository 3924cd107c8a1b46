//! Download client adapters.
//!
//! One [`DownloadClient`] implementation per backend, built and cached by
//! [`ClientRegistry`] keyed on client type, plus race-safe identification
//! of just-submitted transfers in [`submission`].

mod bencode;
mod qbittorrent;
mod registry;
mod sabnzbd;
pub mod submission;
mod transmission;

pub use bencode::info_hash_from_torrent;
pub use qbittorrent::QbittorrentClient;
pub use registry::{build_adapter, ClientFactory, ClientRegistry};
pub use sabnzbd::SabnzbdClient;
pub use submission::{magnet_info_hash, IdentificationMethod, SubmissionOutcome, Submitter};
pub use transmission::TransmissionClient;

use crate::error::EngineError;
use crate::store::{ClientType, DownloadType};
use async_trait::async_trait;

/// Transfer state as reported by a client, normalized across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
}

/// Snapshot of one transfer inside a download client.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStatus {
    pub id: String,
    pub name: Option<String>,
    /// 0-100
    pub progress: u8,
    pub state: TransferState,
    pub size_bytes: Option<i64>,
    /// Client-side location of the payload, before any path remap.
    pub path: Option<String>,
    pub error_message: Option<String>,
}

/// Uniform interface over torrent and usenet client APIs.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    fn client_type(&self) -> ClientType;

    fn download_type(&self) -> DownloadType {
        self.client_type().download_type()
    }

    /// Hand a link to the client. Returns the transfer id when the client
    /// reports it synchronously.
    async fn submit(&self, link: &str) -> Result<Option<String>, EngineError>;

    /// Look up one transfer; `None` if the client no longer knows it.
    async fn status(&self, transfer_id: &str) -> Result<Option<TransferStatus>, EngineError>;

    /// Every transfer visible to this orchestrator (category-scoped where
    /// the backend supports it).
    async fn list(&self) -> Result<Vec<TransferStatus>, EngineError>;

    /// Probe connectivity and credentials.
    async fn test_connection(&self) -> Result<(), EngineError>;

    async fn test(&self) -> bool {
        self.test_connection().await.is_ok()
    }

    /// Remove a transfer, keeping its files.
    async fn remove(&self, transfer_id: &str) -> Result<(), EngineError>;
}

/// Torrent hashes are compared case-insensitively; usenet ids verbatim.
pub(crate) fn same_transfer_id(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Join a client's directory and a transfer name the way the client's OS
/// would, without touching the local filesystem.
pub(crate) fn join_remote_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches(['/', '\\']);
    if dir.is_empty() {
        return name.to_string();
    }
    let separator = if dir.contains('\\') && !dir.contains('/') {
        '\\'
    } else {
        '/'
    };
    format!("{}{}{}", dir, separator, name)
}

pub(crate) fn progress_from_fraction(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).floor() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("/downloads/", "Book"), "/downloads/Book");
        assert_eq!(join_remote_path("C:\\dl", "Book"), "C:\\dl\\Book");
        assert_eq!(join_remote_path("", "Book"), "Book");
    }

    #[test]
    fn test_progress_from_fraction() {
        assert_eq!(progress_from_fraction(0.0), 0);
        assert_eq!(progress_from_fraction(0.999), 99);
        assert_eq!(progress_from_fraction(1.0), 100);
        assert_eq!(progress_from_fraction(1.7), 100);
        assert_eq!(progress_from_fraction(f64::NAN), 0);
    }
}
