//! Data models for the acquisition database.
//!
//! Requests, candidates, downloads, books, configured download clients
//! and health rows, plus the string codecs used to persist their enums.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Searching,
    NotFound,
    Downloading,
    Processing,
    Completed, // terminal
    Failed,    // terminal
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 7] = [
        RequestStatus::Pending,
        RequestStatus::Searching,
        RequestStatus::NotFound,
        RequestStatus::Downloading,
        RequestStatus::Processing,
        RequestStatus::Completed,
        RequestStatus::Failed,
    ];

    /// Statuses from which a user may cancel. Processing is excluded
    /// because files are being copied.
    pub const CANCELLABLE: [RequestStatus; 4] = [
        RequestStatus::Pending,
        RequestStatus::Searching,
        RequestStatus::NotFound,
        RequestStatus::Downloading,
    ];

    pub const NON_TERMINAL: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::Searching,
        RequestStatus::NotFound,
        RequestStatus::Downloading,
        RequestStatus::Processing,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    pub fn is_cancellable(&self) -> bool {
        Self::CANCELLABLE.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Searching => "searching",
            RequestStatus::NotFound => "not_found",
            RequestStatus::Downloading => "downloading",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audiobook or ebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookType {
    Audiobook,
    Ebook,
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookType::Audiobook => "audiobook",
            BookType::Ebook => "ebook",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "audiobook" => Some(BookType::Audiobook),
            "ebook" => Some(BookType::Ebook),
            _ => None,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            BookType::Audiobook => BookType::Ebook,
            BookType::Ebook => BookType::Audiobook,
        }
    }
}

impl std::fmt::Display for BookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer family handled by a download client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadType {
    Torrent,
    Usenet,
}

impl DownloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadType::Torrent => "torrent",
            DownloadType::Usenet => "usenet",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "torrent" => Some(DownloadType::Torrent),
            "usenet" => Some(DownloadType::Usenet),
            _ => None,
        }
    }
}

impl std::fmt::Display for DownloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported download client backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Qbittorrent,
    Transmission,
    Sabnzbd,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Qbittorrent => "qbittorrent",
            ClientType::Transmission => "transmission",
            ClientType::Sabnzbd => "sabnzbd",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "qbittorrent" => Some(ClientType::Qbittorrent),
            "transmission" => Some(ClientType::Transmission),
            "sabnzbd" => Some(ClientType::Sabnzbd),
            _ => None,
        }
    }

    pub fn download_type(&self) -> DownloadType {
        match self {
            ClientType::Qbittorrent | ClientType::Transmission => DownloadType::Torrent,
            ClientType::Sabnzbd => DownloadType::Usenet,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ClientType::Qbittorrent => "qBittorrent",
            ClientType::Transmission => "Transmission",
            ClientType::Sabnzbd => "SABnzbd",
        }
    }
}

/// Candidate selection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Selected,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Selected => "selected",
            CandidateStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CandidateStatus::Pending),
            "selected" => Some(CandidateStatus::Selected),
            "rejected" => Some(CandidateStatus::Rejected),
            _ => None,
        }
    }
}

/// Status of one submission to a download client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed, // terminal
    Failed,    // terminal
}

impl DownloadStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, DownloadStatus::Queued | DownloadStatus::Downloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DownloadStatus::Queued),
            "downloading" => Some(DownloadStatus::Downloading),
            "completed" => Some(DownloadStatus::Completed),
            "failed" => Some(DownloadStatus::Failed),
            _ => None,
        }
    }
}

/// Tri-state health of one monitored dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(HealthStatus::Healthy),
            "degraded" => Some(HealthStatus::Degraded),
            "down" => Some(HealthStatus::Down),
            _ => None,
        }
    }
}

/// Deduplication anchor for requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub book_type: BookType,
    pub work_source: Option<String>,
    pub work_id: Option<String>,
    pub edition_id: Option<String>,
    pub year: Option<i32>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub file_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Book {
    pub fn is_acquired(&self) -> bool {
        self.file_path.is_some()
    }
}

/// One user's ask for one book in one format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub book_id: String,
    pub requester_id: String,
    pub status: RequestStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<i64>,
    pub attention_needed: bool,
    pub issue_description: Option<String>,
    pub language: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Request {
    pub fn new(book_id: &str, requester_id: &str, language: Option<String>, now: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            requester_id: requester_id.to_string(),
            status: RequestStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            attention_needed: false,
            issue_description: None,
            language,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// A normalized hit from one provider for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub request_id: String,
    pub guid: String,
    pub title: String,
    pub indexer: Option<String>,
    pub source: String,
    pub size_bytes: Option<i64>,
    pub seeders: Option<i64>,
    pub leechers: Option<i64>,
    pub download_url: Option<String>,
    pub magnet_url: Option<String>,
    pub info_url: Option<String>,
    pub published_at: Option<i64>,
    pub download_type: DownloadType,
    pub status: CandidateStatus,
    pub score: f64,
    pub created_at: i64,
}

impl SearchResult {
    /// Preferred link for submission: magnet first, then the descriptor URL.
    pub fn link(&self) -> Option<&str> {
        self.magnet_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.download_url.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

/// One submission of a selected candidate to a download client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub id: String,
    pub request_id: String,
    pub search_result_id: Option<String>,
    pub name: String,
    pub size_bytes: Option<i64>,
    pub status: DownloadStatus,
    pub progress: u8,
    pub external_id: Option<String>,
    pub download_type: DownloadType,
    pub download_path: Option<String>,
    pub client_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Download {
    pub fn queued_for(candidate: &SearchResult, now: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: candidate.request_id.clone(),
            search_result_id: Some(candidate.id.clone()),
            name: candidate.title.clone(),
            size_bytes: candidate.size_bytes,
            status: DownloadStatus::Queued,
            progress: 0,
            external_id: None,
            download_type: candidate.download_type,
            download_path: None,
            client_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Configured download client as mirrored into the database.
///
/// Credentials stay in configuration and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadClientRecord {
    pub id: String,
    pub name: String,
    pub client_type: ClientType,
    pub download_type: DownloadType,
    pub url: String,
    pub category: Option<String>,
    pub priority: i32,
    pub enabled: bool,
    pub remote_path: Option<String>,
    pub local_path: Option<String>,
    pub updated_at: i64,
}

/// Health row for one monitored dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub service: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub last_check_at: i64,
    pub last_success_at: Option<i64>,
}

/// Result of a cancellation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { book_deleted: bool },
    NotFound,
    NotCancellable(RequestStatus),
}

/// Counts returned by startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub searches_reset: usize,
    pub processing_escalated: usize,
    pub submissions_abandoned: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_status_codec() {
        for status in RequestStatus::ALL {
            assert_eq!(RequestStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::from_str("bogus"), None);
    }

    #[test]
    fn processing_is_not_cancellable() {
        assert!(!RequestStatus::Processing.is_cancellable());
        assert!(!RequestStatus::Completed.is_cancellable());
        assert!(RequestStatus::Downloading.is_cancellable());
        assert!(RequestStatus::NotFound.is_cancellable());
    }

    #[test]
    fn client_type_derives_transfer_family() {
        assert_eq!(ClientType::Qbittorrent.download_type(), DownloadType::Torrent);
        assert_eq!(ClientType::Transmission.download_type(), DownloadType::Torrent);
        assert_eq!(ClientType::Sabnzbd.download_type(), DownloadType::Usenet);
    }

    #[test]
    fn candidate_link_prefers_magnet() {
        let mut result = SearchResult {
            id: "r".into(),
            request_id: "q".into(),
            guid: "g".into(),
            title: "t".into(),
            indexer: None,
            source: "prowlarr".into(),
            size_bytes: None,
            seeders: None,
            leechers: None,
            download_url: Some("http://x/file.torrent".into()),
            magnet_url: Some("magnet:?xt=urn:btih:abc".into()),
            info_url: None,
            published_at: None,
            download_type: DownloadType::Torrent,
            status: CandidateStatus::Pending,
            score: 0.0,
            created_at: 0,
        };
        assert_eq!(result.link(), Some("magnet:?xt=urn:btih:abc"));

        result.magnet_url = Some("  ".into());
        assert_eq!(result.link(), Some("http://x/file.torrent"));

        result.download_url = None;
        assert_eq!(result.link(), None);
    }
}
