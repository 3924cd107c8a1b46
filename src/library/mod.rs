//! Library viewer integration (Audiobookshelf).
//!
//! The pipeline only needs to list libraries, read their folders and
//! trigger a scan after a delivery. Output roots always come from the
//! post-processing settings, never from the viewer.

mod audiobookshelf;

pub use audiobookshelf::AudiobookshelfClient;

use crate::config::LibrarySettings;
use crate::error::EngineError;
use crate::store::BookType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryFolder {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    pub media_type: Option<String>,
    pub folders: Vec<LibraryFolder>,
}

#[async_trait]
pub trait LibraryViewer: Send + Sync {
    async fn list_libraries(&self) -> Result<Vec<Library>, EngineError>;

    async fn get_library(&self, id: &str) -> Result<Library, EngineError>;

    /// Ask the viewer to rescan a library. Returns false when the viewer
    /// answered but did not accept the scan.
    async fn scan_library(&self, id: &str) -> Result<bool, EngineError>;

    async fn test(&self) -> Result<(), EngineError>;
}

/// Builds the viewer for the current settings, `None` when unconfigured.
pub type ViewerFactory =
    Arc<dyn Fn(&LibrarySettings) -> Result<Option<Arc<dyn LibraryViewer>>, EngineError> + Send + Sync>;

pub fn build_viewer(settings: &LibrarySettings) -> Result<Option<Arc<dyn LibraryViewer>>, EngineError> {
    match (&settings.url, &settings.api_token) {
        (Some(url), Some(token)) if settings.is_configured() => Ok(Some(Arc::new(
            AudiobookshelfClient::new(url, token, settings.timeout)?,
        ))),
        _ => Ok(None),
    }
}

pub fn default_viewer_factory() -> ViewerFactory {
    Arc::new(build_viewer)
}

/// Library id to scan after delivering a book of `book_type`.
pub fn library_for(settings: &LibrarySettings, book_type: BookType) -> Option<&str> {
    match book_type {
        BookType::Audiobook => settings.audiobook_library_id.as_deref(),
        BookType::Ebook => settings.ebook_library_id.as_deref(),
    }
}
