//! Delivery of finished downloads into the library.
//!
//! A completed download is located on the local filesystem (after path
//! remapping), copied under the output root for its book type using the
//! configured templates, and recorded on the book. Archive staging and the
//! library scan that follow are best effort.

mod archive;
mod copy;
mod paths;
mod template;

pub use archive::stage_archive;
pub use copy::{
    buffered_copy, copy_file, copy_single_file, copy_tree, unique_path, CopyError, CopyReport,
};
pub use paths::{describe_remap, normalize_separators, remap_source};
pub use template::{
    render_filename, render_path, sanitize_component, validate_template, TemplateValues,
    PLACEHOLDERS,
};

use crate::config::{PostProcessingSettings, Settings};
use crate::library::{library_for, ViewerFactory};
use crate::notifications::{Notification, Notifier};
use crate::store::{AcquisitionStore, Book, Download, Request, RequestStatus};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PostProcessingError {
    #[error("Download {0} finished without reporting a path")]
    NoDownloadPath(String),

    #[error("Downloaded files not found at {path:?}; check path remapping ({remap})")]
    SourceMissing { path: PathBuf, remap: String },

    #[error("Cannot read downloaded files at {path:?}: {source}")]
    SourceUnreadable { path: PathBuf, source: io::Error },

    #[error("Permission denied writing to {path:?}: {source}")]
    PermissionDenied { path: PathBuf, source: io::Error },

    #[error("Copy into {path:?} failed: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Book {0} not found")]
    BookMissing(String),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("Post-processing task aborted: {0}")]
    Aborted(String),
}

impl PostProcessingError {
    /// An unwritable destination will not fix itself; everything else is
    /// escalated for attention and can be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PostProcessingError::PermissionDenied { .. })
    }

    fn from_copy(err: CopyError) -> Self {
        match err {
            CopyError::Source { path, source } => {
                PostProcessingError::SourceUnreadable { path, source }
            }
            CopyError::Destination { path, source }
                if source.kind() == io::ErrorKind::PermissionDenied =>
            {
                PostProcessingError::PermissionDenied { path, source }
            }
            CopyError::Destination { path, source } => PostProcessingError::Io { path, source },
        }
    }
}

/// A completed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub path: PathBuf,
    pub is_directory: bool,
    pub files: usize,
    pub bytes: u64,
}

/// Final outcome of one post-processing run, as recorded on the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Delivered(Delivery),
    /// The request was no longer in a state that allows delivery.
    Skipped,
    Escalated(String),
    Failed(String),
}

/// Copy `source` under `root` following the templates. Blocking.
pub fn deliver(
    book: &Book,
    source: &Path,
    root: &Path,
    settings: &PostProcessingSettings,
) -> Result<Delivery, PostProcessingError> {
    let values = TemplateValues::from_book(book);
    let dest_dir = root.join(render_path(
        &settings.path_template,
        &values,
        settings.max_component_length,
    ));

    let metadata = std::fs::metadata(source).map_err(|e| PostProcessingError::Io {
        path: source.to_path_buf(),
        source: e,
    })?;

    let report = if metadata.is_dir() {
        copy_tree(source, &dest_dir).map_err(PostProcessingError::from_copy)?
    } else {
        let stem = render_filename(
            &settings.filename_template,
            &values,
            settings.max_component_length,
        );
        copy_single_file(source, &dest_dir, &stem)
            .map_err(PostProcessingError::from_copy)?
    };

    Ok(Delivery {
        path: report.path,
        is_directory: metadata.is_dir(),
        files: report.files,
        bytes: report.bytes,
    })
}

pub struct PostProcessor {
    store: Arc<dyn AcquisitionStore>,
    notifier: Arc<dyn Notifier>,
    viewers: ViewerFactory,
}

impl PostProcessor {
    pub fn new(
        store: Arc<dyn AcquisitionStore>,
        notifier: Arc<dyn Notifier>,
        viewers: ViewerFactory,
    ) -> Self {
        Self {
            store,
            notifier,
            viewers,
        }
    }

    /// Deliver a completed download and record the outcome on its request.
    /// Errors are caught here once and turned into a failed request or an
    /// attention flag.
    pub async fn process(
        &self,
        settings: &Settings,
        request: &Request,
        download: &Download,
    ) -> ProcessOutcome {
        let started = self.store.transition(
            &request.id,
            &[RequestStatus::Downloading, RequestStatus::Processing],
            RequestStatus::Processing,
        );
        match started {
            Ok(true) => {}
            Ok(false) => {
                debug!("Request {} left downloading, skipping delivery", request.id);
                return ProcessOutcome::Skipped;
            }
            Err(err) => {
                warn!("Could not start processing request {}: {:#}", request.id, err);
                return ProcessOutcome::Skipped;
            }
        }
        info!("Post-processing request {} ({})", request.id, download.name);

        match self.run(settings, request, download).await {
            Ok((book, delivery)) => {
                self.after_delivery(settings, request, &book, &delivery).await;
                ProcessOutcome::Delivered(delivery)
            }
            Err(err) if err.is_fatal() => {
                let message = err.to_string();
                warn!("Request {} failed in post-processing: {}", request.id, message);
                if let Err(e) = self.store.mark_failed(&request.id, &message) {
                    warn!("Could not mark request {} failed: {:#}", request.id, e);
                }
                self.notifier
                    .notify(&Notification::failed(request, &message, now()));
                ProcessOutcome::Failed(message)
            }
            Err(err) => {
                let message = format!("Post-processing failed: {}", err);
                warn!("Request {}: {}", request.id, message);
                if let Err(e) = self.store.flag_attention(&request.id, &message) {
                    warn!("Could not flag request {}: {:#}", request.id, e);
                }
                self.notifier
                    .notify(&Notification::attention(request, &message, now()));
                ProcessOutcome::Escalated(message)
            }
        }
    }

    async fn run(
        &self,
        settings: &Settings,
        request: &Request,
        download: &Download,
    ) -> Result<(Book, Delivery), PostProcessingError> {
        let book = self
            .store
            .get_book(&request.book_id)?
            .ok_or_else(|| PostProcessingError::BookMissing(request.book_id.clone()))?;
        let reported = download
            .download_path
            .as_deref()
            .ok_or_else(|| PostProcessingError::NoDownloadPath(download.id.clone()))?;

        let client = download
            .client_id
            .as_deref()
            .and_then(|id| settings.download_client(id));
        let source = remap_source(reported, &settings.post_processing, client);
        if !source.exists() {
            return Err(PostProcessingError::SourceMissing {
                path: source,
                remap: describe_remap(&settings.post_processing, client),
            });
        }

        let root = settings.output_root(book.book_type).clone();
        let pp = settings.post_processing.clone();
        let task_book = book.clone();
        let delivery =
            tokio::task::spawn_blocking(move || deliver(&task_book, &source, &root, &pp))
                .await
                .map_err(|e| PostProcessingError::Aborted(e.to_string()))??;

        let path = delivery.path.to_string_lossy().into_owned();
        self.store.complete_with_file(&request.id, &book.id, &path)?;
        info!(
            "Delivered request {} to {} ({} file(s), {:#})",
            request.id,
            path,
            delivery.files,
            byte_unit::Byte::from(delivery.bytes)
        );
        Ok((book, delivery))
    }

    /// Archive staging, library scan and notification. None of these can
    /// undo a completed delivery.
    async fn after_delivery(
        &self,
        settings: &Settings,
        request: &Request,
        book: &Book,
        delivery: &Delivery,
    ) {
        if let (true, Some(archive_dir)) = (
            delivery.is_directory,
            settings.post_processing.archive_dir.clone(),
        ) {
            let src = delivery.path.clone();
            let name = render_filename(
                &settings.post_processing.filename_template,
                &TemplateValues::from_book(book),
                settings.post_processing.max_component_length,
            );
            match tokio::task::spawn_blocking(move || stage_archive(&src, &archive_dir, &name)).await
            {
                Ok(Ok(path)) => debug!("Staged archive {:?}", path),
                Ok(Err(err)) => warn!("Archive staging for request {} failed: {}", request.id, err),
                Err(err) => warn!("Archive staging for request {} aborted: {}", request.id, err),
            }
        }

        self.scan_library(settings, book).await;

        let path = delivery.path.to_string_lossy();
        self.notifier
            .notify(&Notification::completed(request, book, &path, now()));
    }

    async fn scan_library(&self, settings: &Settings, book: &Book) {
        let Some(library_id) = library_for(&settings.library, book.book_type) else {
            return;
        };
        let viewer = match (self.viewers)(&settings.library) {
            Ok(Some(viewer)) => viewer,
            Ok(None) => return,
            Err(err) => {
                warn!("Library viewer unavailable: {}", err);
                return;
            }
        };
        match viewer.scan_library(library_id).await {
            Ok(true) => debug!("Library scan of {} requested", library_id),
            Ok(false) => warn!("Library {} did not accept a scan", library_id),
            Err(err) => warn!("Library scan of {} failed: {}", library_id, err),
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BookType, DownloadStatus, SqliteAcquisitionStore};
    use crate::test_support::{
        book_for_work, completed_download, settings_with_roots, FakeViewer, RecordingNotifier,
    };
    use std::fs;

    struct Fixture {
        store: Arc<SqliteAcquisitionStore>,
        notifier: Arc<RecordingNotifier>,
        viewer: Arc<FakeViewer>,
        processor: PostProcessor,
        request: Request,
        dir: tempfile::TempDir,
    }

    fn fixture(book_type: BookType) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteAcquisitionStore::in_memory().unwrap());
        let mut book = book_for_work("b1", "W1", book_type);
        book.title = "Dune".into();
        book.author = Some("Frank Herbert".into());
        store.insert_book(&book).unwrap();
        let request = Request::new("b1", "user-1", None, 1);
        store.insert_request(&request).unwrap();
        store
            .transition(&request.id, &[RequestStatus::Pending], RequestStatus::Downloading)
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let viewer = Arc::new(FakeViewer::default());
        let factory_viewer = viewer.clone();
        let processor = PostProcessor::new(
            store.clone(),
            notifier.clone(),
            Arc::new(
                move |_: &crate::config::LibrarySettings| -> Result<
                    Option<Arc<dyn crate::library::LibraryViewer>>,
                    crate::error::EngineError,
                > { Ok(Some(factory_viewer.clone())) },
            ),
        );
        Fixture {
            store,
            notifier,
            viewer,
            processor,
            request,
            dir,
        }
    }

    #[tokio::test]
    async fn test_single_file_delivery_completes_request() {
        let f = fixture(BookType::Ebook);
        let downloads = f.dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("dune.epub"), b"spice").unwrap();
        let mut settings = settings_with_roots(f.dir.path());
        settings.library.ebook_library_id = Some("lib-e".into());
        let download = completed_download(&f.request.id, &downloads.join("dune.epub"));

        let outcome = f.processor.process(&settings, &f.request, &download).await;

        let expected = f.dir.path().join("ebooks/Frank Herbert/Dune/Frank Herbert - Dune.epub");
        assert!(matches!(&outcome, ProcessOutcome::Delivered(d) if d.path == expected));
        assert_eq!(fs::read(&expected).unwrap(), b"spice");
        assert!(downloads.join("dune.epub").exists());

        let request = f.store.get_request(&f.request.id).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        let book = f.store.get_book("b1").unwrap().unwrap();
        assert_eq!(book.file_path.as_deref(), expected.to_str());
        assert_eq!(f.viewer.scans(), vec!["lib-e".to_string()]);
        assert_eq!(f.notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_directory_delivery_stages_archive() {
        let f = fixture(BookType::Audiobook);
        let source = f.dir.path().join("downloads/Dune.2019.Audiobook");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("01.mp3"), b"a").unwrap();
        let mut settings = settings_with_roots(f.dir.path());
        settings.post_processing.archive_dir = Some(f.dir.path().join("archives"));
        let download = completed_download(&f.request.id, &source);

        let outcome = f.processor.process(&settings, &f.request, &download).await;

        assert!(matches!(outcome, ProcessOutcome::Delivered(ref d) if d.is_directory));
        assert!(f.dir.path().join("audiobooks/Frank Herbert/Dune/01.mp3").exists());
        assert!(f.dir.path().join("archives/Frank Herbert - Dune.zip").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_source_escalates_instead_of_failing() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture(BookType::Ebook);
        let downloads = f.dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        let source = downloads.join("dune.epub");
        fs::write(&source, b"spice").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&source).is_ok() {
            // running as root, permissions are not enforced
            return;
        }
        let settings = settings_with_roots(f.dir.path());
        let download = completed_download(&f.request.id, &source);

        let outcome = f.processor.process(&settings, &f.request, &download).await;

        assert!(matches!(outcome, ProcessOutcome::Escalated(_)), "{:?}", outcome);
        let request = f.store.get_request(&f.request.id).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Processing);
        assert!(request.attention_needed);
    }

    #[tokio::test]
    async fn test_missing_source_names_path_and_remap() {
        let f = fixture(BookType::Ebook);
        let mut settings = settings_with_roots(f.dir.path());
        settings.post_processing.remote_path_prefix = Some("/remote".into());
        settings.post_processing.local_path_prefix = Some("/nonexistent/local".into());
        let download = completed_download(&f.request.id, Path::new("/remote/dune.epub"));

        let outcome = f.processor.process(&settings, &f.request, &download).await;

        let ProcessOutcome::Escalated(message) = outcome else {
            panic!("expected escalation, got {:?}", outcome);
        };
        assert!(message.contains("/nonexistent/local/dune.epub"));
        assert!(message.contains("'/remote' -> '/nonexistent/local'"));
        let request = f.store.get_request(&f.request.id).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Processing);
        assert!(request.attention_needed);
    }

    #[tokio::test]
    async fn test_request_not_downloading_is_skipped() {
        let f = fixture(BookType::Ebook);
        f.store.mark_failed(&f.request.id, "gone").unwrap();
        let settings = settings_with_roots(f.dir.path());
        let mut download = completed_download(&f.request.id, f.dir.path());
        download.status = DownloadStatus::Completed;

        assert_eq!(
            f.processor.process(&settings, &f.request, &download).await,
            ProcessOutcome::Skipped
        );
    }

    #[test]
    fn test_only_unwritable_destination_is_fatal() {
        let denied = || io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = PostProcessingError::from_copy(CopyError::Destination {
            path: PathBuf::from("/library"),
            source: denied(),
        });
        assert!(err.is_fatal());

        let err = PostProcessingError::from_copy(CopyError::Destination {
            path: PathBuf::from("/library"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        });
        assert!(!err.is_fatal());

        // a client writing files only it can read is fixable by hand
        let err = PostProcessingError::from_copy(CopyError::Source {
            path: PathBuf::from("/downloads/dune.epub"),
            source: denied(),
        });
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("/downloads/dune.epub"));
    }
}
