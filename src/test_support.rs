//! Fakes and builders shared by the unit tests.

use crate::acquisition::{AcquisitionEngine, EngineComponents};
use crate::background_jobs::JobContext;
use crate::config::{
    DownloadClientSettings, LibrarySettings, PostProcessingSettings, Settings, SettingsHandle,
    SubmissionSettings,
};
use crate::download_clients::{
    magnet_info_hash, ClientRegistry, DownloadClient, TransferState, TransferStatus,
};
use crate::error::EngineError;
use crate::health::HealthAggregator;
use crate::library::{Library, LibraryFolder, LibraryViewer};
use crate::notifications::{Notification, Notifier};
use crate::search::{SearchHit, SearchProvider};
use crate::store::{
    AcquisitionStore, Book, BookType, CandidateStatus, ClientType, Download, DownloadStatus,
    DownloadType, Request, RequestStatus, SearchResult, SqliteAcquisitionStore,
};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Settings
// ============================================================================

pub fn client_settings(id: &str, client_type: ClientType, priority: i32) -> DownloadClientSettings {
    DownloadClientSettings {
        id: id.to_string(),
        name: id.to_string(),
        client_type,
        url: "http://localhost:8080".to_string(),
        username: None,
        password: None,
        api_key: (client_type == ClientType::Sabnzbd).then(|| "sab-key".to_string()),
        category: None,
        priority,
        enabled: true,
        remote_path: None,
        local_path: None,
    }
}

pub fn settings_with_clients(clients: &[(&str, ClientType, i32)]) -> Settings {
    Settings {
        download_clients: clients
            .iter()
            .map(|(id, client_type, priority)| client_settings(id, *client_type, *priority))
            .collect(),
        ..Settings::default()
    }
}

pub fn settings_with_roots(dir: &Path) -> Settings {
    Settings {
        post_processing: PostProcessingSettings {
            audiobook_output_path: dir.join("audiobooks"),
            ebook_output_path: dir.join("ebooks"),
            ..PostProcessingSettings::default()
        },
        ..Settings::default()
    }
}

pub fn fast_submission() -> SubmissionSettings {
    SubmissionSettings {
        poll_attempts: 3,
        poll_interval: Duration::from_millis(10),
        verify_attempts: 2,
        verify_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
    }
}

// ============================================================================
// Data builders
// ============================================================================

pub fn fake_hash(guid: &str) -> String {
    hex::encode(Sha1::digest(guid.as_bytes()))
}

/// Torrent hit titled after its guid with a magnet carrying a stable hash.
pub fn hit(guid: &str, seeders: Option<i64>) -> SearchHit {
    SearchHit {
        guid: guid.to_string(),
        title: guid.to_string(),
        indexer: Some("test-indexer".to_string()),
        size_bytes: Some(1024),
        seeders,
        leechers: Some(0),
        download_url: None,
        magnet_url: Some(format!("magnet:?xt=urn:btih:{}", fake_hash(guid))),
        info_url: None,
        published_at: None,
        download_type: DownloadType::Torrent,
    }
}

pub fn candidate(
    guid: &str,
    download_type: DownloadType,
    seeders: Option<i64>,
    size_bytes: Option<i64>,
) -> SearchResult {
    let (magnet_url, download_url) = match download_type {
        DownloadType::Torrent => (Some(format!("magnet:?xt=urn:btih:{}", fake_hash(guid))), None),
        DownloadType::Usenet => (None, Some(format!("https://indexer/get/{}.nzb", guid))),
    };
    SearchResult {
        id: format!("cand-{}", guid),
        request_id: "req-1".to_string(),
        guid: guid.to_string(),
        title: guid.to_string(),
        indexer: None,
        source: "test".to_string(),
        size_bytes,
        seeders,
        leechers: None,
        download_url,
        magnet_url,
        info_url: None,
        published_at: None,
        download_type,
        status: CandidateStatus::Pending,
        score: 0.0,
        created_at: 0,
    }
}

pub fn book_titled(id: &str, title: &str, author: Option<&str>) -> Book {
    Book {
        id: id.to_string(),
        title: title.to_string(),
        author: author.map(String::from),
        book_type: BookType::Ebook,
        work_source: None,
        work_id: None,
        edition_id: None,
        year: None,
        publisher: None,
        language: None,
        file_path: None,
        created_at: 0,
        updated_at: 0,
    }
}

pub fn book_for_work(id: &str, work_id: &str, book_type: BookType) -> Book {
    Book {
        book_type,
        work_source: Some("openlibrary".to_string()),
        work_id: Some(work_id.to_string()),
        ..book_titled(id, "The Dispossessed", Some("Ursula K. Le Guin"))
    }
}

pub fn sample_book() -> Book {
    Book {
        year: Some(1965),
        language: Some("en".to_string()),
        ..book_titled("book-1", "Dune", Some("Frank Herbert"))
    }
}

pub fn completed_download(request_id: &str, path: &Path) -> Download {
    Download {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        search_result_id: None,
        name: "download".to_string(),
        size_bytes: None,
        status: DownloadStatus::Completed,
        progress: 100,
        external_id: Some("ext-1".to_string()),
        download_type: DownloadType::Torrent,
        download_path: Some(path.to_string_lossy().into_owned()),
        client_id: None,
        error_message: None,
        created_at: 0,
        updated_at: 0,
        completed_at: Some(0),
    }
}

// ============================================================================
// Download client
// ============================================================================

/// What the next `submit` call does.
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// A transfer with `id` shows up; the id is returned when `synchronous`.
    Appear { id: String, synchronous: bool },
    /// Accepted, but no transfer is ever created.
    SilentDrop,
}

#[derive(Default)]
struct FakeClientState {
    transfers: Vec<TransferStatus>,
    queued: VecDeque<SubmitBehavior>,
    submitted: Vec<String>,
    removed: Vec<String>,
    next_id: usize,
}

pub struct FakeClient {
    client_type: ClientType,
    reachable: AtomicBool,
    probes: AtomicUsize,
    lists: AtomicUsize,
    status_delay: Mutex<Duration>,
    state: Mutex<FakeClientState>,
}

impl FakeClient {
    pub fn new(client_type: ClientType) -> Self {
        Self {
            client_type,
            reachable: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            status_delay: Mutex::new(Duration::ZERO),
            state: Mutex::new(FakeClientState::default()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make every `status` call take `delay`.
    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = delay;
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn queue_submit(&self, behavior: SubmitBehavior) {
        self.state.lock().unwrap().queued.push_back(behavior);
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn add_transfer(&self, id: &str, progress: u8) {
        let state = if progress > 0 {
            TransferState::Downloading
        } else {
            TransferState::Queued
        };
        self.state.lock().unwrap().transfers.push(transfer(id, progress, state));
    }

    pub fn set_progress(&self, id: &str, progress: u8, state: TransferState) {
        self.update(id, |t| {
            t.progress = progress;
            t.state = state;
            if state == TransferState::Failed {
                t.error_message = Some("tracker error".to_string());
            }
        });
    }

    pub fn complete(&self, id: &str, path: &str) {
        self.update(id, |t| {
            t.progress = 100;
            t.state = TransferState::Completed;
            t.path = Some(path.to_string());
        });
    }

    /// Drop a transfer as if a user deleted it in the client UI.
    pub fn forget(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .transfers
            .retain(|t| !t.id.eq_ignore_ascii_case(id));
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut TransferStatus)) {
        let mut state = self.state.lock().unwrap();
        let transfer = state
            .transfers
            .iter_mut()
            .find(|t| t.id.eq_ignore_ascii_case(id))
            .unwrap_or_else(|| panic!("no transfer {}", id));
        f(transfer);
    }

    fn check_reachable(&self) -> Result<(), EngineError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Connection("connection refused".to_string()))
        }
    }
}

fn transfer(id: &str, progress: u8, state: TransferState) -> TransferStatus {
    TransferStatus {
        id: id.to_string(),
        name: Some(id.to_string()),
        progress,
        state,
        size_bytes: Some(1024),
        path: None,
        error_message: None,
    }
}

#[async_trait]
impl DownloadClient for FakeClient {
    fn client_type(&self) -> ClientType {
        self.client_type
    }

    async fn submit(&self, link: &str) -> Result<Option<String>, EngineError> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        state.submitted.push(link.to_string());
        match state.queued.pop_front() {
            Some(SubmitBehavior::SilentDrop) => Ok(None),
            Some(SubmitBehavior::Appear { id, synchronous }) => {
                state.transfers.push(transfer(&id, 0, TransferState::Queued));
                Ok(synchronous.then_some(id))
            }
            None => {
                let id = match magnet_info_hash(link) {
                    Some(hash) => hash,
                    None => {
                        state.next_id += 1;
                        format!("fake-{}", state.next_id)
                    }
                };
                state.transfers.push(transfer(&id, 0, TransferState::Queued));
                Ok(None)
            }
        }
    }

    async fn status(&self, transfer_id: &str) -> Result<Option<TransferStatus>, EngineError> {
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transfers
            .iter()
            .find(|t| t.id.eq_ignore_ascii_case(transfer_id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<TransferStatus>, EngineError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.state.lock().unwrap().transfers.clone())
    }

    async fn test_connection(&self) -> Result<(), EngineError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()
    }

    async fn remove(&self, transfer_id: &str) -> Result<(), EngineError> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        state.removed.push(transfer_id.to_string());
        state
            .transfers
            .retain(|t| !t.id.eq_ignore_ascii_case(transfer_id));
        Ok(())
    }
}

// ============================================================================
// Search provider
// ============================================================================

pub struct FakeProvider {
    name: String,
    configured: AtomicBool,
    result: Result<Vec<SearchHit>, EngineError>,
    searches: AtomicUsize,
}

impl FakeProvider {
    pub fn returning(name: &str, hits: Vec<SearchHit>) -> Self {
        Self::with_result(name, Ok(hits))
    }

    pub fn failing(name: &str, err: EngineError) -> Self {
        Self::with_result(name, Err(err))
    }

    fn with_result(name: &str, result: Result<Vec<SearchHit>, EngineError>) -> Self {
        Self {
            name: name.to_string(),
            configured: AtomicBool::new(true),
            result,
            searches: AtomicUsize::new(0),
        }
    }

    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn search(&self, _query: &str, _book_type: BookType) -> Result<Vec<SearchHit>, EngineError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }

    async fn test(&self) -> Result<(), EngineError> {
        self.result.as_ref().map(|_| ()).map_err(Clone::clone)
    }
}

// ============================================================================
// Library viewer and notifier
// ============================================================================

pub struct FakeViewer {
    reachable: AtomicBool,
    scans: Mutex<Vec<String>>,
}

impl Default for FakeViewer {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            scans: Mutex::new(Vec::new()),
        }
    }
}

impl FakeViewer {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn scans(&self) -> Vec<String> {
        self.scans.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> Result<(), EngineError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Connection("viewer offline".to_string()))
        }
    }
}

#[async_trait]
impl LibraryViewer for FakeViewer {
    async fn list_libraries(&self) -> Result<Vec<Library>, EngineError> {
        self.check_reachable()?;
        Ok(vec![Library {
            id: "lib-e".to_string(),
            name: "Ebooks".to_string(),
            media_type: Some("book".to_string()),
            folders: vec![LibraryFolder {
                id: "f1".to_string(),
                path: "/ebooks".to_string(),
            }],
        }])
    }

    async fn get_library(&self, id: &str) -> Result<Library, EngineError> {
        self.list_libraries()
            .await?
            .into_iter()
            .find(|l| l.id == id)
            .ok_or_else(|| EngineError::Client(format!("Library {} not found", id)))
    }

    async fn scan_library(&self, id: &str) -> Result<bool, EngineError> {
        self.check_reachable()?;
        self.scans.lock().unwrap().push(id.to_string());
        Ok(true)
    }

    async fn test(&self) -> Result<(), EngineError> {
        self.check_reachable()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent.lock().unwrap().push(notification.clone());
    }
}

// ============================================================================
// Engine fixture
// ============================================================================

/// Engine over an in-memory store, fake providers and one fake per
/// configured client. Book `b1` ("Dune", ebook) exists from the start.
pub struct EngineFixture {
    pub engine: Arc<AcquisitionEngine>,
    pub store: Arc<SqliteAcquisitionStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub viewer: Arc<FakeViewer>,
    pub dir: TempDir,
    clients: HashMap<String, Arc<FakeClient>>,
}

impl EngineFixture {
    pub fn new(providers: Vec<Arc<FakeProvider>>, clients: &[(&str, ClientType, i32)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_with_roots(dir.path());
        settings.submission = fast_submission();
        settings.scheduler.rate_limit_delay = Duration::ZERO;
        settings.download_clients = settings_with_clients(clients).download_clients;

        let fakes: HashMap<String, Arc<FakeClient>> = clients
            .iter()
            .map(|(id, client_type, _)| (id.to_string(), Arc::new(FakeClient::new(*client_type))))
            .collect();
        let factory_fakes = fakes.clone();
        let registry = ClientRegistry::with_factory(Arc::new(
            move |client: &DownloadClientSettings,
                  _: &SubmissionSettings|
                  -> Result<Arc<dyn DownloadClient>, EngineError> {
                factory_fakes
                    .get(&client.id)
                    .cloned()
                    .map(|fake| fake as Arc<dyn DownloadClient>)
                    .ok_or_else(|| EngineError::NotConfigured(client.id.clone()))
            },
        ));

        let viewer = Arc::new(FakeViewer::default());
        let factory_viewer = viewer.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let components = EngineComponents {
            providers: Arc::new(move |_: &Settings| -> Vec<Arc<dyn SearchProvider>> {
                providers
                    .iter()
                    .map(|p| p.clone() as Arc<dyn SearchProvider>)
                    .collect()
            }),
            registry: Arc::new(registry),
            viewers: Arc::new(
                move |_: &LibrarySettings| -> Result<Option<Arc<dyn LibraryViewer>>, EngineError> {
                    Ok(Some(factory_viewer.clone()))
                },
            ),
            notifier: notifier.clone(),
        };

        let store = Arc::new(SqliteAcquisitionStore::in_memory().unwrap());
        store
            .insert_book(&book_titled("b1", "Dune", Some("Frank Herbert")))
            .unwrap();
        let engine = AcquisitionEngine::new(
            store.clone(),
            SettingsHandle::new(settings).unwrap(),
            components,
        )
        .unwrap();

        Self {
            engine: Arc::new(engine),
            store,
            notifier,
            viewer,
            dir,
            clients: fakes,
        }
    }

    pub fn client(&self, id: &str) -> Arc<FakeClient> {
        self.clients[id].clone()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = (*self.engine.settings().snapshot()).clone();
        f(&mut settings);
        self.engine.apply_settings(settings).unwrap();
    }

    pub fn request(&self, id: &str) -> Request {
        self.store.get_request(id).unwrap().unwrap()
    }

    /// Pending request for `b1` created at `created_at`.
    pub fn pending_request(&self, created_at: i64) -> Request {
        let request = Request::new("b1", "user-1", None, created_at);
        self.store.insert_request(&request).unwrap();
        request
    }

    /// Request for `b1` already claimed by a sweep.
    pub fn claimed_request(&self) -> Request {
        let request = self.pending_request(1);
        assert!(self
            .store
            .transition(&request.id, &[RequestStatus::Pending], RequestStatus::Searching)
            .unwrap());
        self.request(&request.id)
    }

    /// Job context over this engine. Health probes see no search
    /// providers and no library viewer.
    pub fn job_context(&self) -> JobContext {
        let health = HealthAggregator::new(
            self.store.clone(),
            Arc::new(|_: &Settings| -> Vec<Arc<dyn SearchProvider>> { Vec::new() }),
            self.engine.registry().clone(),
            Arc::new(
                |_: &LibrarySettings| -> Result<Option<Arc<dyn LibraryViewer>>, EngineError> {
                    Ok(None)
                },
            ),
        );
        JobContext::new(CancellationToken::new(), self.engine.clone(), Arc::new(health))
    }
}
