//! Acquisition storage and persistence.
//!
//! SQLite-backed storage for books, requests, candidates, downloads,
//! configured clients and dependency health.

use super::models::*;
use super::schema::ACQUISITION_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{open_in_memory, open_versioned};
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Trait for acquisition storage operations.
///
/// Every request status change is a conditional update: it only applies
/// when the row is still in one of the expected source statuses, and the
/// methods report whether it did.
pub trait AcquisitionStore: Send + Sync {
    // === Books ===

    fn insert_book(&self, book: &Book) -> Result<()>;

    fn get_book(&self, id: &str) -> Result<Option<Book>>;

    fn find_book_by_work(&self, work_id: &str, book_type: BookType) -> Result<Option<Book>>;

    fn find_book_by_edition(&self, edition_id: &str, book_type: BookType)
        -> Result<Option<Book>>;

    /// All books sharing a work id, in either format.
    fn books_for_work(&self, work_id: &str) -> Result<Vec<Book>>;

    fn list_books(&self, book_type: Option<BookType>) -> Result<Vec<Book>>;

    // === Requests ===

    fn insert_request(&self, request: &Request) -> Result<()>;

    fn get_request(&self, id: &str) -> Result<Option<Request>>;

    fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<Request>>;

    /// Requests whose book has the given work id and format.
    fn requests_for_work(&self, work_id: &str, book_type: BookType) -> Result<Vec<Request>>;

    /// Requests pointing at one book row, oldest first.
    fn requests_for_book(&self, book_id: &str) -> Result<Vec<Request>>;

    /// Move every `not_found` request whose retry is due back to `pending`.
    fn promote_due_retries(&self, now: i64) -> Result<usize>;

    /// Atomically move up to `limit` pending requests to `searching`,
    /// oldest first, and return them in that order.
    fn claim_pending(&self, limit: usize, now: i64) -> Result<Vec<Request>>;

    fn transition(&self, id: &str, from: &[RequestStatus], to: RequestStatus) -> Result<bool>;

    /// `searching` → `not_found` with the retry counter bumped.
    fn mark_not_found(&self, id: &str, next_retry_at: i64) -> Result<bool>;

    /// Set attention on a non-terminal request, leaving its status alone.
    fn flag_attention(&self, id: &str, message: &str) -> Result<bool>;

    fn mark_failed(&self, id: &str, message: &str) -> Result<bool>;

    /// Record the delivered file on the book and complete the request in
    /// one transaction.
    fn complete_with_file(&self, request_id: &str, book_id: &str, file_path: &str)
        -> Result<()>;

    /// Put a stalled request back to `pending`, clearing attention.
    fn reset_for_retry(&self, id: &str) -> Result<bool>;

    /// Delete a request if its status allows it, and its book if orphaned.
    fn cancel_request(&self, id: &str) -> Result<CancelOutcome>;

    /// Reset searches and escalate post-processing left behind by a crash.
    fn recover_interrupted(&self) -> Result<RecoveryReport>;

    /// Escalate every request with an active download on `client_id`.
    fn escalate_requests_on_client(&self, client_id: &str, message: &str) -> Result<usize>;

    // === Candidates ===

    /// Discard the request's candidate set and insert `results` in one
    /// transaction.
    fn replace_candidates(&self, request_id: &str, results: &[SearchResult]) -> Result<()>;

    fn list_candidates(&self, request_id: &str) -> Result<Vec<SearchResult>>;

    fn get_candidate(&self, id: &str) -> Result<Option<SearchResult>>;

    /// Select a candidate, reject its siblings and create the queued
    /// download. Returns false without changes if the request already has
    /// an active download.
    fn accept_candidate(&self, candidate_id: &str, download: &Download) -> Result<bool>;

    // === Downloads ===

    fn get_download(&self, id: &str) -> Result<Option<Download>>;

    fn downloads_for_request(&self, request_id: &str) -> Result<Vec<Download>>;

    fn active_download_for_request(&self, request_id: &str) -> Result<Option<Download>>;

    /// Active downloads that have been handed to a client.
    fn list_active_downloads(&self) -> Result<Vec<Download>>;

    fn active_downloads_on_client(&self, client_id: &str) -> Result<Vec<Download>>;

    /// Attach the client transfer to a queued download and move its
    /// request from `searching` to `downloading`.
    fn record_submission(&self, download_id: &str, client_id: &str, external_id: &str)
        -> Result<bool>;

    fn update_download_progress(&self, id: &str, progress: u8) -> Result<bool>;

    fn complete_download(&self, id: &str, download_path: Option<&str>) -> Result<bool>;

    fn fail_download(&self, id: &str, message: &str) -> Result<bool>;

    fn latest_completed_download(&self, request_id: &str) -> Result<Option<Download>>;

    // === Download clients ===

    /// Upsert configured clients and disable rows no longer configured.
    fn sync_download_clients(&self, clients: &[DownloadClientRecord]) -> Result<()>;

    fn list_download_clients(&self) -> Result<Vec<DownloadClientRecord>>;

    // === Health ===

    /// Upsert a health row; a missing `last_success_at` keeps the stored one.
    fn upsert_health(&self, health: &SystemHealth) -> Result<()>;

    fn get_health(&self, service: &str) -> Result<Option<SystemHealth>>;

    fn list_health(&self) -> Result<Vec<SystemHealth>>;
}

/// SQLite-backed acquisition store.
pub struct SqliteAcquisitionStore {
    conn: Arc<Mutex<Connection>>,
}

const ACTIVE_DOWNLOAD_STATUSES: &str = "('queued', 'downloading')";

fn status_list(statuses: &[RequestStatus]) -> String {
    let quoted: Vec<String> = statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    format!("({})", quoted.join(", "))
}

impl SqliteAcquisitionStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(&db_path, ACQUISITION_VERSIONED_SCHEMAS, "acquisition")?;
        info!("Opened acquisition database at {:?}", db_path.as_ref());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory(ACQUISITION_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("acquisition store connection lock poisoned"))
    }

    /// Raw SQL against the store, for tests that need to break it.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn row_to_book(row: &rusqlite::Row) -> rusqlite::Result<Book> {
        Ok(Book {
            id: row.get("id")?,
            title: row.get("title")?,
            author: row.get("author")?,
            book_type: BookType::from_str(&row.get::<_, String>("book_type")?)
                .unwrap_or(BookType::Ebook),
            work_source: row.get("work_source")?,
            work_id: row.get("work_id")?,
            edition_id: row.get("edition_id")?,
            year: row.get("year")?,
            publisher: row.get("publisher")?,
            language: row.get("language")?,
            file_path: row.get("file_path")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<Request> {
        Ok(Request {
            id: row.get("id")?,
            book_id: row.get("book_id")?,
            requester_id: row.get("requester_id")?,
            status: RequestStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(RequestStatus::Failed),
            retry_count: row.get("retry_count")?,
            next_retry_at: row.get("next_retry_at")?,
            attention_needed: row.get::<_, i64>("attention_needed")? != 0,
            issue_description: row.get("issue_description")?,
            language: row.get("language")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn row_to_candidate(row: &rusqlite::Row) -> rusqlite::Result<SearchResult> {
        Ok(SearchResult {
            id: row.get("id")?,
            request_id: row.get("request_id")?,
            guid: row.get("guid")?,
            title: row.get("title")?,
            indexer: row.get("indexer")?,
            source: row.get("source")?,
            size_bytes: row.get("size_bytes")?,
            seeders: row.get("seeders")?,
            leechers: row.get("leechers")?,
            download_url: row.get("download_url")?,
            magnet_url: row.get("magnet_url")?,
            info_url: row.get("info_url")?,
            published_at: row.get("published_at")?,
            download_type: DownloadType::from_str(&row.get::<_, String>("download_type")?)
                .unwrap_or(DownloadType::Torrent),
            status: CandidateStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(CandidateStatus::Pending),
            score: row.get("score")?,
            created_at: row.get("created_at")?,
        })
    }

    fn row_to_download(row: &rusqlite::Row) -> rusqlite::Result<Download> {
        Ok(Download {
            id: row.get("id")?,
            request_id: row.get("request_id")?,
            search_result_id: row.get("search_result_id")?,
            name: row.get("name")?,
            size_bytes: row.get("size_bytes")?,
            status: DownloadStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(DownloadStatus::Failed),
            progress: row.get::<_, i64>("progress")?.clamp(0, 100) as u8,
            external_id: row.get("external_id")?,
            download_type: DownloadType::from_str(&row.get::<_, String>("download_type")?)
                .unwrap_or(DownloadType::Torrent),
            download_path: row.get("download_path")?,
            client_id: row.get("client_id")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn row_to_client(row: &rusqlite::Row) -> rusqlite::Result<DownloadClientRecord> {
        let client_type = ClientType::from_str(&row.get::<_, String>("client_type")?)
            .unwrap_or(ClientType::Qbittorrent);
        Ok(DownloadClientRecord {
            id: row.get("id")?,
            name: row.get("name")?,
            client_type,
            download_type: DownloadType::from_str(&row.get::<_, String>("download_type")?)
                .unwrap_or_else(|| client_type.download_type()),
            url: row.get("url")?,
            category: row.get("category")?,
            priority: row.get("priority")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            remote_path: row.get("remote_path")?,
            local_path: row.get("local_path")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_health(row: &rusqlite::Row) -> rusqlite::Result<SystemHealth> {
        Ok(SystemHealth {
            service: row.get("service")?,
            status: HealthStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(HealthStatus::Down),
            message: row.get("message")?,
            last_check_at: row.get("last_check_at")?,
            last_success_at: row.get("last_success_at")?,
        })
    }

    fn query_books(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Book>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let books = stmt
            .query_map(params, Self::row_to_book)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(books)
    }

    fn query_requests(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Request>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let requests = stmt
            .query_map(params, Self::row_to_request)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requests)
    }

    fn query_downloads(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Download>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let downloads = stmt
            .query_map(params, Self::row_to_download)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(downloads)
    }
}

impl AcquisitionStore for SqliteAcquisitionStore {
    // === Books ===

    fn insert_book(&self, book: &Book) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO books (
                id, title, author, book_type, work_source, work_id, edition_id,
                year, publisher, language, file_path, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                book.id,
                book.title,
                book.author,
                book.book_type.as_str(),
                book.work_source,
                book.work_id,
                book.edition_id,
                book.year,
                book.publisher,
                book.language,
                book.file_path,
                book.created_at,
                book.updated_at,
            ],
        )
        .with_context(|| format!("Failed to insert book {}", book.id))?;
        Ok(())
    }

    fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.conn()?;
        let book = conn
            .query_row("SELECT * FROM books WHERE id = ?1", [id], Self::row_to_book)
            .optional()?;
        Ok(book)
    }

    fn find_book_by_work(&self, work_id: &str, book_type: BookType) -> Result<Option<Book>> {
        let conn = self.conn()?;
        // Prefer the acquired copy when several rows share a work id
        let book = conn
            .query_row(
                r#"SELECT * FROM books WHERE work_id = ?1 AND book_type = ?2
                   ORDER BY file_path IS NULL, created_at ASC LIMIT 1"#,
                params![work_id, book_type.as_str()],
                Self::row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    fn find_book_by_edition(
        &self,
        edition_id: &str,
        book_type: BookType,
    ) -> Result<Option<Book>> {
        let conn = self.conn()?;
        let book = conn
            .query_row(
                r#"SELECT * FROM books WHERE edition_id = ?1 AND book_type = ?2
                   ORDER BY file_path IS NULL, created_at ASC LIMIT 1"#,
                params![edition_id, book_type.as_str()],
                Self::row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    fn books_for_work(&self, work_id: &str) -> Result<Vec<Book>> {
        self.query_books(
            "SELECT * FROM books WHERE work_id = ?1 ORDER BY created_at ASC",
            [work_id],
        )
    }

    fn list_books(&self, book_type: Option<BookType>) -> Result<Vec<Book>> {
        match book_type {
            Some(book_type) => self.query_books(
                "SELECT * FROM books WHERE book_type = ?1 ORDER BY created_at ASC",
                [book_type.as_str()],
            ),
            None => self.query_books("SELECT * FROM books ORDER BY created_at ASC", []),
        }
    }

    // === Requests ===

    fn insert_request(&self, request: &Request) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO requests (
                id, book_id, requester_id, status, retry_count, next_retry_at,
                attention_needed, issue_description, language,
                created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                request.id,
                request.book_id,
                request.requester_id,
                request.status.as_str(),
                request.retry_count,
                request.next_retry_at,
                request.attention_needed as i64,
                request.issue_description,
                request.language,
                request.created_at,
                request.updated_at,
                request.completed_at,
            ],
        )
        .with_context(|| format!("Failed to insert request {}", request.id))?;
        Ok(())
    }

    fn get_request(&self, id: &str) -> Result<Option<Request>> {
        let conn = self.conn()?;
        let request = conn
            .query_row(
                "SELECT * FROM requests WHERE id = ?1",
                [id],
                Self::row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<Request>> {
        match status {
            Some(status) => self.query_requests(
                "SELECT * FROM requests WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
                [status.as_str()],
            ),
            None => self.query_requests(
                "SELECT * FROM requests ORDER BY created_at ASC, rowid ASC",
                [],
            ),
        }
    }

    fn requests_for_work(&self, work_id: &str, book_type: BookType) -> Result<Vec<Request>> {
        self.query_requests(
            r#"SELECT r.* FROM requests r
               JOIN books b ON b.id = r.book_id
               WHERE b.work_id = ?1 AND b.book_type = ?2
               ORDER BY r.created_at ASC, r.rowid ASC"#,
            params![work_id, book_type.as_str()],
        )
    }

    fn requests_for_book(&self, book_id: &str) -> Result<Vec<Request>> {
        self.query_requests(
            "SELECT * FROM requests WHERE book_id = ?1 ORDER BY created_at ASC, rowid ASC",
            [book_id],
        )
    }

    fn promote_due_retries(&self, now: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            r#"UPDATE requests SET status = 'pending', updated_at = ?1
               WHERE status = 'not_found' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1"#,
            [now],
        )?;
        Ok(count)
    }

    fn claim_pending(&self, limit: usize, now: i64) -> Result<Vec<Request>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                r#"SELECT id FROM requests WHERE status = 'pending'
                   ORDER BY created_at ASC, rowid ASC LIMIT ?1"#,
            )?;
            let ids = stmt
                .query_map([limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let updated = tx.execute(
                r#"UPDATE requests SET status = 'searching', updated_at = ?2
                   WHERE id = ?1 AND status = 'pending'"#,
                params![id, now],
            )?;
            if updated == 1 {
                let request =
                    tx.query_row("SELECT * FROM requests WHERE id = ?1", [&id], Self::row_to_request)?;
                claimed.push(request);
            }
        }

        tx.commit()?;
        Ok(claimed)
    }

    fn transition(&self, id: &str, from: &[RequestStatus], to: RequestStatus) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let now = Self::now();
        let completed_at = if to == RequestStatus::Completed {
            Some(now)
        } else {
            None
        };
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!(
                r#"UPDATE requests SET status = ?1, updated_at = ?2,
                   completed_at = COALESCE(?3, completed_at)
                   WHERE id = ?4 AND status IN {}"#,
                status_list(from)
            ),
            params![to.as_str(), now, completed_at, id],
        )?;
        Ok(updated == 1)
    }

    fn mark_not_found(&self, id: &str, next_retry_at: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"UPDATE requests SET status = 'not_found', retry_count = retry_count + 1,
               next_retry_at = ?1, updated_at = ?2
               WHERE id = ?3 AND status = 'searching'"#,
            params![next_retry_at, Self::now(), id],
        )?;
        Ok(updated == 1)
    }

    fn flag_attention(&self, id: &str, message: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!(
                r#"UPDATE requests SET attention_needed = 1, issue_description = ?1, updated_at = ?2
                   WHERE id = ?3 AND status IN {}"#,
                status_list(&RequestStatus::NON_TERMINAL)
            ),
            params![message, Self::now(), id],
        )?;
        Ok(updated == 1)
    }

    fn mark_failed(&self, id: &str, message: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!(
                r#"UPDATE requests SET status = 'failed', issue_description = ?1, updated_at = ?2
                   WHERE id = ?3 AND status IN {}"#,
                status_list(&RequestStatus::NON_TERMINAL)
            ),
            params![message, Self::now(), id],
        )?;
        Ok(updated == 1)
    }

    fn complete_with_file(&self, request_id: &str, book_id: &str, file_path: &str) -> Result<()> {
        let now = Self::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let books = tx.execute(
            "UPDATE books SET file_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![file_path, now, book_id],
        )?;
        if books != 1 {
            bail!("Book {} not found", book_id);
        }

        let requests = tx.execute(
            r#"UPDATE requests SET status = 'completed', completed_at = ?1, updated_at = ?1,
               attention_needed = 0, issue_description = NULL
               WHERE id = ?2 AND status = 'processing'"#,
            params![now, request_id],
        )?;
        if requests != 1 {
            bail!("Request {} is not processing", request_id);
        }

        tx.commit()?;
        Ok(())
    }

    fn reset_for_retry(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!(
                r#"UPDATE requests SET status = 'pending', attention_needed = 0,
                   issue_description = NULL, next_retry_at = NULL, updated_at = ?1
                   WHERE id = ?2
                     AND (status = 'not_found' OR (attention_needed = 1 AND status IN {}))
                     AND NOT EXISTS (
                       SELECT 1 FROM downloads d
                       WHERE d.request_id = requests.id AND d.status IN {}
                     )"#,
                status_list(&RequestStatus::CANCELLABLE),
                ACTIVE_DOWNLOAD_STATUSES
            ),
            params![Self::now(), id],
        )?;
        Ok(updated == 1)
    }

    fn cancel_request(&self, id: &str) -> Result<CancelOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let row: Option<(String, String)> = tx
            .query_row(
                "SELECT status, book_id FROM requests WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((status, book_id)) = row else {
            return Ok(CancelOutcome::NotFound);
        };
        let status = RequestStatus::from_str(&status)
            .ok_or_else(|| anyhow!("Request {} has unknown status {}", id, status))?;
        if !status.is_cancellable() {
            return Ok(CancelOutcome::NotCancellable(status));
        }

        tx.execute("DELETE FROM requests WHERE id = ?1", [id])?;

        let book_deleted = tx.execute(
            r#"DELETE FROM books WHERE id = ?1 AND file_path IS NULL
               AND NOT EXISTS (SELECT 1 FROM requests WHERE book_id = ?1)"#,
            [&book_id],
        )? == 1;

        tx.commit()?;
        Ok(CancelOutcome::Cancelled { book_deleted })
    }

    fn recover_interrupted(&self) -> Result<RecoveryReport> {
        let now = Self::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let searches_reset = tx.execute(
            r#"UPDATE requests SET status = 'pending', updated_at = ?1
               WHERE status = 'searching' AND attention_needed = 0"#,
            [now],
        )?;
        let processing_escalated = tx.execute(
            r#"UPDATE requests SET attention_needed = 1,
               issue_description = 'Interrupted during post-processing; retry to resume delivery',
               updated_at = ?1
               WHERE status = 'processing' AND attention_needed = 0"#,
            [now],
        )?;
        // Accepted but never handed to a client; would block the next acceptance
        let submissions_abandoned = tx.execute(
            r#"UPDATE downloads SET status = 'failed',
               error_message = 'Interrupted before submission', updated_at = ?1
               WHERE status = 'queued' AND external_id IS NULL"#,
            [now],
        )?;

        tx.commit()?;
        Ok(RecoveryReport {
            searches_reset,
            processing_escalated,
            submissions_abandoned,
        })
    }

    fn escalate_requests_on_client(&self, client_id: &str, message: &str) -> Result<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!(
                r#"UPDATE requests SET attention_needed = 1, issue_description = ?1, updated_at = ?2
                   WHERE attention_needed = 0 AND status IN {}
                     AND id IN (
                       SELECT request_id FROM downloads
                       WHERE client_id = ?3 AND status IN {}
                     )"#,
                status_list(&RequestStatus::NON_TERMINAL),
                ACTIVE_DOWNLOAD_STATUSES
            ),
            params![message, Self::now(), client_id],
        )?;
        Ok(updated)
    }

    // === Candidates ===

    fn replace_candidates(&self, request_id: &str, results: &[SearchResult]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM search_results WHERE request_id = ?1", [request_id])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO search_results (
                    id, request_id, guid, title, indexer, source, size_bytes, seeders,
                    leechers, download_url, magnet_url, published_at, download_type,
                    status, score, created_at, info_url
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"#,
            )?;
            for result in results {
                if result.request_id != request_id {
                    bail!(
                        "Candidate {} belongs to request {}, not {}",
                        result.id,
                        result.request_id,
                        request_id
                    );
                }
                stmt.execute(params![
                    result.id,
                    result.request_id,
                    result.guid,
                    result.title,
                    result.indexer,
                    result.source,
                    result.size_bytes,
                    result.seeders,
                    result.leechers,
                    result.download_url,
                    result.magnet_url,
                    result.published_at,
                    result.download_type.as_str(),
                    result.status.as_str(),
                    result.score,
                    result.created_at,
                    result.info_url,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn list_candidates(&self, request_id: &str) -> Result<Vec<SearchResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM search_results WHERE request_id = ?1 ORDER BY score DESC, rowid ASC",
        )?;
        let results = stmt
            .query_map([request_id], Self::row_to_candidate)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    fn get_candidate(&self, id: &str) -> Result<Option<SearchResult>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT * FROM search_results WHERE id = ?1",
                [id],
                Self::row_to_candidate,
            )
            .optional()?;
        Ok(result)
    }

    fn accept_candidate(&self, candidate_id: &str, download: &Download) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let request_id: Option<String> = tx
            .query_row(
                "SELECT request_id FROM search_results WHERE id = ?1",
                [candidate_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(request_id) = request_id else {
            bail!("Candidate {} not found", candidate_id);
        };
        if request_id != download.request_id {
            bail!(
                "Candidate {} does not belong to request {}",
                candidate_id,
                download.request_id
            );
        }

        let active: i64 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM downloads WHERE request_id = ?1 AND status IN {}",
                ACTIVE_DOWNLOAD_STATUSES
            ),
            [&request_id],
            |row| row.get(0),
        )?;
        if active > 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE search_results SET status = 'rejected' WHERE request_id = ?1 AND id != ?2",
            params![request_id, candidate_id],
        )?;
        tx.execute(
            "UPDATE search_results SET status = 'selected' WHERE id = ?1",
            [candidate_id],
        )?;
        tx.execute(
            r#"INSERT INTO downloads (
                id, request_id, search_result_id, name, size_bytes, status, progress,
                external_id, download_type, download_path, client_id, error_message,
                created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                download.id,
                download.request_id,
                download.search_result_id,
                download.name,
                download.size_bytes,
                download.status.as_str(),
                download.progress as i64,
                download.external_id,
                download.download_type.as_str(),
                download.download_path,
                download.client_id,
                download.error_message,
                download.created_at,
                download.updated_at,
                download.completed_at,
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    // === Downloads ===

    fn get_download(&self, id: &str) -> Result<Option<Download>> {
        let conn = self.conn()?;
        let download = conn
            .query_row(
                "SELECT * FROM downloads WHERE id = ?1",
                [id],
                Self::row_to_download,
            )
            .optional()?;
        Ok(download)
    }

    fn downloads_for_request(&self, request_id: &str) -> Result<Vec<Download>> {
        self.query_downloads(
            "SELECT * FROM downloads WHERE request_id = ?1 ORDER BY created_at ASC, rowid ASC",
            [request_id],
        )
    }

    fn active_download_for_request(&self, request_id: &str) -> Result<Option<Download>> {
        let conn = self.conn()?;
        let download = conn
            .query_row(
                &format!(
                    "SELECT * FROM downloads WHERE request_id = ?1 AND status IN {} LIMIT 1",
                    ACTIVE_DOWNLOAD_STATUSES
                ),
                [request_id],
                Self::row_to_download,
            )
            .optional()?;
        Ok(download)
    }

    fn list_active_downloads(&self) -> Result<Vec<Download>> {
        self.query_downloads(
            &format!(
                r#"SELECT * FROM downloads
                   WHERE status IN {} AND client_id IS NOT NULL AND external_id IS NOT NULL
                   ORDER BY created_at ASC, rowid ASC"#,
                ACTIVE_DOWNLOAD_STATUSES
            ),
            [],
        )
    }

    fn active_downloads_on_client(&self, client_id: &str) -> Result<Vec<Download>> {
        self.query_downloads(
            &format!(
                "SELECT * FROM downloads WHERE client_id = ?1 AND status IN {} ORDER BY created_at ASC",
                ACTIVE_DOWNLOAD_STATUSES
            ),
            [client_id],
        )
    }

    fn record_submission(
        &self,
        download_id: &str,
        client_id: &str,
        external_id: &str,
    ) -> Result<bool> {
        let now = Self::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let request_id: Option<String> = tx
            .query_row(
                "SELECT request_id FROM downloads WHERE id = ?1 AND status = 'queued'",
                [download_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(request_id) = request_id else {
            return Ok(false);
        };

        tx.execute(
            r#"UPDATE downloads SET client_id = ?1, external_id = ?2, updated_at = ?3
               WHERE id = ?4"#,
            params![client_id, external_id, now, download_id],
        )?;
        let moved = tx.execute(
            r#"UPDATE requests SET status = 'downloading', attention_needed = 0,
               issue_description = NULL, updated_at = ?1
               WHERE id = ?2 AND status = 'searching'"#,
            params![now, request_id],
        )?;

        tx.commit()?;
        Ok(moved == 1)
    }

    fn update_download_progress(&self, id: &str, progress: u8) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!(
                r#"UPDATE downloads SET progress = ?1, status = 'downloading', updated_at = ?2
                   WHERE id = ?3 AND status IN {}"#,
                ACTIVE_DOWNLOAD_STATUSES
            ),
            params![progress.min(100) as i64, Self::now(), id],
        )?;
        Ok(updated == 1)
    }

    fn complete_download(&self, id: &str, download_path: Option<&str>) -> Result<bool> {
        let now = Self::now();
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!(
                r#"UPDATE downloads SET status = 'completed', progress = 100,
                   download_path = COALESCE(?1, download_path), completed_at = ?2, updated_at = ?2
                   WHERE id = ?3 AND status IN {}"#,
                ACTIVE_DOWNLOAD_STATUSES
            ),
            params![download_path, now, id],
        )?;
        Ok(updated == 1)
    }

    fn fail_download(&self, id: &str, message: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!(
                r#"UPDATE downloads SET status = 'failed', error_message = ?1, updated_at = ?2
                   WHERE id = ?3 AND status IN {}"#,
                ACTIVE_DOWNLOAD_STATUSES
            ),
            params![message, Self::now(), id],
        )?;
        Ok(updated == 1)
    }

    fn latest_completed_download(&self, request_id: &str) -> Result<Option<Download>> {
        let conn = self.conn()?;
        let download = conn
            .query_row(
                r#"SELECT * FROM downloads WHERE request_id = ?1 AND status = 'completed'
                   ORDER BY completed_at DESC, rowid DESC LIMIT 1"#,
                [request_id],
                Self::row_to_download,
            )
            .optional()?;
        Ok(download)
    }

    // === Download clients ===

    fn sync_download_clients(&self, clients: &[DownloadClientRecord]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("UPDATE download_clients SET enabled = 0", [])?;
        for client in clients {
            tx.execute(
                r#"INSERT INTO download_clients (
                    id, name, client_type, download_type, url, category, priority,
                    enabled, remote_path, local_path, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    client_type = excluded.client_type,
                    download_type = excluded.download_type,
                    url = excluded.url,
                    category = excluded.category,
                    priority = excluded.priority,
                    enabled = excluded.enabled,
                    remote_path = excluded.remote_path,
                    local_path = excluded.local_path,
                    updated_at = excluded.updated_at"#,
                params![
                    client.id,
                    client.name,
                    client.client_type.as_str(),
                    client.download_type.as_str(),
                    client.url,
                    client.category,
                    client.priority,
                    client.enabled as i64,
                    client.remote_path,
                    client.local_path,
                    client.updated_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn list_download_clients(&self) -> Result<Vec<DownloadClientRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM download_clients ORDER BY priority ASC, name ASC")?;
        let clients = stmt
            .query_map([], Self::row_to_client)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(clients)
    }

    // === Health ===

    fn upsert_health(&self, health: &SystemHealth) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO system_health (service, status, message, last_check_at, last_success_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(service) DO UPDATE SET
                   status = excluded.status,
                   message = excluded.message,
                   last_check_at = excluded.last_check_at,
                   last_success_at = COALESCE(excluded.last_success_at, system_health.last_success_at)"#,
            params![
                health.service,
                health.status.as_str(),
                health.message,
                health.last_check_at,
                health.last_success_at,
            ],
        )?;
        Ok(())
    }

    fn get_health(&self, service: &str) -> Result<Option<SystemHealth>> {
        let conn = self.conn()?;
        let health = conn
            .query_row(
                "SELECT * FROM system_health WHERE service = ?1",
                [service],
                Self::row_to_health,
            )
            .optional()?;
        Ok(health)
    }

    fn list_health(&self) -> Result<Vec<SystemHealth>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM system_health ORDER BY service ASC")?;
        let rows = stmt
            .query_map([], Self::row_to_health)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
