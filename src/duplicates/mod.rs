//! Duplicate and edition checks run before a request is created.

mod similarity;

pub use similarity::{
    book_score, find_match, similarity, BookMatch, FUZZY_MATCH_THRESHOLD, SAME_BOOK_THRESHOLD,
};

use crate::store::{AcquisitionStore, Book, BookType, Request, RequestStatus};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

/// Non-terminal statuses. A `not_found` request is still retrying and
/// blocks a second request for the same work and format.
const IN_FLIGHT: [RequestStatus; 5] = [
    RequestStatus::Pending,
    RequestStatus::Searching,
    RequestStatus::NotFound,
    RequestStatus::Downloading,
    RequestStatus::Processing,
];

/// What the caller wants to acquire.
#[derive(Debug, Clone, PartialEq)]
pub struct BookIdentity {
    pub title: String,
    pub author: Option<String>,
    pub book_type: BookType,
    pub work_id: Option<String>,
    pub edition_id: Option<String>,
}

impl From<&Book> for BookIdentity {
    fn from(book: &Book) -> Self {
        Self {
            title: book.title.clone(),
            author: book.author.clone(),
            book_type: book.book_type,
            work_id: book.work_id.clone(),
            edition_id: book.edition_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    Allow,
    /// Allowed, with a message shown to the requester.
    Warn(String),
    Block(String),
}

impl DuplicateCheck {
    pub fn is_blocked(&self) -> bool {
        matches!(self, DuplicateCheck::Block(_))
    }
}

pub struct DuplicateDetector {
    store: Arc<dyn AcquisitionStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn AcquisitionStore>) -> Self {
        Self { store }
    }

    pub fn check(&self, identity: &BookIdentity) -> Result<DuplicateCheck> {
        let Some(work_id) = identity.work_id.as_deref() else {
            return self.check_by_title(identity);
        };
        let book_type = identity.book_type;

        if let Some(edition_id) = identity.edition_id.as_deref() {
            if let Some(book) = self.store.find_book_by_edition(edition_id, book_type)? {
                if book.is_acquired() {
                    return Ok(DuplicateCheck::Block(format!(
                        "This edition of '{}' is already in the library as an {}",
                        book.title, book_type
                    )));
                }
            }
        }

        if let Some(book) = self.store.find_book_by_work(work_id, book_type)? {
            if book.is_acquired() {
                return Ok(DuplicateCheck::Block(format!(
                    "'{}' is already in the library as an {}",
                    book.title, book_type
                )));
            }
        }

        let requests = self.store.requests_for_work(work_id, book_type)?;
        if let Some(active) = requests.iter().find(|r| IN_FLIGHT.contains(&r.status)) {
            return Ok(DuplicateCheck::Block(format!(
                "An {} request for this book is already {}",
                book_type, active.status
            )));
        }

        if let Some(other) = self.store.find_book_by_work(work_id, book_type.other())? {
            if other.is_acquired() {
                return Ok(DuplicateCheck::Warn(format!(
                    "'{}' is already in the library as an {}",
                    other.title,
                    book_type.other()
                )));
            }
        }

        Ok(prior_attempt_warning(&requests).unwrap_or(DuplicateCheck::Allow))
    }

    /// Books without a provider work id are matched by title and author.
    fn check_by_title(&self, identity: &BookIdentity) -> Result<DuplicateCheck> {
        let books = self.store.list_books(Some(identity.book_type))?;
        match find_match(&identity.title, identity.author.as_deref(), &books) {
            BookMatch::Same { book, score } => {
                debug!("'{}' matches existing book {} ({:.1})", identity.title, book.id, score);
                if book.is_acquired() {
                    return Ok(DuplicateCheck::Block(format!(
                        "'{}' is already in the library as an {}",
                        book.title, book.book_type
                    )));
                }
                let requests = self.store.requests_for_book(&book.id)?;
                if let Some(active) = requests.iter().find(|r| IN_FLIGHT.contains(&r.status)) {
                    return Ok(DuplicateCheck::Block(format!(
                        "A request for '{}' is already {}",
                        book.title, active.status
                    )));
                }
                Ok(prior_attempt_warning(&requests).unwrap_or(DuplicateCheck::Allow))
            }
            BookMatch::Fuzzy { book, score } => Ok(DuplicateCheck::Warn(format!(
                "Similar book already known: '{}'{} ({:.0}% match)",
                book.title,
                book.author
                    .as_deref()
                    .map(|a| format!(" by {}", a))
                    .unwrap_or_default(),
                score
            ))),
            BookMatch::NoMatch => Ok(DuplicateCheck::Allow),
        }
    }

    /// Existing book to attach a new request to, if any.
    pub fn resolve_book(&self, identity: &BookIdentity) -> Result<Option<Book>> {
        if let Some(work_id) = identity.work_id.as_deref() {
            if let Some(edition_id) = identity.edition_id.as_deref() {
                if let Some(book) = self.store.find_book_by_edition(edition_id, identity.book_type)? {
                    return Ok(Some(book));
                }
            }
            return self.store.find_book_by_work(work_id, identity.book_type);
        }
        let books = self.store.list_books(Some(identity.book_type))?;
        Ok(match find_match(&identity.title, identity.author.as_deref(), &books) {
            BookMatch::Same { book, .. } => Some(book),
            _ => None,
        })
    }
}

fn prior_attempt_warning(requests: &[Request]) -> Option<DuplicateCheck> {
    requests
        .iter()
        .any(|r| r.status == RequestStatus::Failed)
        .then(|| {
            DuplicateCheck::Warn("A previous request for this book failed; requesting again".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteAcquisitionStore;
    use crate::test_support::{book_for_work, book_titled};

    fn detector() -> (Arc<SqliteAcquisitionStore>, DuplicateDetector) {
        let store = Arc::new(SqliteAcquisitionStore::in_memory().unwrap());
        let detector = DuplicateDetector::new(store.clone());
        (store, detector)
    }

    fn identity(work: &str, edition: Option<&str>, book_type: BookType) -> BookIdentity {
        BookIdentity {
            title: "The Dispossessed".into(),
            author: Some("Ursula K. Le Guin".into()),
            book_type,
            work_id: Some(work.into()),
            edition_id: edition.map(String::from),
        }
    }

    #[test]
    fn test_fresh_work_is_allowed() {
        let (_, detector) = detector();
        assert_eq!(
            detector.check(&identity("W1", None, BookType::Audiobook)).unwrap(),
            DuplicateCheck::Allow
        );
    }

    #[test]
    fn test_acquired_edition_and_work_block() {
        let (store, detector) = detector();
        let mut book = book_for_work("b1", "W1", BookType::Ebook);
        book.edition_id = Some("E1".into());
        book.file_path = Some("/library/ebooks/x.epub".into());
        store.insert_book(&book).unwrap();

        assert!(detector
            .check(&identity("W1", Some("E1"), BookType::Ebook))
            .unwrap()
            .is_blocked());
        // different edition of the same acquired work still blocks
        assert!(detector
            .check(&identity("W1", Some("E2"), BookType::Ebook))
            .unwrap()
            .is_blocked());
    }

    #[test]
    fn test_other_format_acquired_warns() {
        let (store, detector) = detector();
        let mut book = book_for_work("b1", "W1", BookType::Ebook);
        book.file_path = Some("/library/ebooks/x.epub".into());
        store.insert_book(&book).unwrap();

        let check = detector.check(&identity("W1", None, BookType::Audiobook)).unwrap();
        assert!(matches!(check, DuplicateCheck::Warn(m) if m.contains("ebook")));
    }

    #[test]
    fn test_in_flight_request_blocks_and_prior_failure_warns() {
        let (store, detector) = detector();
        store.insert_book(&book_for_work("b1", "W1", BookType::Ebook)).unwrap();
        let request = Request::new("b1", "user", None, 10);
        store.insert_request(&request).unwrap();
        assert!(detector
            .check(&identity("W1", None, BookType::Ebook))
            .unwrap()
            .is_blocked());

        store.mark_failed(&request.id, "disk full").unwrap();
        let check = detector.check(&identity("W1", None, BookType::Ebook)).unwrap();
        assert!(matches!(check, DuplicateCheck::Warn(m) if m.contains("failed")));
    }

    #[test]
    fn test_not_found_request_blocks_second_request() {
        let (store, detector) = detector();
        store.insert_book(&book_for_work("b1", "W1", BookType::Ebook)).unwrap();
        let request = Request::new("b1", "user", None, 10);
        store.insert_request(&request).unwrap();
        let claimed = store.claim_pending(1, 20).unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(store.mark_not_found(&request.id, 86_400 + 30).unwrap());

        let check = detector.check(&identity("W1", None, BookType::Ebook)).unwrap();
        assert!(
            matches!(check, DuplicateCheck::Block(ref m) if m.contains("not_found")),
            "{:?}",
            check
        );
        // the other format is unaffected
        assert_eq!(
            detector.check(&identity("W1", None, BookType::Audiobook)).unwrap(),
            DuplicateCheck::Allow
        );
    }

    #[test]
    fn test_title_matching_without_work_id() {
        let (store, detector) = detector();
        let mut acquired = book_titled("b1", "Hyperion", Some("Dan Simmons"));
        acquired.file_path = Some("/library/ebooks/hyperion.epub".into());
        store.insert_book(&acquired).unwrap();

        let same = BookIdentity {
            title: "Hyperion".into(),
            author: Some("Dan Simmons".into()),
            book_type: BookType::Ebook,
            work_id: None,
            edition_id: None,
        };
        assert!(detector.check(&same).unwrap().is_blocked());
        assert_eq!(detector.resolve_book(&same).unwrap().map(|b| b.id), Some("b1".to_string()));

        let unrelated = BookIdentity {
            title: "Snow Crash".into(),
            author: Some("Neal Stephenson".into()),
            ..same
        };
        assert_eq!(detector.check(&unrelated).unwrap(), DuplicateCheck::Allow);
        assert_eq!(detector.resolve_book(&unrelated).unwrap(), None);
    }
}
