//! Trigram similarity used to match uploads that carry no provider id.

use crate::store::Book;
use std::collections::HashSet;

/// Combined score at or above which two books are the same.
pub const SAME_BOOK_THRESHOLD: f64 = 95.0;
/// Combined score at or above which a book is offered for reuse.
pub const FUZZY_MATCH_THRESHOLD: f64 = 70.0;

const TITLE_WEIGHT: f64 = 0.6;
const AUTHOR_WEIGHT: f64 = 0.4;

fn normalize(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word trigrams padded like pg_trgm: two leading spaces, one trailing.
fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let mut set = HashSet::new();
    for word in normalize(text).split(' ').filter(|w| !w.is_empty()) {
        let padded: Vec<char> = "  ".chars().chain(word.chars()).chain(" ".chars()).collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }
    set
}

/// Jaccard similarity of trigram sets, 0-100.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return if normalize(a) == normalize(b) { 100.0 } else { 0.0 };
    }
    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union == 0.0 {
        return 0.0;
    }
    shared / union * 100.0
}

/// Weighted title/author score, 0-100. Without authors on either side only
/// the title counts.
pub fn book_score(title: &str, author: Option<&str>, book: &Book) -> f64 {
    let title_score = similarity(title, &book.title);
    match (author, book.author.as_deref()) {
        (None, None) => title_score,
        (Some(a), Some(b)) => TITLE_WEIGHT * title_score + AUTHOR_WEIGHT * similarity(a, b),
        _ => TITLE_WEIGHT * title_score,
    }
}

/// Best match for an incoming title/author among existing books.
#[derive(Debug, Clone, PartialEq)]
pub enum BookMatch {
    Same { book: Book, score: f64 },
    Fuzzy { book: Book, score: f64 },
    NoMatch,
}

pub fn find_match(title: &str, author: Option<&str>, books: &[Book]) -> BookMatch {
    let best = books
        .iter()
        .map(|book| (book, book_score(title, author, book)))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    match best {
        Some((book, score)) if score >= SAME_BOOK_THRESHOLD => BookMatch::Same {
            book: book.clone(),
            score,
        },
        Some((book, score)) if score >= FUZZY_MATCH_THRESHOLD => BookMatch::Fuzzy {
            book: book.clone(),
            score,
        },
        _ => BookMatch::NoMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::book_titled;

    #[test]
    fn test_identical_after_normalization() {
        assert_eq!(similarity("The Hobbit!", "the   hobbit"), 100.0);
        assert_eq!(similarity("", ""), 100.0);
        assert_eq!(similarity("Dune", ""), 0.0);
    }

    #[test]
    fn test_similarity_is_symmetric_and_bounded() {
        let a = similarity("Foundation and Empire", "Foundation & Empire");
        let b = similarity("Foundation & Empire", "Foundation and Empire");
        assert_eq!(a, b);
        assert!(a > 50.0 && a < 100.0);
        assert!(similarity("Dune", "Neuromancer") < 20.0);
    }

    #[test]
    fn test_find_match_thresholds() {
        let books = vec![
            book_titled("b1", "The Name of the Wind", Some("Patrick Rothfuss")),
            book_titled("b2", "Dune", Some("Frank Herbert")),
        ];

        match find_match("The Name of the Wind", Some("Patrick Rothfuss"), &books) {
            BookMatch::Same { book, .. } => assert_eq!(book.id, "b1"),
            other => panic!("expected same book, got {:?}", other),
        }

        // shortened author name lands between the two thresholds
        match find_match("The Name of the Wind", Some("Pat Rothfuss"), &books) {
            BookMatch::Fuzzy { book, score } => {
                assert_eq!(book.id, "b1");
                assert!(score >= FUZZY_MATCH_THRESHOLD && score < SAME_BOOK_THRESHOLD);
            }
            other => panic!("expected fuzzy match, got {:?}", other),
        }

        assert_eq!(
            find_match("Hyperion", Some("Dan Simmons"), &books),
            BookMatch::NoMatch
        );
    }
}
