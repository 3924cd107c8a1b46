use crate::store::Book;

const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("de", "German"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("nl", "Dutch"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("sv", "Swedish"),
    ("zh", "Chinese"),
];

/// English name indexers recognize for an ISO 639-1 code.
pub fn language_name(code: &str) -> Option<&'static str> {
    let primary = primary_subtag(code);
    LANGUAGE_NAMES
        .iter()
        .find(|(c, _)| *c == primary)
        .map(|(_, name)| *name)
}

/// `en-US` and `en_gb` are both `en`.
fn primary_subtag(code: &str) -> String {
    let code = code.trim().to_ascii_lowercase();
    code.split(['-', '_']).next().unwrap_or_default().to_string()
}

/// Title and author, plus the language name when the effective language
/// differs from the default and has a recognized name.
pub fn build_query(book: &Book, request_language: Option<&str>, default_language: &str) -> String {
    let mut parts = vec![book.title.trim().to_string()];
    if let Some(author) = book.author.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        parts.push(author.to_string());
    }

    let effective = request_language
        .or(book.language.as_deref())
        .unwrap_or(default_language);
    if primary_subtag(effective) != primary_subtag(default_language) {
        if let Some(name) = language_name(effective) {
            parts.push(name.to_string());
        }
    }
    parts.join(" ")
}
