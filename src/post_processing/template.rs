//! Destination naming from `{placeholder}` templates.

use crate::store::Book;
use regex::Regex;
use std::path::PathBuf;
use unicode_segmentation::UnicodeSegmentation;

pub const PLACEHOLDERS: [&str; 5] = ["author", "title", "year", "publisher", "language"];

const FORBIDDEN: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Check a template at settings load time. `allow_dirs` permits `/`
/// separated components (path template); filenames must be one component.
pub fn validate_template(template: &str, allow_dirs: bool) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("template is empty".to_string());
    }
    let placeholder = Regex::new(r"\{([^{}]*)\}").map_err(|e| e.to_string())?;
    let mut used = 0;
    for captures in placeholder.captures_iter(template) {
        let name = &captures[1];
        if !PLACEHOLDERS.contains(&name) {
            return Err(format!(
                "unknown placeholder {{{}}}, expected one of {}",
                name,
                PLACEHOLDERS.join(", ")
            ));
        }
        used += 1;
    }
    let stripped = placeholder.replace_all(template, "");
    if stripped.contains('{') || stripped.contains('}') {
        return Err("unbalanced braces".to_string());
    }
    if used == 0 {
        return Err("template uses no placeholder".to_string());
    }

    if template.contains('\\') {
        return Err("use '/' to separate directories".to_string());
    }
    if !allow_dirs && template.contains('/') {
        return Err("filename template must not contain '/'".to_string());
    }
    if template.starts_with('/') {
        return Err("template must be relative to the output root".to_string());
    }
    if template.split('/').any(|c| c.trim() == ".." || c.trim() == ".") {
        return Err("template must not contain '.' or '..' components".to_string());
    }
    Ok(())
}

/// Placeholder values for one book, with labeled fallbacks for the gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValues {
    pub author: String,
    pub title: String,
    pub year: String,
    pub publisher: String,
    pub language: String,
}

fn or_label(value: Option<&str>, label: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(label)
        .to_string()
}

impl TemplateValues {
    pub fn from_book(book: &Book) -> Self {
        Self {
            author: or_label(book.author.as_deref(), "Unknown Author"),
            title: or_label(Some(&book.title), "Unknown Title"),
            year: or_label(book.year.map(|y| y.to_string()).as_deref(), "Unknown Year"),
            publisher: or_label(book.publisher.as_deref(), "Unknown Publisher"),
            language: or_label(book.language.as_deref(), "Unknown Language"),
        }
    }

    fn get(&self, name: &str) -> &str {
        match name {
            "author" => &self.author,
            "title" => &self.title,
            "year" => &self.year,
            "publisher" => &self.publisher,
            "language" => &self.language,
            _ => "",
        }
    }
}

/// Strip characters no common filesystem accepts, collapse whitespace and
/// cap the result at `max_len` graphemes.
pub fn sanitize_component(value: &str, max_len: usize) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.graphemes(true).take(max_len).collect();
    // Windows and SMB shares reject trailing dots and spaces
    capped
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_start_matches('.')
        .to_string()
}

fn render_component(component: &str, values: &TemplateValues, max_len: usize) -> String {
    let mut rendered = component.to_string();
    for name in PLACEHOLDERS {
        let value = sanitize_component(values.get(name), max_len);
        rendered = rendered.replace(&format!("{{{}}}", name), &value);
    }
    sanitize_component(&rendered, max_len)
}

/// Relative directory for a delivery. Components that render empty are
/// dropped; an entirely empty result falls back to the title.
pub fn render_path(template: &str, values: &TemplateValues, max_len: usize) -> PathBuf {
    let mut path = PathBuf::new();
    for component in template.split('/') {
        let rendered = render_component(component, values, max_len);
        if !rendered.is_empty() {
            path.push(rendered);
        }
    }
    if path.as_os_str().is_empty() {
        path.push(fallback_name(values, max_len));
    }
    path
}

/// File stem (no extension) for a single-file delivery.
pub fn render_filename(template: &str, values: &TemplateValues, max_len: usize) -> String {
    let rendered = render_component(template, values, max_len);
    if rendered.is_empty() {
        fallback_name(values, max_len)
    } else {
        rendered
    }
}

fn fallback_name(values: &TemplateValues, max_len: usize) -> String {
    let title = sanitize_component(&values.title, max_len);
    if title.is_empty() {
        "Unknown Title".to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::book_titled;

    #[test]
    fn test_validate_template() {
        assert!(validate_template("{author}/{title}", true).is_ok());
        assert!(validate_template("{author} - {title} ({year})", false).is_ok());

        assert!(validate_template("", true).is_err());
        assert!(validate_template("{author}/{title}", false).is_err());
        assert!(validate_template("{author}/{isbn}", true).unwrap_err().contains("isbn"));
        assert!(validate_template("{author/{title}", true).is_err());
        assert!(validate_template("/abs/{title}", true).is_err());
        assert!(validate_template("{author}/../{title}", true).is_err());
        assert!(validate_template("static", true).is_err());
    }

    #[test]
    fn test_sanitize_strips_forbidden_and_caps_graphemes() {
        assert_eq!(sanitize_component("AC/DC: Live?", 50), "AC DC Live");
        assert_eq!(sanitize_component("tab\there\u{7}", 50), "tab here");
        assert_eq!(sanitize_component("Trailing dots...", 50), "Trailing dots");
        // a family emoji is one grapheme made of several code points
        let capped = sanitize_component("ab👨‍👩‍👧cd", 3);
        assert_eq!(capped, "ab👨‍👩‍👧");
    }

    #[test]
    fn test_render_uses_labeled_fallbacks() {
        let mut book = book_titled("b1", "Solaris", None);
        book.year = Some(1961);
        let values = TemplateValues::from_book(&book);

        assert_eq!(
            render_path("{author}/{title} ({year})", &values, 100),
            PathBuf::from("Unknown Author/Solaris (1961)")
        );
        assert_eq!(
            render_filename("{title} - {publisher}", &values, 100),
            "Solaris - Unknown Publisher"
        );
    }

    #[test]
    fn test_render_sanitizes_values() {
        let book = book_titled("b1", "Who/What: A <Story>", Some("A. Author"));
        let values = TemplateValues::from_book(&book);
        assert_eq!(
            render_path("{author}/{title}", &values, 100),
            PathBuf::from("A. Author/Who What A Story")
        );
    }
}
