// ABOUTME: The note-gallery value: a trimmed excerpt of each note plus its session-only HTML slot.
// ABOUTME: NoteExtractor derives it from markdown and strips any rendering when loading from disk.

use async_trait::async_trait;
use notecache_core::extract::{ExtractionError, ValueExtractor};
use notecache_core::source::SourceItem;
use serde::{Deserialize, Serialize};

/// Body lines kept in an excerpt, not counting front matter.
pub const LINES_TO_KEEP: usize = 30;

const FRONT_MATTER_DELIMITER: &str = "---";

/// Cached excerpt of one note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEntry {
    /// The first body lines, front matter removed.
    pub text: Option<String>,
    /// Front matter followed by `text`.
    pub markdown: Option<String>,
    /// HTML filled in by whatever renders the gallery. Only valid for the
    /// current session.
    #[serde(rename = "innerHTML")]
    pub inner_html: Option<String>,
    pub has_markdown: bool,
    pub rendered: bool,
}

impl NoteEntry {
    /// Build an excerpt from a note's full markdown content.
    pub fn excerpt(content: &str) -> Self {
        let (front_matter, body) = split_front_matter(content);
        let text = body
            .lines()
            .take(LINES_TO_KEEP)
            .collect::<Vec<_>>()
            .join("\n");
        let markdown = [front_matter, text.as_str()].join("\n").trim().to_string();

        Self {
            text: Some(text),
            markdown: Some(markdown),
            inner_html: None,
            has_markdown: true,
            rendered: false,
        }
    }

    /// Attach a rendering produced by the gallery.
    pub fn with_rendering(self, inner_html: impl Into<String>) -> Self {
        Self {
            inner_html: Some(inner_html.into()),
            rendered: true,
            ..self
        }
    }

    /// Drop the session-only rendering.
    pub fn without_rendering(self) -> Self {
        if self.inner_html.is_none() && !self.rendered {
            return self;
        }
        Self {
            inner_html: None,
            rendered: false,
            ..self
        }
    }
}

/// Split off a leading `---` delimited block. A block that is never closed
/// is treated as body text.
fn split_front_matter(content: &str) -> (&str, &str) {
    if let Some(rest) = content.strip_prefix(FRONT_MATTER_DELIMITER) {
        if let Some(end) = rest.find(FRONT_MATTER_DELIMITER) {
            let close = FRONT_MATTER_DELIMITER.len() * 2 + end;
            return (content[..close].trim(), content[close..].trim());
        }
    }
    ("", content)
}

/// Derives NoteEntry values for the note-gallery render store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoteExtractor;

#[async_trait]
impl ValueExtractor<NoteEntry> for NoteExtractor {
    fn default_value(&self) -> NoteEntry {
        NoteEntry::default()
    }

    async fn extract_value(
        &self,
        content: &str,
        _item: &SourceItem,
    ) -> Result<NoteEntry, ExtractionError> {
        Ok(NoteEntry::excerpt(content))
    }

    fn load_value(&self, value: NoteEntry) -> NoteEntry {
        value.without_rendering()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_keeps_front_matter_and_first_lines() {
        let body: Vec<String> = (1..=40).map(|i| format!("line {i}")).collect();
        let content = format!("---\ntags: [a, b]\n---\n{}", body.join("\n"));

        let entry = NoteEntry::excerpt(&content);

        let text = entry.text.unwrap();
        assert_eq!(text.lines().count(), LINES_TO_KEEP);
        assert!(text.starts_with("line 1\n"));
        assert!(text.ends_with("line 30"));

        let markdown = entry.markdown.unwrap();
        assert!(markdown.starts_with("---\ntags: [a, b]\n---\nline 1"));
        assert!(!markdown.contains("line 31"));
        assert!(entry.has_markdown);
        assert!(!entry.rendered);
    }

    #[test]
    fn excerpt_without_front_matter() {
        let entry = NoteEntry::excerpt("# Title\n\nSome body.");
        assert_eq!(entry.text.as_deref(), Some("# Title\n\nSome body."));
        assert_eq!(entry.markdown.as_deref(), Some("# Title\n\nSome body."));
    }

    #[test]
    fn unclosed_front_matter_is_body() {
        let entry = NoteEntry::excerpt("---\nnot closed\nbody");
        assert_eq!(entry.text.as_deref(), Some("---\nnot closed\nbody"));
    }

    #[test]
    fn empty_note_has_empty_excerpt() {
        let entry = NoteEntry::excerpt("");
        assert_eq!(entry.text.as_deref(), Some(""));
        assert_eq!(entry.markdown.as_deref(), Some(""));
        assert!(entry.has_markdown);
    }

    #[test]
    fn load_strips_rendering() {
        let entry = NoteEntry::excerpt("---\ntitle: x\n---\n# Heading")
            .with_rendering("<h1>Heading</h1>");
        assert!(entry.rendered);

        let loaded = NoteExtractor.load_value(entry.clone());
        assert!(loaded.inner_html.is_none());
        assert!(!loaded.rendered);
        assert_eq!(loaded.markdown, entry.markdown);
    }

    #[test]
    fn default_value_has_no_markdown() {
        let entry = NoteExtractor.default_value();
        assert!(!entry.has_markdown);
        assert!(entry.text.is_none());
        assert!(!entry.rendered);
    }

    #[test]
    fn load_leaves_unrendered_entries_alone() {
        let entry = NoteEntry::excerpt("plain");
        assert_eq!(NoteExtractor.load_value(entry.clone()), entry);
    }

    #[test]
    fn entries_serialize_camel_case() {
        let json = serde_json::to_value(NoteEntry::excerpt("hi")).unwrap();
        assert_eq!(json["hasMarkdown"], true);
        assert!(json["innerHTML"].is_null());
        assert_eq!(json["text"], "hi");
    }
}
