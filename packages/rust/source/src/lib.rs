//! Document text extraction.
//!
//! A [`DocumentTextSource`] turns a paper file into plain text plus the page
//! and question boundaries found in it. [`FileTextSource`] handles plain-text
//! and PDF files, with an optional external OCR fallback for scanned PDFs.

mod boundaries;
mod cleanup;
mod file;

use std::ops::Range;
use std::path::Path;

use async_trait::async_trait;
use paperconcepts_shared::Result;

pub use boundaries::detect_questions;
pub use file::FileTextSource;

/// What a boundary delimits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    Page,
    Question,
}

/// A labelled byte range of the document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBoundary {
    /// `page N` or `qNN`.
    pub label: String,
    pub range: Range<usize>,
    pub kind: BoundaryKind,
}

/// Extracted text of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentText {
    pub text: String,
    /// Ordered by range start.
    pub boundaries: Vec<TextBoundary>,
}

impl DocumentText {
    /// Text with no boundaries.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            boundaries: Vec::new(),
        }
    }

    /// Build from per-page texts joined by blank lines, recording page and
    /// question boundaries. Empty pages keep their number but add no text.
    pub fn from_pages<S: AsRef<str>>(pages: &[S]) -> Self {
        let mut text = String::new();
        let mut boundaries = Vec::new();

        for (i, page) in pages.iter().enumerate() {
            let page = page.as_ref();
            if page.trim().is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            let start = text.len();
            text.push_str(page);
            boundaries.push(TextBoundary {
                label: format!("page {}", i + 1),
                range: start..text.len(),
                kind: BoundaryKind::Page,
            });
        }

        boundaries.extend(detect_questions(&text));
        boundaries.sort_by_key(|b| (b.range.start, b.kind == BoundaryKind::Question));
        Self { text, boundaries }
    }

    /// Whether the document has no text to analyze.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// The innermost question label containing byte `offset`.
    pub fn label_at(&self, offset: usize) -> Option<&str> {
        self.boundaries
            .iter()
            .filter(|b| b.kind == BoundaryKind::Question && b.range.contains(&offset))
            .min_by_key(|b| b.range.len())
            .map(|b| b.label.as_str())
    }

    /// The question label covering most of `range`, used for a whole segment.
    pub fn dominant_label(&self, range: Range<usize>) -> Option<&str> {
        self.boundaries
            .iter()
            .filter(|b| b.kind == BoundaryKind::Question)
            .map(|b| {
                let overlap = b.range.end.min(range.end).saturating_sub(b.range.start.max(range.start));
                (overlap, b)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .max_by_key(|(overlap, b)| (*overlap, std::cmp::Reverse(b.range.start)))
            .map(|(_, b)| b.label.as_str())
    }
}

/// Produces plain text and boundaries for a document file.
#[async_trait]
pub trait DocumentTextSource: Send + Sync {
    /// Fails with `ExtractionUnavailable` when no method, OCR included,
    /// yields text.
    async fn extract(&self, path: &Path) -> Result<DocumentText>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_and_questions() {
        let doc = DocumentText::from_pages(&[
            "Question 1\nDescribe a Turing machine.",
            "",
            "Question 2\nExplain TCP congestion control.",
        ]);

        let pages: Vec<_> = doc
            .boundaries
            .iter()
            .filter(|b| b.kind == BoundaryKind::Page)
            .map(|b| b.label.as_str())
            .collect();
        assert_eq!(pages, vec!["page 1", "page 3"]);

        let turing = doc.text.find("Turing").expect("present");
        let tcp = doc.text.find("TCP").expect("present");
        assert_eq!(doc.label_at(turing), Some("q01"));
        assert_eq!(doc.label_at(tcp), Some("q02"));
        assert_eq!(doc.dominant_label(0..doc.text.len()), Some("q02"));
    }

    #[test]
    fn plain_text_has_no_labels() {
        let doc = DocumentText::plain("just text");
        assert_eq!(doc.label_at(2), None);
        assert!(!doc.is_empty());
        assert!(DocumentText::plain(" \n ").is_empty());
    }
}
