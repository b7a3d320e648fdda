//! Core data models used throughout ragdesk.
//!
//! These types represent the text units, chunks, and retrieval results that
//! flow through the ingestion and question-answering pipeline.

use serde::Serialize;

/// One logical unit of text extracted from a source file: a PDF page, a CSV
/// row, or a whole markdown/text/docx file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    /// Originating file name (provenance shown to the user).
    pub source: String,
    /// Position inside the source, e.g. `page 3` or `row 12`.
    pub locator: Option<String>,
    pub text: String,
}

impl TextUnit {
    pub fn whole(source: &str, text: String) -> Self {
        Self {
            source: source.to_string(),
            locator: None,
            text,
        }
    }
}

/// A bounded slice of a [`TextUnit`], the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub locator: Option<String>,
    /// Index of the chunk within its text unit.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned from the vector index, in ranked order.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub source: String,
    pub locator: Option<String>,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

impl RetrievedChunk {
    /// `file.pdf (page 2)` or just `notes.md`.
    pub fn label(&self) -> String {
        match &self.locator {
            Some(loc) => format!("{} ({})", self.source, loc),
            None => self.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_includes_locator() {
        let mut c = RetrievedChunk {
            id: "1".into(),
            source: "guide.pdf".into(),
            locator: Some("page 2".into()),
            text: "x".into(),
            score: 0.5,
        };
        assert_eq!(c.label(), "guide.pdf (page 2)");
        c.locator = None;
        assert_eq!(c.label(), "guide.pdf");
    }
}
