//! Recursive boundary-aware text chunker.
//!
//! Splits text units into [`Chunk`]s of at most `chunk_size` characters.
//! Splitting prefers paragraph boundaries (`\n\n`), then line breaks, then
//! sentence ends (`. `), then spaces, and finally falls back to single
//! characters. Adjacent chunks from the same unit share a trailing/leading
//! region of at most `chunk_overlap` characters.
//!
//! Separators stay attached to the piece they end, so every chunk is a
//! trimmed, contiguous substring of its unit. Chunk IDs are UUIDv5 values
//! derived from the chunk's position, and each chunk carries a SHA-256 hash
//! of its text. The same input always yields the same chunks.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, TextUnit};

/// Split points in order of preference. `""` splits into characters.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// `chunk_overlap` is clamped below `chunk_size`; a zero size is treated as 1.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split one text into trimmed, non-empty chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Split every unit, stamping each chunk with its unit's provenance.
    pub fn split_units(&self, units: &[TextUnit]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for (unit_index, unit) in units.iter().enumerate() {
            for (i, text) in self.split_text(&unit.text).into_iter().enumerate() {
                chunks.push(make_chunk(unit, unit_index, i as i64, text));
            }
        }
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let sep_idx = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(sep_idx).copied().unwrap_or("");
        let remaining = separators.get(sep_idx + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split_inclusive(separator).collect()
        };

        let mut out = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(&fitting));
                fitting.clear();
            }
            if remaining.is_empty() {
                push_trimmed(&mut out, piece);
            } else {
                out.extend(self.split_recursive(piece, remaining));
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(&fitting));
        }
        out
    }

    /// Greedily pack pieces into chunks, carrying a tail of at most
    /// `chunk_overlap` characters into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut out, &window.iter().copied().collect::<String>());
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size)
                {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(&mut out, &window.iter().copied().collect::<String>());
        }
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_trimmed(out: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn make_chunk(unit: &TextUnit, unit_index: usize, index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let key = format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}",
        unit.source,
        unit.locator.as_deref().unwrap_or(""),
        unit_index,
        index
    );

    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string(),
        source: unit.source.clone(),
        locator: unit.locator.clone(),
        chunk_index: index,
        text,
        hash,
    }
}
