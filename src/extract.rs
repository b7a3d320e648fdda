//! Per-format text extraction.
//!
//! Turns the raw bytes of one source file into [`TextUnit`]s. The format is
//! chosen solely by file extension from a closed set; everything else is
//! unsupported. Extraction never panics: malformed input yields an
//! [`ExtractError`] and the loader skips that file.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::models::TextUnit;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Csv,
    Markdown,
    Text,
    Docx,
}

impl DocumentFormat {
    /// Resolve the format from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "csv" => Some(Self::Csv),
            "md" => Some(Self::Markdown),
            "txt" => Some(Self::Text),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Markdown => "md",
            Self::Text => "txt",
            Self::Docx => "docx",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("CSV parsing failed: {0}")]
    Csv(String),
    #[error("no text content found")]
    Empty,
}

/// Extract the text units of one file.
///
/// Every returned unit carries `source` as its provenance. An `Ok` result is
/// never empty.
pub fn extract_units(
    source: &str,
    format: DocumentFormat,
    bytes: &[u8],
) -> Result<Vec<TextUnit>, ExtractError> {
    let units = match format {
        DocumentFormat::Pdf => extract_pdf(source, bytes)?,
        DocumentFormat::Csv => extract_csv(source, bytes)?,
        DocumentFormat::Markdown | DocumentFormat::Text => {
            vec![TextUnit::whole(
                source,
                String::from_utf8_lossy(bytes).into_owned(),
            )]
        }
        DocumentFormat::Docx => vec![TextUnit::whole(source, extract_docx(bytes)?)],
    };

    let units: Vec<TextUnit> = units
        .into_iter()
        .filter(|u| !u.text.trim().is_empty())
        .collect();
    if units.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(units)
}

/// One unit per non-blank page.
///
/// pdf-extract panics on some well-formed but unusual documents (for example
/// a font referenced by a page but missing from its resources); a panic is
/// reported as an extraction error for this file only.
fn extract_pdf(source: &str, bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|panic| ExtractError::Pdf(format!("extractor panicked: {}", panic_message(&panic))))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextUnit {
            source: source.to_string(),
            locator: Some(format!("page {}", i + 1)),
            text,
        })
        .collect())
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One unit per data row, rendered as `header: value` lines.
fn extract_csv(source: &str, bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ExtractError::Csv(e.to_string()))?
        .clone();

    let mut units = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        let text = record
            .iter()
            .enumerate()
            .map(|(col, value)| match headers.get(col) {
                Some(h) => format!("{}: {}", h.trim(), value.trim()),
                None => value.trim().to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        units.push(TextUnit {
            source: source.to_string(),
            locator: Some(format!("row {}", i + 1)),
            text,
        });
    }
    Ok(units)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, separating `<w:p>` paragraphs by a blank line so the
/// chunker sees paragraph boundaries.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                    current.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) if e.local_name().as_ref() == b"p" => {
                let para = current.trim();
                if !para.is_empty() {
                    paragraphs.push(para.to_string());
                }
                current.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}
