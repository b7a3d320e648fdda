//! Ingest directory scanning and document loading.
//!
//! Candidate inputs are the non-hidden regular files directly inside the
//! ingest directory, symlinks resolved to their targets. Loading dispatches
//! each file to [`extract`](crate::extract) by extension; unsupported formats
//! and files that fail to parse are reported and skipped, never propagated as
//! errors.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::extract::{self, DocumentFormat};
use crate::models::TextUnit;

/// A candidate input file found in the ingest directory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    /// `None` when the extension is outside the supported set.
    pub format: Option<DocumentFormat>,
}

/// Outcome of loading a set of source files.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub units: Vec<TextUnit>,
    /// Files with an unsupported extension.
    pub skipped: Vec<String>,
    /// Files that could not be read or parsed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    /// Number of files that produced at least one unit.
    pub fn loaded_files(&self) -> usize {
        let mut names: Vec<&str> = self.units.iter().map(|u| u.source.as_str()).collect();
        names.dedup();
        names.len()
    }
}

/// List candidate files directly inside `dir`, sorted by file name.
pub fn scan_ingest_dir(dir: &Path) -> Result<Vec<SourceFile>> {
    if !dir.is_dir() {
        bail!("Ingest directory does not exist: {}", dir.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable directory entry, skipping");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.starts_with('.') {
            continue;
        }
        let path = entry.path().to_path_buf();
        files.push(SourceFile {
            format: DocumentFormat::from_path(&path),
            path,
            file_name,
        });
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

/// Load every file into text units, absorbing per-file failures.
pub fn load_units(files: &[SourceFile]) -> LoadReport {
    let mut report = LoadReport::default();

    for file in files {
        let Some(format) = file.format else {
            tracing::warn!(file = %file.file_name, "unsupported file format, skipping");
            report.skipped.push(file.file_name.clone());
            continue;
        };

        let bytes = match std::fs::read(&file.path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = %file.file_name, error = %e, "failed to read file, skipping");
                report.failed.push((file.file_name.clone(), e.to_string()));
                continue;
            }
        };

        match extract::extract_units(&file.file_name, format, &bytes) {
            Ok(units) => {
                tracing::debug!(
                    file = %file.file_name,
                    format = format.as_str(),
                    units = units.len(),
                    "loaded"
                );
                report.units.extend(units);
            }
            Err(e) => {
                tracing::warn!(file = %file.file_name, error = %e, "failed to load file, skipping");
                report.failed.push((file.file_name.clone(), e.to_string()));
            }
        }
    }

    report
}
