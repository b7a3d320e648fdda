//! Content fingerprint of an index build.
//!
//! SHA-256 over every candidate file's name and bytes (in file-name order)
//! plus the settings that shape the index: chunk size, overlap, collection,
//! and embedding model. Two builds with equal fingerprints produce the same
//! entries, so a stored fingerprint that matches lets startup reuse the index.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::loader::SourceFile;

pub fn compute(files: &[SourceFile], config: &Config, embedding_model: &str) -> Result<String> {
    let mut sorted: Vec<&SourceFile> = files.iter().collect();
    sorted.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    let mut hasher = Sha256::new();
    for file in sorted {
        let bytes = std::fs::read(&file.path)
            .with_context(|| format!("Failed to read {}", file.path.display()))?;
        update_field(&mut hasher, file.file_name.as_bytes());
        update_field(&mut hasher, &bytes);
    }
    update_field(&mut hasher, b"--settings--");
    update_field(&mut hasher, &config.chunking.chunk_size.to_le_bytes());
    update_field(&mut hasher, &config.chunking.chunk_overlap.to_le_bytes());
    update_field(&mut hasher, config.index.collection.as_bytes());
    update_field(&mut hasher, embedding_model.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

/// Length-prefixed so adjacent fields cannot run together.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::scan_ingest_dir;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        fs::write(tmp.path().join("b.txt"), "beta").unwrap();
        (tmp, Config::default())
    }

    #[test]
    fn stable_for_same_inputs() {
        let (tmp, config) = setup();
        let files = scan_ingest_dir(tmp.path()).unwrap();
        let a = compute(&files, &config, "m").unwrap();
        let b = compute(&files, &config, "m").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn changes_with_content_settings_and_model() {
        let (tmp, mut config) = setup();
        let files = scan_ingest_dir(tmp.path()).unwrap();
        let base = compute(&files, &config, "m").unwrap();

        assert_ne!(base, compute(&files, &config, "other-model").unwrap());

        config.chunking.chunk_overlap = 50;
        assert_ne!(base, compute(&files, &config, "m").unwrap());
        config.chunking.chunk_overlap = 200;

        fs::write(tmp.path().join("a.md"), "alpha v2").unwrap();
        assert_ne!(base, compute(&files, &config, "m").unwrap());
    }

    #[test]
    fn adding_a_file_changes_fingerprint() {
        let (tmp, config) = setup();
        let before = compute(&scan_ingest_dir(tmp.path()).unwrap(), &config, "m").unwrap();
        fs::write(tmp.path().join("c.md"), "gamma").unwrap();
        let after = compute(&scan_ingest_dir(tmp.path()).unwrap(), &config, "m").unwrap();
        assert_ne!(before, after);
    }
}
