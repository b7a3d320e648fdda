use anyhow::Result;

use crate::config::Config;
use crate::index;
use crate::loader::{scan_ingest_dir, SourceFile};

/// Print the ingest directory's files with their format, then index status.
pub async fn list_sources(config: &Config) -> Result<()> {
    let files = scan_ingest_dir(&config.ingest.dir)?;

    println!("{:<40} {:<10} SUPPORTED", "FILE", "FORMAT");
    for file in &files {
        let (format, supported) = describe(file);
        println!("{:<40} {:<10} {}", file.file_name, format, supported);
    }
    let supported = files.iter().filter(|f| f.format.is_some()).count();
    println!();
    println!(
        "{} files in {} ({} supported)",
        files.len(),
        config.ingest.dir.display(),
        supported
    );

    let status = index::read_status(config).await?;
    if status.entries == 0 {
        println!("index: not built (collection '{}')", config.index.collection);
    } else {
        println!(
            "index: {} entries in '{}', model {}, built {}",
            status.entries,
            config.index.collection,
            status.embedding_model.as_deref().unwrap_or("?"),
            status.built_at.as_deref().unwrap_or("?")
        );
    }

    Ok(())
}

fn describe(file: &SourceFile) -> (&'static str, bool) {
    match file.format {
        Some(format) => (format.as_str(), true),
        None => ("-", false),
    }
}
