//! Persistent vector index: build once, retrieve many.
//!
//! Entries live in the `entries` table of `index.dir/index.sqlite`, scoped by
//! collection name. A build either reuses what is stored or replaces the whole
//! collection in one transaction, depending on [`RebuildPolicy`]:
//!
//! - `presence`: any stored entry means the index is reused as is.
//! - `fingerprint`: reuse only when the stored content fingerprint matches the
//!   current ingest directory and settings; otherwise rebuild.
//!
//! [`VectorIndex`] loads a collection into memory once. The index never
//! changes during the process lifetime, so retrieval takes no locks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::chunk::TextSplitter;
use crate::config::{Config, RebuildPolicy};
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::fingerprint;
use crate::loader::{load_units, scan_ingest_dir};
use crate::migrate::run_migrations;
use crate::mmr;
use crate::models::{Chunk, RetrievedChunk};

const META_FINGERPRINT: &str = "fingerprint";
const META_MODEL: &str = "embedding_model";
const META_BUILT_AT: &str = "built_at";
const META_ENTRY_COUNT: &str = "entry_count";

/// Fatal build conditions.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("no documents found in ingest directory {0}")]
    EmptyIngest(String),
    #[error("no text could be extracted from the documents in {0}")]
    NothingToIndex(String),
    #[error("index collection '{0}' is empty; run `ragdesk index` first")]
    NotBuilt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    Reused,
}

#[derive(Debug)]
pub struct BuildReport {
    pub outcome: BuildOutcome,
    pub files: usize,
    pub units: usize,
    /// Entries written, or entries already stored when reused.
    pub chunks: usize,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Open the index database and make sure the schema exists.
pub async fn open_store(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(&config.index.db_path()).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Build the collection from the ingest directory, or reuse it.
pub async fn build_index(config: &Config, embedder: &dyn Embedder) -> Result<BuildReport> {
    let collection = config.index.collection.as_str();

    // Presence reuses stored entries whatever the ingest directory holds now,
    // including nothing at all.
    if config.index.rebuild == RebuildPolicy::Presence && config.index.db_path().exists() {
        let pool = open_store(config).await?;
        let existing = entry_count(&pool, collection).await?;
        pool.close().await;
        if existing > 0 {
            tracing::info!(collection, entries = existing, "index present, skipping build");
            let files = scan_ingest_dir(&config.ingest.dir).map(|f| f.len()).unwrap_or(0);
            return Ok(reused(files, existing));
        }
    }

    let files = scan_ingest_dir(&config.ingest.dir)?;
    if files.is_empty() {
        return Err(IndexError::EmptyIngest(config.ingest.dir.display().to_string()).into());
    }

    let pool = open_store(config).await?;
    let existing = entry_count(&pool, collection).await?;

    let fingerprint = match config.index.rebuild {
        RebuildPolicy::Presence => None,
        RebuildPolicy::Fingerprint => {
            let current = fingerprint::compute(&files, config, embedder.model_name())?;
            let stored = get_meta(&pool, collection, META_FINGERPRINT).await?;
            if existing > 0 && stored.as_deref() == Some(current.as_str()) {
                tracing::info!(collection, entries = existing, "index up to date, skipping build");
                pool.close().await;
                return Ok(reused(files.len(), existing));
            }
            if existing > 0 {
                tracing::info!(collection, "documents or settings changed, rebuilding index");
            }
            Some(current)
        }
    };

    let report = load_units(&files);
    let splitter = TextSplitter::from_config(&config.chunking);
    let chunks = splitter.split_units(&report.units);
    if chunks.is_empty() {
        pool.close().await;
        return Err(IndexError::NothingToIndex(config.ingest.dir.display().to_string()).into());
    }

    tracing::info!(
        files = files.len(),
        loaded = report.loaded_files(),
        units = report.units.len(),
        chunks = chunks.len(),
        model = embedder.model_name(),
        "embedding chunks"
    );
    let vectors = embed_all(embedder, &chunks, config.embedding.batch_size).await?;

    write_collection(
        &pool,
        collection,
        &chunks,
        &vectors,
        embedder.model_name(),
        fingerprint.as_deref(),
    )
    .await?;
    pool.close().await;

    Ok(BuildReport {
        outcome: BuildOutcome::Built,
        files: files.len(),
        units: report.units.len(),
        chunks: chunks.len(),
        skipped: report.skipped,
        failed: report.failed,
    })
}

/// Print a build report the way the `index` command shows it.
pub fn print_report(config: &Config, report: &BuildReport) {
    match report.outcome {
        BuildOutcome::Built => println!("index {} (built)", config.index.collection),
        BuildOutcome::Reused => println!("index {} (reused)", config.index.collection),
    }
    println!("  files: {}", report.files);
    if report.outcome == BuildOutcome::Built {
        println!("  text units: {}", report.units);
    }
    println!("  chunks: {}", report.chunks);
    for name in &report.skipped {
        println!("  skipped (unsupported): {}", name);
    }
    for (name, reason) in &report.failed {
        println!("  failed: {} ({})", name, reason);
    }
    println!("ok");
}

fn reused(files: usize, existing: i64) -> BuildReport {
    BuildReport {
        outcome: BuildOutcome::Reused,
        files,
        units: 0,
        chunks: existing as usize,
        skipped: Vec::new(),
        failed: Vec::new(),
    }
}

async fn embed_all(
    embedder: &dyn Embedder,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let batch_vectors = embedder
            .embed(&texts)
            .await
            .context("Failed to embed document chunks")?;
        if batch_vectors.len() != batch.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                batch_vectors.len(),
                batch.len()
            );
        }
        for v in batch_vectors {
            if let Some(first) = vectors.first() {
                if v.len() != first.len() {
                    anyhow::bail!(
                        "Inconsistent embedding dimensions: expected {}, got {}",
                        first.len(),
                        v.len()
                    );
                }
            }
            vectors.push(v);
        }
        tracing::debug!(done = vectors.len(), total = chunks.len(), "embedded batch");
    }

    Ok(vectors)
}

/// Replace every entry and metadata row of `collection` atomically.
async fn write_collection(
    pool: &SqlitePool,
    collection: &str,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    model: &str,
    fingerprint: Option<&str>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM entries WHERE collection = ?")
        .bind(collection)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM index_meta WHERE collection = ?")
        .bind(collection)
        .execute(&mut *tx)
        .await?;

    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            r#"
            INSERT INTO entries
                (collection, id, source, locator, chunk_index, text, hash, embedding, model, dims)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(collection)
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(&chunk.locator)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(vec_to_blob(vector))
        .bind(model)
        .bind(vector.len() as i64)
        .execute(&mut *tx)
        .await?;
    }

    let built_at = chrono::Utc::now().to_rfc3339();
    let count = chunks.len().to_string();
    let mut meta: Vec<(&str, &str)> = vec![
        (META_MODEL, model),
        (META_BUILT_AT, &built_at),
        (META_ENTRY_COUNT, &count),
    ];
    if let Some(fp) = fingerprint {
        meta.push((META_FINGERPRINT, fp));
    }
    for (key, value) in meta {
        sqlx::query("INSERT INTO index_meta (collection, key, value) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn entry_count(pool: &SqlitePool, collection: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
        .bind(collection)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn get_meta(pool: &SqlitePool, collection: &str, key: &str) -> Result<Option<String>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value)
}

/// Stored state of a collection, for status output.
#[derive(Debug)]
pub struct IndexStatus {
    pub entries: i64,
    pub embedding_model: Option<String>,
    pub built_at: Option<String>,
    pub fingerprint: Option<String>,
}

pub async fn read_status(config: &Config) -> Result<IndexStatus> {
    let collection = config.index.collection.as_str();
    let pool = open_store(config).await?;
    let status = IndexStatus {
        entries: entry_count(&pool, collection).await?,
        embedding_model: get_meta(&pool, collection, META_MODEL).await?,
        built_at: get_meta(&pool, collection, META_BUILT_AT).await?,
        fingerprint: get_meta(&pool, collection, META_FINGERPRINT).await?,
    };
    pool.close().await;
    Ok(status)
}

// ============ Retrieval ============

/// Retrieval seam used by the generation chain.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` chunks relevant to `query`, chosen by MMR among the
    /// `fetch_k` most similar.
    async fn retrieve(&self, query: &str, k: usize, fetch_k: usize) -> Result<Vec<RetrievedChunk>>;
}

struct IndexEntry {
    id: String,
    source: String,
    locator: Option<String>,
    text: String,
    vector: Vec<f32>,
}

/// An index collection held in memory, in insertion order.
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    embedder: Arc<dyn Embedder>,
    mmr_lambda: f32,
}

impl VectorIndex {
    /// Load the configured collection. Fails if it has no entries.
    pub async fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let collection = config.index.collection.as_str();
        let pool = open_store(config).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, source, locator, text, embedding, model
            FROM entries
            WHERE collection = ?
            ORDER BY seq
            "#,
        )
        .bind(collection)
        .fetch_all(&pool)
        .await
        .context("Failed to read index entries")?;
        pool.close().await;

        if rows.is_empty() {
            return Err(IndexError::NotBuilt(collection.to_string()).into());
        }

        let mut entries = Vec::with_capacity(rows.len());
        let mut mismatched_model = None;
        for row in rows {
            let model: String = row.get("model");
            if model != embedder.model_name() {
                mismatched_model = Some(model);
            }
            let blob: Vec<u8> = row.get("embedding");
            entries.push(IndexEntry {
                id: row.get("id"),
                source: row.get("source"),
                locator: row.get("locator"),
                text: row.get("text"),
                vector: blob_to_vec(&blob),
            });
        }
        if let Some(model) = mismatched_model {
            tracing::warn!(
                stored = %model,
                configured = embedder.model_name(),
                "index was built with a different embedding model; rebuild it for accurate results"
            );
        }

        tracing::info!(collection, entries = entries.len(), "vector index loaded");
        Ok(Self {
            entries,
            embedder,
            mmr_lambda: config.retrieval.mmr_lambda,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rank(&self, query_vec: &[f32], k: usize, fetch_k: usize) -> Vec<RetrievedChunk> {
        let vectors: Vec<&[f32]> = self.entries.iter().map(|e| e.vector.as_slice()).collect();
        let candidates = mmr::top_n(query_vec, &vectors, fetch_k.max(k));

        let candidate_vectors: Vec<&[f32]> = candidates.iter().map(|(i, _)| vectors[*i]).collect();
        let picked = mmr::mmr_rerank(query_vec, &candidate_vectors, k, self.mmr_lambda);

        picked
            .into_iter()
            .map(|p| {
                let (idx, score) = candidates[p];
                let entry = &self.entries[idx];
                RetrievedChunk {
                    id: entry.id.clone(),
                    source: entry.source.clone(),
                    locator: entry.locator.clone(),
                    text: entry.text.clone(),
                    score,
                }
            })
            .collect()
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    async fn retrieve(&self, query: &str, k: usize, fetch_k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        Ok(self.rank(&query_vec, k, fetch_k))
    }
}
