//! TOML configuration.
//!
//! Every field has a default equal to the assistant's fixed constants, so the
//! configuration file is optional: a missing file yields [`Config::default`].
//! A present file only needs to name the values it overrides.
//!
//! ```toml
//! [ingest]
//! dir = "./documents"
//!
//! [index]
//! dir = "./index"
//! collection = "documents"
//! rebuild = "fingerprint"   # or "presence"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! k = 3
//! fetch_k = 10
//!
//! [llm]
//! url = "http://localhost:11434"
//! model = "llama3.2"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Phrase the model is instructed to emit when the context lacks the answer.
pub const DEFAULT_FALLBACK_PHRASE: &str =
    "I could not find the answer to that question in the provided documents.";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_dir")]
    pub dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dir: default_ingest_dir(),
        }
    }
}

fn default_ingest_dir() -> PathBuf {
    PathBuf::from("./documents")
}

/// When an existing index is reused instead of rebuilt.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RebuildPolicy {
    /// Reuse whenever the collection holds any entry.
    Presence,
    /// Reuse only when the stored content fingerprint matches.
    Fingerprint,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_rebuild")]
    pub rebuild: RebuildPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            collection: default_collection(),
            rebuild: default_rebuild(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./index")
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_rebuild() -> RebuildPolicy {
    RebuildPolicy::Fingerprint
}

impl IndexConfig {
    /// Path of the SQLite database holding the collection.
    pub fn db_path(&self) -> PathBuf {
        self.dir.join("index.sqlite")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// 1.0 ranks purely by relevance, 0.0 purely by diversity.
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_fetch_k() -> usize {
    10
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_max_context_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL for the `ollama` provider; falls back to `llm.url`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-request timeout for generation. `None` waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            startup_attempts: default_startup_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: None,
            temperature: None,
        }
    }
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "llama3.2".to_string()
}
fn default_startup_attempts() -> u32 {
    30
}
fn default_poll_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_fallback_phrase")]
    pub fallback_phrase: String,
    /// Lines of each source chunk shown under an answer.
    #[serde(default = "default_snippet_lines")]
    pub snippet_lines: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            fallback_phrase: default_fallback_phrase(),
            snippet_lines: default_snippet_lines(),
        }
    }
}

fn default_fallback_phrase() -> String {
    DEFAULT_FALLBACK_PHRASE.to_string()
}
fn default_snippet_lines() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7860".to_string()
}

impl EmbeddingConfig {
    /// Base URL of the embedding endpoint for HTTP providers.
    pub fn endpoint<'a>(&'a self, llm: &'a LlmConfig) -> &'a str {
        self.url.as_deref().unwrap_or(&llm.url)
    }
}

/// Load and validate the configuration at `path`.
///
/// A missing file is not an error: the built-in defaults are used.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

/// Parse configuration from TOML text without validating it.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.k == 0 {
        bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.fetch_k < config.retrieval.k {
        bail!(
            "retrieval.fetch_k ({}) must be >= retrieval.k ({})",
            config.retrieval.fetch_k,
            config.retrieval.k
        );
    }
    if !(0.0..=1.0).contains(&config.retrieval.mmr_lambda) {
        bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }
    if config.retrieval.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be > 0");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be ollama or local.",
            other
        ),
    }

    if config.llm.model.trim().is_empty() {
        bail!("llm.model must not be empty");
    }
    if config.llm.startup_attempts == 0 {
        bail!("llm.startup_attempts must be >= 1");
    }

    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }

    Ok(())
}
