//! Embedding backends and vector utilities.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs a model in-process via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after model download.
//!
//! Also provides vector utilities used by the index:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The Ollama backend uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

/// A text embedding model.
///
/// The same instance embeds chunks at build time and queries at retrieval
/// time, so both land in the same vector space.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"nomic-embed-text"`). Part of the index fingerprint.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Construct the embedder selected by `embedding.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires the fastembed feature) |
pub async fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::load(&config.embedding).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL. Requires Ollama to be
/// running with the embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.embedding.model.clone(),
            url: config
                .embedding
                .endpoint(&config.llm)
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.embedding.max_retries,
            client,
        })
    }
}

/// Outcome of one `/api/embed` request.
enum Attempt {
    Done(Vec<Vec<f32>>),
    /// Worth another try after backing off.
    Transient(anyhow::Error),
}

impl OllamaEmbedder {
    async fn request(&self, body: &serde_json::Value, expected: usize) -> Result<Attempt> {
        let response = match self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Ok(Attempt::Transient(anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )))
            }
        };

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response.json().await?;
            return parse_embed_response(json, expected).map(Attempt::Done);
        }

        let detail = response.text().await.unwrap_or_default();
        let err = anyhow::anyhow!("Ollama API error {}: {}", status, detail);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Ok(Attempt::Transient(err))
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut attempt = 0;
        loop {
            match self.request(&body, texts.len()).await? {
                Attempt::Done(vectors) => return Ok(vectors),
                Attempt::Transient(err) if attempt >= self.max_retries => return Err(err),
                Attempt::Transient(err) => {
                    attempt += 1;
                    let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                    tracing::debug!(attempt, ?delay, error = %err, "retrying embedding request");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Decode an `/api/embed` reply, requiring one vector per input.
fn parse_embed_response(json: serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let parsed: EmbedResponse = serde_json::from_value(json)
        .map_err(|e| anyhow::anyhow!("Invalid Ollama embed response: {}", e))?;
    if parsed.embeddings.len() != expected {
        bail!(
            "Ollama returned {} embeddings for {} inputs",
            parsed.embeddings.len(),
            expected
        );
    }
    Ok(parsed.embeddings)
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use ragdesk::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_blob_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[0.5, -1.0]);
        blob.push(7);
        assert_eq!(blob_to_vec(&blob), vec![0.5, -1.0]);
    }

    #[test]
    fn embed_response_yields_one_vector_per_input() {
        let json = serde_json::json!({
            "model": "nomic-embed-text",
            "embeddings": [[0.1, 0.2], [0.3, 0.4]]
        });
        let vecs = parse_embed_response(json, 2).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn embed_response_count_mismatch_is_error() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2]] });
        let err = parse_embed_response(json, 3).unwrap_err();
        assert!(err.to_string().contains("1 embeddings for 3 inputs"));
    }

    #[test]
    fn embed_response_without_embeddings_is_error() {
        let json = serde_json::json!({ "error": "model not found" });
        assert!(parse_embed_response(json, 1).is_err());
    }

    #[tokio::test]
    async fn unreachable_ollama_fails_after_retries() {
        let mut config = Config::default();
        config.embedding.url = Some("http://127.0.0.1:9".to_string());
        config.embedding.max_retries = 0;
        config.embedding.timeout_secs = 2;
        let embedder = OllamaEmbedder::new(&config).unwrap();
        let err = embedder.embed_query("hello").await.unwrap_err();
        assert!(err.to_string().contains("Ollama connection error"));
    }
}
