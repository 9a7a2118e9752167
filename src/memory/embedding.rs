//! Pluggable embedding generation for episodic memory (§4.8, C8).
//!
//! An embedding spec string selects the backend: `openai:<model>` calls the
//! OpenAI embeddings API, `local:<url>` calls a local HTTP embedding server
//! (this crate carries no bundled ML runtime), `mock:<dims>` is a
//! deterministic hash-based generator for tests and offline use.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MOCK_DIMENSIONS: usize = 32;
const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OPENAI_DIMENSIONS: usize = 1536;

/// Produces a fixed-length embedding vector for a piece of text.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimensions(&self) -> usize;
}

/// Deterministic, network-free embedding: hashes the text into `dims`
/// buckets and L2-normalizes. Used in tests and as an offline fallback.
pub struct MockEmbeddingGenerator {
    dims: usize,
}

impl MockEmbeddingGenerator {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for MockEmbeddingGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MOCK_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        let mut v = vec![0.0f32; self.dims];
        for (i, slot) in v.iter_mut().enumerate() {
            *slot = f32::from(digest[i % digest.len()]) / 255.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Calls OpenAI's `/v1/embeddings` endpoint.
pub struct OpenAiEmbeddingGenerator {
    api_key: String,
    model: String,
    client: Client,
    dims: usize,
}

impl OpenAiEmbeddingGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dims: usize) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingGenerator for OpenAiEmbeddingGenerator {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .context("openai embeddings request failed")?
            .error_for_status()
            .context("openai embeddings returned an error status")?;

        let body: serde_json::Value = resp
            .json()
            .await
            .context("invalid openai embeddings response body")?;
        let embedding = body["data"][0]["embedding"]
            .as_array()
            .context("openai embeddings response missing data[0].embedding")?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Calls a local HTTP embedding server: `POST <base_url>/embed
/// {"text": ...} -> {"embedding": [...]}`. Stands in for a bundled local
/// model, which this crate's dependency stack doesn't carry.
pub struct LocalEmbeddingGenerator {
    base_url: String,
    client: Client,
    dims: usize,
}

impl LocalEmbeddingGenerator {
    pub fn new(base_url: impl Into<String>, dims: usize) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingGenerator for LocalEmbeddingGenerator {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embed", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("local embedding server request failed")?
            .error_for_status()
            .context("local embedding server returned an error status")?;

        let body: serde_json::Value = resp
            .json()
            .await
            .context("invalid local embedding server response body")?;
        let embedding = body["embedding"]
            .as_array()
            .context("local embedding server response missing 'embedding'")?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Parse an embedding spec (`openai:<model>`, `local:<url>`, `mock:<dims>`)
/// into a concrete generator. `openai_api_key` is required for `openai:*`.
pub fn from_spec(spec: &str, openai_api_key: Option<&str>) -> Result<Box<dyn EmbeddingGenerator>> {
    let (scheme, rest) = spec.split_once(':').unwrap_or((spec, ""));
    match scheme {
        "mock" => {
            let dims = rest.parse::<usize>().unwrap_or(DEFAULT_MOCK_DIMENSIONS);
            Ok(Box::new(MockEmbeddingGenerator::new(dims)))
        }
        "openai" => {
            let api_key = openai_api_key
                .context("embedding spec 'openai:*' requires an OpenAI API key")?
                .to_string();
            let model = if rest.is_empty() { DEFAULT_OPENAI_MODEL } else { rest };
            Ok(Box::new(OpenAiEmbeddingGenerator::new(
                api_key,
                model,
                DEFAULT_OPENAI_DIMENSIONS,
            )))
        }
        "local" => {
            anyhow::ensure!(!rest.is_empty(), "embedding spec 'local:<url>' requires a URL");
            Ok(Box::new(LocalEmbeddingGenerator::new(rest, DEFAULT_MOCK_DIMENSIONS)))
        }
        other => anyhow::bail!("unknown embedding backend '{other}'; expected openai:/local:/mock:"),
    }
}

/// Cosine similarity, clamped to `[0, 1]` (negative similarity is treated
/// as "not similar" rather than propagated, matching how the episodic
/// store's `minSimilarity` floor is meant to be read).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).max(0.0)
}

#[cfg(test)]
mod tests;
