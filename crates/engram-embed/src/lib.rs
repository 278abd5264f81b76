//! Embedding service drivers.
//!
//! Two implementations of the `EmbeddingService` port:
//! - [`HttpEmbeddingService`]: OpenAI-compatible `/embeddings` endpoint,
//!   works with any provider exposing that API (OpenAI, Ollama, vLLM, ...).
//! - [`HashEmbeddingService`]: deterministic local token-hash embedder for
//!   tests and offline deployments. Texts sharing tokens share buckets, so
//!   cosine ranking over its vectors behaves sensibly.

use async_trait::async_trait;
use engram_types::error::{MemoryError, MemoryResult};
use engram_types::memory::Embedding;
use engram_types::ports::EmbeddingService;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

/// Configuration for the HTTP embedding driver.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    /// Base URL of the provider API (e.g. "https://api.openai.com/v1").
    pub base_url: String,
    /// Model name (e.g. "text-embedding-3-small").
    pub model: String,
    /// API key; empty for local providers.
    pub api_key: String,
}

/// OpenAI-compatible embedding driver.
pub struct HttpEmbeddingService {
    config: HttpEmbeddingConfig,
    client: reqwest::Client,
    dims: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingService {
    /// Create a driver for the given provider.
    pub fn new(config: HttpEmbeddingConfig) -> Self {
        let dims = infer_dimensions(&config.model);
        let is_local = config.base_url.contains("localhost")
            || config.base_url.contains("127.0.0.1")
            || config.base_url.contains("[::1]");
        if !is_local {
            warn!(
                base_url = %config.base_url,
                "Embedding driver will send memory content to an external API"
            );
        }
        Self {
            config,
            client: reqwest::Client::new(),
            dims,
        }
    }
}

/// Infer embedding dimensions from model name.
fn infer_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        "all-MiniLM-L6-v2" => 384,
        "all-mpnet-base-v2" => 768,
        "nomic-embed-text" => 768,
        "mxbai-embed-large" => 1024,
        _ => 1536,
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn initialize(&self) -> MemoryResult<()> {
        if self.config.model.trim().is_empty() {
            return Err(MemoryError::Embedding(
                "Embedding model name must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    async fn embed(&self, text: &str) -> MemoryResult<Embedding> {
        let url = format!("{}/embeddings", self.config.base_url);
        let body = EmbedRequest {
            model: &self.config.model,
            input: text,
        };
        let mut req = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.config.api_key));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!(
                "Provider returned {status}: {body_text}"
            )));
        }
        let data: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let vector = data
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::Embedding("Empty embedding response".to_string()))?;
        debug!(dims = vector.len(), "Embedded text");
        Ok(Embedding {
            vector,
            confidence: 1.0,
            model: self.config.model.clone(),
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Deterministic local embedder: tokens hash into buckets of a fixed-size
/// vector, which is then L2-normalized.
pub struct HashEmbeddingService {
    dims: usize,
}

impl HashEmbeddingService {
    /// Create an embedder producing vectors of the given dimension.
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }
}

impl Default for HashEmbeddingService {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingService for HashEmbeddingService {
    async fn initialize(&self) -> MemoryResult<()> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> MemoryResult<Embedding> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dims;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(Embedding {
            vector,
            confidence: 1.0,
            model: format!("hash-{}", self.dims),
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedding_is_deterministic() {
        let svc = HashEmbeddingService::new(64);
        let a = svc.embed("user prefers dark mode").await.unwrap();
        let b = svc.embed("user prefers dark mode").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.vector.len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedding_is_normalized() {
        let svc = HashEmbeddingService::new(32);
        let emb = svc.embed("some nontrivial content here").await.unwrap();
        let norm: f32 = emb.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_tokens_raise_similarity() {
        let svc = HashEmbeddingService::new(128);
        let a = svc.embed("dark mode preference").await.unwrap().vector;
        let b = svc.embed("dark mode enabled").await.unwrap().vector;
        let c = svc.embed("quarterly revenue report").await.unwrap().vector;
        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[tokio::test]
    async fn test_empty_text_embeds_to_zero_vector() {
        let svc = HashEmbeddingService::new(16);
        let emb = svc.embed("").await.unwrap();
        assert!(emb.vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_infer_dimensions() {
        assert_eq!(infer_dimensions("text-embedding-3-small"), 1536);
        assert_eq!(infer_dimensions("all-MiniLM-L6-v2"), 384);
        assert_eq!(infer_dimensions("something-new"), 1536);
    }

    #[tokio::test]
    async fn test_http_initialize_rejects_blank_model() {
        let svc = HttpEmbeddingService::new(HttpEmbeddingConfig {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "  ".to_string(),
            api_key: String::new(),
        });
        assert!(svc.initialize().await.is_err());
    }
}
