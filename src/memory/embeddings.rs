//! Embedding capability: a fixed `dimension` plus two operations, embed a
//! single text and embed a batch. Three interchangeable implementations:
//! `local` (fastembed/ONNX, default), `openai`, `ollama`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn id(&self) -> &str;
    fn model(&self) -> &str;
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the configured provider. Returns `None` when the provider can't be
/// constructed in a way that still lets the engine run degraded (callers
/// treat a missing provider as "embeddings unavailable", not a hard error).
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(FastEmbedProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbeddingProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbeddingProvider::new(config)?)),
        other => anyhow::bail!("unknown embedding provider: {other}"),
    }
}

/// L2-normalize a vector in place so that cosine similarity and dot product
/// coincide, per the Store's similarity-threshold precondition.
pub fn normalize_embedding(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Local embeddings via fastembed (ONNX runtime), the default provider —
/// no API key, no network call.
pub struct FastEmbedProvider {
    model_name: String,
    dimension: usize,
    inner: std::sync::Mutex<fastembed::TextEmbedding>,
}

impl FastEmbedProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = shellexpand::tilde(&config.cache_dir).to_string();
        let cache_dir = std::env::var("FASTEMBED_CACHE_DIR").unwrap_or(cache_dir);

        let model = model_for_name(&config.model);
        let init = fastembed::InitOptions::new(model)
            .with_cache_dir(cache_dir.into())
            .with_show_download_progress(false);

        let embedder = fastembed::TextEmbedding::try_new(init)
            .with_context(|| format!("failed to load local embedding model '{}'", config.model))?;

        Ok(Self {
            model_name: config.model.clone(),
            dimension: config.dimension,
            inner: std::sync::Mutex::new(embedder),
        })
    }
}

fn model_for_name(name: &str) -> fastembed::EmbeddingModel {
    match name {
        "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
        _ => fastembed::EmbeddingModel::AllMiniLML6V2,
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn id(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let out = self.embed_batch(&[text.to_string()]).await?;
        out.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("fastembed returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // fastembed's ONNX session is synchronous and CPU-bound. The provider
        // is held behind Arc<dyn EmbeddingProvider>, but this trait method
        // only borrows &self, so we take the lock inline rather than moving
        // into spawn_blocking; callers needing offload wrap the whole
        // embed/embed_batch call in spawn_blocking themselves (as the Writer
        // and Indexer do).
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))?;
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let mut vectors = guard
            .embed(refs, None)
            .map_err(|e| anyhow::anyhow!("fastembed embed failed: {e}"))?;
        for v in vectors.iter_mut() {
            normalize_embedding(v);
        }
        Ok(vectors)
    }
}

/// Remote embeddings via the OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAIEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.api_key required for provider 'openai'"))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        Ok(out.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            input: &'a [String],
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            data: Vec<EmbeddingEntry>,
        }
        #[derive(serde::Deserialize)]
        struct EmbeddingEntry {
            embedding: Vec<f32>,
        }

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Req {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .context("openai embeddings request failed")?
            .error_for_status()
            .context("openai embeddings returned an error status")?
            .json::<Resp>()
            .await
            .context("failed to parse openai embeddings response")?;

        let mut vectors: Vec<Vec<f32>> = resp.data.into_iter().map(|e| e.embedding).collect();
        for v in vectors.iter_mut() {
            normalize_embedding(v);
        }
        Ok(vectors)
    }
}

/// Remote embeddings via a local Ollama server's `/api/embeddings` endpoint.
/// One request per text: Ollama's embeddings endpoint does not batch.
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            prompt: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            embedding: Vec<f32>,
        }

        let resp = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&Req {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .context("ollama embeddings request failed")?
            .error_for_status()
            .context("ollama embeddings returned an error status")?
            .json::<Resp>()
            .await
            .context("failed to parse ollama embeddings response")?;

        let mut v = resp.embedding;
        normalize_embedding(&mut v);
        Ok(v)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize_embedding(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-5);
    }

    #[test]
    fn hash_text_is_stable() {
        assert_eq!(hash_text("hello"), hash_text("hello"));
        assert_ne!(hash_text("hello"), hash_text("world"));
    }
}
