//! Embedding providers.
//!
//! Dense search and query expansion both assume unit-length embeddings, so
//! every provider here L2-normalizes what it returns.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Turns text into a fixed-length vector.
///
/// The model id is persisted next to every dense artifact; an index must be
/// queried with the provider that built it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Sequential by default. Providers with a native batch API should override.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;

    fn model_id(&self) -> &str;
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() { *x /= norm; }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic feature-hashing embedder.
///
/// Each whitespace token and each of its boundary-marked character trigrams
/// is hashed (FNV-1a) into a signed bucket. Texts that share words or word
/// fragments land close together. No model files are needed, which makes it
/// the default for local builds and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, model_id: format!("fnv1a-hash-{dimension}") }
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
        v[bucket] += sign * weight;
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return v;
        }
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            self.add_feature(&mut v, token.as_bytes(), 1.0);
            let marked: Vec<char> = format!("#{token}#").chars().collect();
            for gram in marked.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut v, gram.as_bytes(), 0.5);
            }
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> { Ok(self.embed_sync(text)) }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize { self.dimension }

    fn model_id(&self) -> &str { &self.model_id }
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint, e.g. a
/// sentence-transformers model behind a local inference server.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            dimension,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::EmbeddingUnavailable("embedding endpoint returned no vectors".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(batch_size = texts.len(), model = %self.model, "requesting embeddings");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest { model: &self.model, input: texts.to_vec() });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            error!(error = %e, endpoint = %self.endpoint, "embedding request failed");
            EngineError::EmbeddingUnavailable(format!("request failed: {e}"))
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::EmbeddingUnavailable(format!("endpoint returned {status}: {body}")));
        }
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::EmbeddingUnavailable(format!("bad embedding response: {e}")))?;
        if parsed.data.len() != texts.len() {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));

        let mut out = Vec::with_capacity(parsed.data.len());
        for item in parsed.data {
            let mut v = item.embedding;
            if v.len() != self.dimension {
                return Err(EngineError::DimensionMismatch { expected: self.dimension, actual: v.len() });
            }
            l2_normalize(&mut v);
            out.push(v);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize { self.dimension }

    fn model_id(&self) -> &str { &self.model }
}
