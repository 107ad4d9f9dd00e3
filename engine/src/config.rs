use crate::embedding::{EmbeddingProvider, HashEmbedder, HttpEmbedder};
use crate::error::{EngineError, Result};
use crate::fusion::FusionWeights;
use crate::index::Method;
use crate::rag::DEFAULT_PROMPT_TEMPLATE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Engine settings. Every field has a default, so a partial JSON file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Results returned per method and after fusion.
    pub top_k: usize,
    /// Nearest-neighbour candidates fetched before dense re-ranking.
    pub dense_candidates: usize,
    /// Budget for each sub-method of a fused query.
    pub method_timeout_ms: u64,
    /// Methods combined by a hybrid query, in merge order.
    pub hybrid_methods: Vec<Method>,
    pub weights: FusionWeights,
    pub expansion: ExpansionConfig,
    pub embedder: EmbedderConfig,
    pub rag: RagConfig,
    /// Texts per embedding request during index builds.
    pub batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            dense_candidates: 50,
            method_timeout_ms: 5_000,
            hybrid_methods: Method::SINGLE.to_vec(),
            weights: FusionWeights::default(),
            expansion: ExpansionConfig::default(),
            embedder: EmbedderConfig::default(),
            rag: RagConfig::default(),
            batch_size: 64,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(EngineError::Config("top_k must be greater than zero".into()));
        }
        if self.dense_candidates < self.top_k {
            return Err(EngineError::Config(format!(
                "dense_candidates ({}) must be at least top_k ({})",
                self.dense_candidates, self.top_k
            )));
        }
        if self.method_timeout_ms == 0 {
            return Err(EngineError::Config("method_timeout_ms must be greater than zero".into()));
        }
        if self.hybrid_methods.is_empty() || self.hybrid_methods.contains(&Method::Hybrid) {
            return Err(EngineError::Config("hybrid_methods must list one or more single methods".into()));
        }
        let w = &self.weights;
        if w.dense < 0.0 || w.tfidf < 0.0 || w.bm25 < 0.0 {
            return Err(EngineError::Config("fusion weights must be non-negative".into()));
        }
        if !w.sums_to_one() {
            warn!(total = w.total(), "fusion weights do not sum to 1.0");
        }
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be greater than zero".into()));
        }
        self.expansion.validate()?;
        self.rag.validate()
    }

    pub fn method_timeout(&self) -> Duration { Duration::from_millis(self.method_timeout_ms) }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Minimum cosine similarity for a neighbour to count as a synonym.
    pub threshold: f32,
    pub synonyms_per_word: usize,
    /// Neighbours fetched per word are `max(min_candidates, synonyms_per_word * overfetch_factor)`.
    pub min_candidates: usize,
    pub overfetch_factor: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self { Self { threshold: 0.7, synonyms_per_word: 1, min_candidates: 10, overfetch_factor: 5 } }
}

impl ExpansionConfig {
    pub fn candidates(&self) -> usize {
        self.min_candidates.max(self.synonyms_per_word * self.overfetch_factor)
    }

    fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.threshold) {
            return Err(EngineError::Config(format!("expansion threshold {} outside [-1, 1]", self.threshold)));
        }
        if self.overfetch_factor < 5 {
            return Err(EngineError::Config("expansion overfetch_factor must be at least 5".into()));
        }
        Ok(())
    }
}

/// Which embedding provider to build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EmbedderConfig {
    Hash {
        dimension: usize,
    },
    Http {
        endpoint: String,
        model: String,
        dimension: usize,
        /// Environment variable holding a bearer token.
        #[serde(default)]
        api_key_env: Option<String>,
    },
}

impl Default for EmbedderConfig {
    fn default() -> Self { EmbedderConfig::Hash { dimension: 384 } }
}

impl EmbedderConfig {
    pub fn build(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self {
            EmbedderConfig::Hash { dimension } => {
                if *dimension == 0 {
                    return Err(EngineError::Config("embedding dimension must be greater than zero".into()));
                }
                Ok(Arc::new(HashEmbedder::new(*dimension)))
            }
            EmbedderConfig::Http { endpoint, model, dimension, api_key_env } => {
                let mut embedder = HttpEmbedder::new(endpoint.clone(), model.clone(), *dimension);
                if let Some(var) = api_key_env {
                    let key = std::env::var(var).map_err(|_| {
                        EngineError::EmbeddingUnavailable(format!("environment variable {var} is not set"))
                    })?;
                    embedder = embedder.with_api_key(key);
                }
                Ok(Arc::new(embedder))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Collections searched for chat context.
    pub collections: Vec<String>,
    /// Passages taken from each collection.
    pub per_collection: usize,
    /// Must contain `{context}` and `{question}`.
    pub prompt_template: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            collections: vec!["antique".to_string(), "quora".to_string()],
            per_collection: 2,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

impl RagConfig {
    fn validate(&self) -> Result<()> {
        if self.per_collection == 0 {
            return Err(EngineError::Config("rag.per_collection must be greater than zero".into()));
        }
        if !self.prompt_template.contains("{context}") || !self.prompt_template.contains("{question}") {
            return Err(EngineError::Config("rag.prompt_template needs {context} and {question}".into()));
        }
        Ok(())
    }
}
