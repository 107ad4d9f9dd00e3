//! Embedding-neighbour query expansion.
//!
//! Expansion never fails the caller: without an embedder or a vocabulary
//! index every word simply has no synonyms.

use crate::config::ExpansionConfig;
use crate::dense::{l2_to_similarity, FlatL2Index};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::tokenizer::expansion_terms;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Global word -> embedding space built from every collection's normalized terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyIndex {
    model: String,
    words: Vec<String>,
    vectors: FlatL2Index,
}

impl VocabularyIndex {
    pub fn new(dimension: usize, model: impl Into<String>) -> Self {
        Self { model: model.into(), words: Vec::new(), vectors: FlatL2Index::new(dimension) }
    }

    pub fn push(&mut self, word: impl Into<String>, vector: &[f32]) -> Result<()> {
        self.vectors.add(vector)?;
        self.words.push(word.into());
        Ok(())
    }

    pub fn model(&self) -> &str { &self.model }

    pub fn dimension(&self) -> usize { self.vectors.dimension() }

    pub fn len(&self) -> usize { self.words.len() }

    pub fn is_empty(&self) -> bool { self.words.is_empty() }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.vectors.len() != self.words.len() {
            return Err(format!("{} vectors for {} words", self.vectors.len(), self.words.len()));
        }
        Ok(())
    }

    /// Nearest `k` words as `(word, squared distance)`, closest first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(&str, f32)>> {
        Ok(self
            .vectors
            .search(query, k)?
            .into_iter()
            .filter_map(|(pos, dist)| self.words.get(pos).map(|w| (w.as_str(), dist)))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub original: String,
    pub expanded: String,
}

pub struct QueryExpander {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    vocabulary: Option<Arc<VocabularyIndex>>,
    config: ExpansionConfig,
}

impl QueryExpander {
    pub fn new(
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        vocabulary: Option<Arc<VocabularyIndex>>,
        config: ExpansionConfig,
    ) -> Self {
        let vocabulary = match (&embedder, vocabulary) {
            (Some(e), Some(v)) if e.model_id() != v.model() || e.dimension() != v.dimension() => {
                warn!(
                    provider = e.model_id(),
                    vocabulary = v.model(),
                    "vocabulary index was built with a different embedding model; expansion disabled"
                );
                None
            }
            (_, v) => v,
        };
        Self { embedder, vocabulary, config }
    }

    /// An expander that returns every query unchanged.
    pub fn disabled() -> Self { Self { embedder: None, vocabulary: None, config: ExpansionConfig::default() } }

    pub fn is_available(&self) -> bool {
        self.embedder.is_some() && self.vocabulary.as_ref().is_some_and(|v| !v.is_empty())
    }

    /// Up to `synonyms_per_word` vocabulary words at least `threshold` similar to `word`.
    pub async fn synonyms(&self, word: &str) -> Vec<String> {
        let (Some(embedder), Some(vocabulary)) = (&self.embedder, &self.vocabulary) else {
            return Vec::new();
        };
        if self.config.synonyms_per_word == 0 || vocabulary.is_empty() {
            return Vec::new();
        }
        let vector = match embedder.embed(word).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, word, "could not embed word for expansion");
                return Vec::new();
            }
        };
        let neighbours = match vocabulary.nearest(&vector, self.config.candidates()) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, word, "vocabulary lookup failed");
                return Vec::new();
            }
        };

        neighbours
            .into_iter()
            .filter(|(candidate, dist)| {
                l2_to_similarity(*dist) >= self.config.threshold && !candidate.eq_ignore_ascii_case(word)
            })
            .take(self.config.synonyms_per_word)
            .map(|(candidate, _)| candidate.to_string())
            .collect()
    }

    /// Query words followed by their synonyms, each term once, in first-seen order.
    pub async fn expand(&self, query: &str) -> String {
        let words = expansion_terms(query);
        if !self.is_available() {
            return words.join(" ");
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut out: Vec<String> = Vec::new();
        for word in words {
            let synonyms = self.synonyms(&word).await;
            for term in std::iter::once(word).chain(synonyms) {
                if seen.insert(term.clone()) {
                    out.push(term);
                }
            }
        }
        let expanded = out.join(" ");
        debug!(query, expanded = %expanded, "expanded query");
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Fixed word vectors; "car" and "automobil" are near, "banana" is far.
    struct TableEmbedder {
        table: HashMap<&'static str, Vec<f32>>,
    }

    impl TableEmbedder {
        fn new() -> Self {
            let mut table = HashMap::new();
            table.insert("car", vec![1.0, 0.0, 0.0]);
            table.insert("automobil", vec![0.95, 0.312_25, 0.0]);
            table.insert("vehicl", vec![0.8, 0.0, 0.6]);
            table.insert("fast", vec![0.0, 0.0, 1.0]);
            table.insert("banana", vec![0.0, 1.0, 0.0]);
            Self { table }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| EngineError::EmbeddingUnavailable(format!("no vector for {text}")))
        }

        fn dimension(&self) -> usize { 3 }

        fn model_id(&self) -> &str { "table" }
    }

    async fn expander(config: ExpansionConfig) -> QueryExpander {
        let embedder = TableEmbedder::new();
        let mut vocab = VocabularyIndex::new(3, "table");
        for word in ["automobil", "banana", "car", "fast", "vehicl"] {
            vocab.push(word, &embedder.embed(word).await.unwrap()).unwrap();
        }
        QueryExpander::new(Some(Arc::new(embedder)), Some(Arc::new(vocab)), config)
    }

    #[tokio::test]
    async fn identity_without_vocabulary() {
        let e = QueryExpander::disabled();
        assert!(!e.is_available());
        assert_eq!(e.expand("hello world").await, "hello world");
        assert!(e.synonyms("hello").await.is_empty());
    }

    #[tokio::test]
    async fn adds_closest_synonym_above_threshold() {
        let e = expander(ExpansionConfig::default()).await;
        assert_eq!(e.synonyms("car").await, vec!["automobil".to_string()]);
        // nothing near "banana" passes 0.7
        assert!(e.synonyms("banana").await.is_empty());
        assert_eq!(e.expand("Car, banana!").await, "car automobil banana");
    }

    #[tokio::test]
    async fn respects_synonym_cap() {
        let config = ExpansionConfig { synonyms_per_word: 2, ..ExpansionConfig::default() };
        let e = expander(config).await;
        assert_eq!(e.synonyms("car").await, vec!["automobil".to_string(), "vehicl".to_string()]);
    }

    #[tokio::test]
    async fn terms_appear_once() {
        let e = expander(ExpansionConfig::default()).await;
        assert_eq!(e.expand("car automobil car").await, "car automobil");
    }

    #[tokio::test]
    async fn unknown_words_pass_through() {
        let e = expander(ExpansionConfig::default()).await;
        assert_eq!(e.expand("zebra fast").await, "zebra fast");
    }

    #[tokio::test]
    async fn model_mismatch_disables_expansion() {
        let mut vocab = VocabularyIndex::new(3, "other-model");
        vocab.push("car", &[1.0, 0.0, 0.0]).unwrap();
        let e = QueryExpander::new(
            Some(Arc::new(TableEmbedder::new())),
            Some(Arc::new(vocab)),
            ExpansionConfig::default(),
        );
        assert!(!e.is_available());
        assert_eq!(e.expand("car").await, "car");
    }
}
