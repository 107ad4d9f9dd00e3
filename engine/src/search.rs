//! Retrieval orchestrator.
//!
//! Indexes are loaded on first use and cached for the life of the engine.
//! The cache map lock is only held to fetch a per-key cell; the cell itself
//! serialises concurrent first loads of the same `(method, collection)`.

use crate::bm25::Bm25Index;
use crate::config::EngineConfig;
use crate::dense::DenseIndex;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::expansion::{ExpandedQuery, QueryExpander};
use crate::fusion::fuse;
use crate::index::{validate_collection, Method, ScoredDoc, SearchHit};
use crate::persist::{self, IndexPaths};
use crate::store::DocumentStore;
use crate::tfidf::TfIdfIndex;
use crate::tokenizer::normalize_to_text;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// A loaded per-collection artifact.
#[derive(Debug)]
pub enum LoadedIndex {
    Tfidf(TfIdfIndex),
    Bm25(Bm25Index),
    Dense(DenseIndex),
}

impl LoadedIndex {
    fn load(paths: &IndexPaths, method: Method, collection: &str) -> Result<Self> {
        match method {
            Method::Tfidf => Ok(LoadedIndex::Tfidf(persist::load_tfidf(paths, collection)?)),
            Method::Bm25 => Ok(LoadedIndex::Bm25(persist::load_bm25(paths, collection)?)),
            Method::Dense => Ok(LoadedIndex::Dense(persist::load_dense(paths, collection)?)),
            Method::Hybrid => Err(EngineError::UnknownMethod(method.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LoadedIndex::Tfidf(i) => i.num_docs(),
            LoadedIndex::Bm25(i) => i.num_docs(),
            LoadedIndex::Dense(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn as_dense(&self) -> Option<&DenseIndex> {
        match self {
            LoadedIndex::Dense(i) => Some(i),
            _ => None,
        }
    }
}

type IndexCell = Arc<OnceCell<Arc<LoadedIndex>>>;

pub struct SearchEngine {
    paths: IndexPaths,
    store: DocumentStore,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    expander: QueryExpander,
    config: EngineConfig,
    cache: Mutex<HashMap<(Method, String), IndexCell>>,
}

impl SearchEngine {
    /// Open an index directory written by the indexer.
    ///
    /// A missing embedder or vocabulary index is not fatal: dense search then
    /// reports `IndexNotFound` and expansion returns queries unchanged.
    pub fn open<P: AsRef<Path>>(index_root: P, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let paths = IndexPaths::new(index_root);
        let store = DocumentStore::open(paths.docstore())?;

        let embedder = match config.embedder.build() {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(error = %e, "embedding provider unavailable; dense search disabled");
                None
            }
        };
        let vocabulary = match persist::load_vocabulary(&paths) {
            Ok(v) => {
                info!(words = v.len(), model = v.model(), "vocabulary index loaded");
                Some(Arc::new(v))
            }
            Err(e) => {
                warn!(error = %e, "query expansion disabled");
                None
            }
        };
        let expander = QueryExpander::new(embedder.clone(), vocabulary, config.expansion.clone());
        let collections = paths.collections()?;
        info!(root = %paths.root.display(), ?collections, "search engine ready");
        Ok(Self::new(paths, store, embedder, expander, config))
    }

    pub fn new(
        paths: IndexPaths,
        store: DocumentStore,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        expander: QueryExpander,
        config: EngineConfig,
    ) -> Self {
        Self { paths, store, embedder, expander, config, cache: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn store(&self) -> &DocumentStore { &self.store }

    /// Keys currently held in the index cache.
    pub fn cached_indexes(&self) -> Vec<(Method, String)> {
        let cache = self.cache.lock();
        let mut keys: Vec<(Method, String)> = cache
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_by(|a, b| (a.0.as_str(), &a.1).cmp(&(b.0.as_str(), &b.1)));
        keys
    }

    pub(crate) fn embedder(&self) -> Result<&Arc<dyn EmbeddingProvider>> {
        self.embedder
            .as_ref()
            .ok_or_else(|| EngineError::EmbeddingUnavailable("no embedding provider configured".into()))
    }

    /// Load once, then share. A failed load caches nothing, so a later call retries.
    pub async fn load_index(&self, method: Method, collection: &str) -> Result<Arc<LoadedIndex>> {
        validate_collection(collection)?;
        if !method.is_single() {
            return Err(EngineError::UnknownMethod(method.to_string()));
        }
        let expected_model = match method {
            Method::Dense => Some(self.embedder()?.model_id().to_string()),
            _ => None,
        };

        if !self.paths.has_artifact(method, collection) {
            return Err(EngineError::IndexNotFound { method, collection: collection.to_string() });
        }

        let key = (method, collection.to_string());
        let cell: IndexCell = {
            let mut cache = self.cache.lock();
            cache.entry(key.clone()).or_default().clone()
        };
        let loaded = cell
            .get_or_try_init(|| async {
                let paths = self.paths.clone();
                let name = collection.to_string();
                let start = Instant::now();
                let index = tokio::task::spawn_blocking(move || LoadedIndex::load(&paths, method, &name)).await??;
                if let (Some(expected), LoadedIndex::Dense(dense)) = (&expected_model, &index) {
                    if dense.model() != expected {
                        return Err(EngineError::ModelMismatch {
                            built: dense.model().to_string(),
                            provider: expected.clone(),
                        });
                    }
                }
                info!(
                    %method,
                    collection,
                    docs = index.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "index loaded"
                );
                Ok::<_, EngineError>(Arc::new(index))
            })
            .await;
        match loaded {
            Ok(index) => Ok(index.clone()),
            Err(e) => {
                let mut cache = self.cache.lock();
                if cache.get(&key).is_some_and(|c| Arc::ptr_eq(c, &cell) && !c.initialized()) {
                    cache.remove(&key);
                }
                Err(e)
            }
        }
    }

    /// Embed a query the way documents were embedded at build time.
    pub(crate) async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embedder()?.embed(&normalize_to_text(query)).await
    }

    async fn search_single(&self, method: Method, collection: &str, query: &str) -> Result<Vec<ScoredDoc>> {
        let k = self.config.top_k;
        if method == Method::Dense && self.embedder.is_none() {
            validate_collection(collection)?;
            return Err(EngineError::IndexNotFound { method, collection: collection.to_string() });
        }
        let index = self.load_index(method, collection).await?;
        let start = Instant::now();

        let hits = match method {
            Method::Dense => {
                let text = normalize_to_text(query);
                if text.is_empty() {
                    // nothing left to embed: zero relevance, same as the lexical methods
                    index
                        .as_dense()
                        .map(|dense| dense.doc_ids().iter().take(k).map(|id| ScoredDoc::new(id.clone(), 0.0)).collect())
                        .unwrap_or_default()
                } else {
                    let vector = self.embedder()?.embed(&text).await?;
                    let candidates = self.config.dense_candidates;
                    tokio::task::spawn_blocking(move || match index.as_dense() {
                        Some(dense) => dense.search_vector(&vector, candidates, k),
                        None => Ok(Vec::new()),
                    })
                    .await??
                }
            }
            _ => {
                let query = query.to_string();
                tokio::task::spawn_blocking(move || match &*index {
                    LoadedIndex::Tfidf(i) => i.search(&query, k),
                    LoadedIndex::Bm25(i) => i.search(&query, k),
                    LoadedIndex::Dense(_) => Vec::new(),
                })
                .await?
            }
        };
        debug!(%method, collection, hits = hits.len(), elapsed_us = start.elapsed().as_micros() as u64, "scored");
        Ok(hits)
    }

    /// Ranked `(doc_id, score)` for one method; `Hybrid` fuses `hybrid_methods`.
    pub async fn search_method(&self, method: Method, collection: &str, query: &str) -> Result<Vec<ScoredDoc>> {
        match method {
            Method::Hybrid => self.search_fused(collection, query, &self.config.hybrid_methods).await,
            single => self.search_single(single, collection, query).await,
        }
    }

    /// Run `methods` concurrently and fuse whatever succeeds in time.
    ///
    /// A method that errors or exceeds `method_timeout_ms` contributes nothing.
    /// Only when every method fails is the request an error.
    pub async fn search_fused(&self, collection: &str, query: &str, methods: &[Method]) -> Result<Vec<ScoredDoc>> {
        validate_collection(collection)?;
        let timeout = self.config.method_timeout();
        let timeout_ms = self.config.method_timeout_ms;

        let mut selected: Vec<Method> = Vec::new();
        for m in methods.iter().copied().filter(Method::is_single) {
            if !selected.contains(&m) {
                selected.push(m);
            }
        }

        let outcomes = join_all(selected.iter().map(|&method| async move {
            let outcome = match tokio::time::timeout(timeout, self.search_single(method, collection, query)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::UpstreamTimeout { method, timeout_ms }),
            };
            (method, outcome)
        }))
        .await;

        let mut ranked: Vec<(Method, Vec<ScoredDoc>)> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        for (method, outcome) in outcomes {
            match outcome {
                Ok(hits) => ranked.push((method, hits)),
                Err(e) => {
                    warn!(%method, collection, error = %e, "method dropped from fusion");
                    failures.push(format!("{method}: {e}"));
                }
            }
        }
        if ranked.is_empty() {
            return Err(EngineError::AllMethodsFailed { collection: collection.to_string(), failures });
        }
        Ok(fuse(&ranked, &self.config.weights, self.config.top_k))
    }

    /// Ranked hits with their document text, at most `top_k`.
    pub async fn search(&self, method: Method, collection: &str, query: &str) -> Result<Vec<SearchHit>> {
        let ranked = self.search_method(method, collection, query).await?;
        ranked
            .into_iter()
            .map(|r| {
                let doc_text = self.store.get_document_text(collection, &r.doc_id)?;
                Ok(SearchHit { doc_id: r.doc_id, doc_text, score: r.score })
            })
            .collect()
    }

    pub async fn expand_query(&self, query: &str) -> ExpandedQuery {
        ExpandedQuery { original: query.to_string(), expanded: self.expander.expand(query).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build_collection;
    use crate::embedding::HashEmbedder;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const DIM: usize = 128;

    fn abc() -> Vec<(String, String)> {
        vec![
            ("A".into(), "Machine learning basics".into()),
            ("B".into(), "Machine shop tools".into()),
            ("C".into(), "Cooking pasta at home".into()),
        ]
    }

    async fn engine_with(
        docs: Vec<(String, String)>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> (TempDir, SearchEngine) {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let store = DocumentStore::temporary().unwrap();
        let builder = HashEmbedder::new(DIM);
        build_collection(&paths, &store, "toy", docs, Some(&builder), 16).await.unwrap();
        let engine = SearchEngine::new(paths, store, Some(embedder), QueryExpander::disabled(), config);
        (dir, engine)
    }

    async fn engine() -> (TempDir, SearchEngine) {
        engine_with(abc(), Arc::new(HashEmbedder::new(DIM)), EngineConfig::default()).await
    }

    #[tokio::test]
    async fn tfidf_ranks_toy_scenario() {
        let (_dir, engine) = engine().await;
        let hits = engine.search(Method::Tfidf, "toy", "machine learning").await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(hits[2].score, 0.0);
        assert_eq!(hits[0].doc_text, "Machine learning basics");
    }

    #[tokio::test]
    async fn unbuilt_dense_collection_is_not_found() {
        let (_dir, engine) = engine().await;
        let err = engine.search(Method::Dense, "unbuilt_collection", "test").await.unwrap_err();
        assert!(matches!(err, EngineError::IndexNotFound { method: Method::Dense, .. }));
    }

    #[tokio::test]
    async fn dense_without_embedder_is_not_found() {
        let (dir, engine) = engine().await;
        let store = engine.store().clone();
        let engine = SearchEngine::new(IndexPaths::new(dir.path()), store, None, QueryExpander::disabled(), EngineConfig::default());
        let err = engine.search(Method::Dense, "toy", "machine").await.unwrap_err();
        assert!(matches!(err, EngineError::IndexNotFound { .. }));
    }

    #[tokio::test]
    async fn dense_rejects_other_model() {
        let (_dir, engine) =
            engine_with(abc(), Arc::new(HashEmbedder::new(DIM * 2)), EngineConfig::default()).await;
        let err = engine.search(Method::Dense, "toy", "machine").await.unwrap_err();
        assert!(matches!(err, EngineError::ModelMismatch { .. }));
    }

    #[tokio::test]
    async fn dense_scores_are_similarities() {
        let (_dir, engine) = engine().await;
        let hits = engine.search_method(Method::Dense, "toy", "machine learning basics").await.unwrap();
        assert_eq!(hits[0].doc_id, "A");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn hybrid_fuses_all_methods() {
        let (_dir, engine) = engine().await;
        let hits = engine.search(Method::Hybrid, "toy", "machine learning").await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].doc_id, "A");
        // A tops every list, so it gets every weight
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.iter().all(|h| (0.0..=1.0 + 1e-6).contains(&h.score)));
    }

    #[tokio::test]
    async fn single_document_collection_fuses_to_zero() {
        let docs = vec![("only".to_string(), "a lonely document".to_string())];
        let (_dir, engine) = engine_with(docs, Arc::new(HashEmbedder::new(DIM)), EngineConfig::default()).await;
        let hits = engine.search_method(Method::Hybrid, "toy", "lonely").await.unwrap();
        assert_eq!(hits, vec![ScoredDoc::new("only", 0.0)]);
    }

    #[tokio::test]
    async fn all_methods_failing_is_one_error() {
        let (_dir, engine) = engine().await;
        let err = engine.search(Method::Hybrid, "unbuilt_collection", "test").await.unwrap_err();
        match err {
            EngineError::AllMethodsFailed { failures, .. } => assert_eq!(failures.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    struct SlowEmbedder {
        inner: HashEmbedder,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(self.delay).await;
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize { self.inner.dimension() }

        fn model_id(&self) -> &str { self.inner.model_id() }
    }

    #[tokio::test]
    async fn slow_method_degrades_to_empty() {
        let slow = SlowEmbedder { inner: HashEmbedder::new(DIM), delay: Duration::from_secs(5) };
        let config = EngineConfig { method_timeout_ms: 200, ..EngineConfig::default() };
        let (_dir, engine) = engine_with(abc(), Arc::new(slow), config).await;

        let fused = engine.search_method(Method::Hybrid, "toy", "machine learning").await.unwrap();
        let lexical = engine
            .search_fused("toy", "machine learning", &[Method::Tfidf, Method::Bm25])
            .await
            .unwrap();
        assert_eq!(fused, lexical);

        let err = engine.search_fused("toy", "machine", &[Method::Dense]).await.unwrap_err();
        assert!(matches!(err, EngineError::AllMethodsFailed { .. }));
    }

    #[tokio::test]
    async fn concurrent_first_loads_share_one_index() {
        let (_dir, engine) = engine().await;
        let engine = Arc::new(engine);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.load_index(Method::Bm25, "toy").await.unwrap() })
            })
            .collect();
        let loaded: Vec<Arc<LoadedIndex>> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();
        assert!(loaded.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(engine.cached_indexes(), vec![(Method::Bm25, "toy".to_string())]);
    }

    #[tokio::test]
    async fn unknown_collections_leave_no_cache_entries() {
        let (_dir, engine) = engine().await;
        for i in 0..200 {
            let collection = format!("missing_{i}");
            assert!(engine.search(Method::Hybrid, &collection, "q").await.is_err());
        }
        assert!(engine.cache.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_load_is_evicted() {
        let (_dir, engine) =
            engine_with(abc(), Arc::new(HashEmbedder::new(DIM * 2)), EngineConfig::default()).await;
        assert!(engine.load_index(Method::Dense, "toy").await.is_err());
        assert!(engine.cache.lock().is_empty());
        engine.load_index(Method::Tfidf, "toy").await.unwrap();
        assert_eq!(engine.cache.lock().len(), 1);
    }

    #[tokio::test]
    async fn load_retries_after_collection_is_built() {
        let (_dir, engine) = engine().await;
        let err = engine.load_index(Method::Bm25, "later").await.unwrap_err();
        assert!(matches!(err, EngineError::IndexNotFound { .. }));

        let docs = vec![("x".to_string(), "built after the first request".to_string())];
        build_collection(&engine.paths, &engine.store, "later", docs, None, 16).await.unwrap();
        let loaded = engine.load_index(Method::Bm25, "later").await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn hybrid_without_dense_artifact_fuses_lexical_only() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let store = DocumentStore::temporary().unwrap();
        build_collection(&paths, &store, "toy", abc(), None, 16).await.unwrap();
        let engine = SearchEngine::new(
            paths,
            store,
            Some(Arc::new(HashEmbedder::new(DIM))),
            QueryExpander::disabled(),
            EngineConfig::default(),
        );

        let fused = engine.search_method(Method::Hybrid, "toy", "machine learning").await.unwrap();
        let lexical = engine
            .search_fused("toy", "machine learning", &[Method::Tfidf, Method::Bm25])
            .await
            .unwrap();
        assert_eq!(fused, lexical);
        assert_eq!(fused[0].doc_id, "A");
    }

    #[tokio::test]
    async fn stopword_query_has_zero_dense_relevance() {
        let (_dir, engine) = engine().await;
        let hits = engine.search_method(Method::Dense, "toy", "the of").await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.score == 0.0));
    }

    #[tokio::test]
    async fn empty_query_is_not_an_error() {
        let (_dir, engine) = engine().await;
        let hits = engine.search_method(Method::Bm25, "toy", "the of and").await.unwrap();
        assert!(hits.iter().all(|h| h.score == 0.0));
    }
}
