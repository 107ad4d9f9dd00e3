//! Offline index construction.
//!
//! Each document is normalized exactly once; the same token stream feeds
//! TF-IDF, BM25 and the dense embedder, and the joined tokens are what the
//! document store keeps as `normalized_text`.

use crate::bm25::Bm25Index;
use crate::dense::DenseIndex;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::expansion::VocabularyIndex;
use crate::index::validate_collection;
use crate::persist::{self, IndexPaths, MetaFile, FORMAT_VERSION};
use crate::store::{DocumentRecord, DocumentStore};
use crate::tfidf::TfIdfIndex;
use crate::tokenizer::normalize;
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub collection: String,
    pub num_docs: usize,
    pub num_terms: usize,
    pub duplicates_skipped: usize,
    /// Model id of the dense index, when one was built.
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VocabularyReport {
    pub num_words: usize,
    pub embedding_model: String,
}

async fn embed_in_batches(
    embedder: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for (n, chunk) in texts.chunks(batch_size.max(1)).enumerate() {
        let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
        let vectors = embedder.embed_batch(&refs).await?;
        if vectors.len() != refs.len() {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "embedded {} of {} texts in batch {n}",
                vectors.len(),
                refs.len()
            )));
        }
        out.extend(vectors);
        debug!(batch = n, done = out.len(), total = texts.len(), "embedded batch");
    }
    Ok(out)
}

/// Replace a collection: refill its store tree, then build and persist every index.
///
/// Documents are `(doc_id, raw_text)` in collection order. Without an
/// embedder the dense index is not built and dense queries on this collection
/// report `IndexNotFound`.
pub async fn build_collection<I>(
    paths: &IndexPaths,
    store: &DocumentStore,
    collection: &str,
    documents: I,
    embedder: Option<&dyn EmbeddingProvider>,
    batch_size: usize,
) -> Result<BuildReport>
where
    I: IntoIterator<Item = (String, String)>,
{
    validate_collection(collection)?;
    let start = Instant::now();
    store.clear_collection(collection)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut duplicates_skipped = 0usize;
    let mut tokenized: Vec<(String, Vec<String>)> = Vec::new();
    for (doc_id, raw_text) in documents {
        if !seen.insert(doc_id.clone()) {
            duplicates_skipped += 1;
            continue;
        }
        let tokens = normalize(&raw_text);
        let record = DocumentRecord { raw_text, normalized_text: tokens.join(" ") };
        store.insert(collection, &doc_id, &record)?;
        tokenized.push((doc_id, tokens));
    }
    store.flush()?;
    if duplicates_skipped > 0 {
        warn!(collection, duplicates_skipped, "duplicate document ids ignored");
    }
    info!(collection, num_docs = tokenized.len(), "stored documents");

    let tfidf = TfIdfIndex::build(tokenized.iter().cloned());
    persist::save_tfidf(paths, collection, &tfidf)?;
    let bm25 = Bm25Index::build(tokenized.iter().cloned());
    persist::save_bm25(paths, collection, &bm25)?;
    info!(collection, num_terms = tfidf.num_terms(), avgdl = bm25.avgdl(), "lexical indexes written");

    let mut meta = MetaFile {
        collection: collection.to_string(),
        num_docs: tokenized.len() as u32,
        created_at: persist::now_rfc3339(),
        version: FORMAT_VERSION,
        embedding_model: None,
        dimension: None,
    };

    if let Some(embedder) = embedder {
        let texts: Vec<String> = tokenized.iter().map(|(_, tokens)| tokens.join(" ")).collect();
        let vectors = embed_in_batches(embedder, &texts, batch_size).await?;
        let mut dense = DenseIndex::new(embedder.dimension(), embedder.model_id());
        for ((doc_id, _), vector) in tokenized.iter().zip(&vectors) {
            dense.push(doc_id.clone(), vector)?;
        }
        persist::save_dense(paths, collection, &dense)?;
        info!(collection, vectors = dense.len(), model = embedder.model_id(), "dense index written");
        meta.embedding_model = Some(embedder.model_id().to_string());
        meta.dimension = Some(embedder.dimension());
    }

    persist::save_meta(paths, &meta)?;
    info!(collection, elapsed_ms = start.elapsed().as_millis() as u64, "collection build complete");

    Ok(BuildReport {
        collection: collection.to_string(),
        num_docs: tokenized.len(),
        num_terms: tfidf.num_terms(),
        duplicates_skipped,
        embedding_model: meta.embedding_model,
    })
}

/// Embed the union of every listed collection's normalized terms into the global vocabulary index.
pub async fn build_vocabulary(
    paths: &IndexPaths,
    store: &DocumentStore,
    collections: &[String],
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<VocabularyReport> {
    let mut words: BTreeSet<String> = BTreeSet::new();
    for collection in collections {
        for (_, record) in store.records(collection)? {
            words.extend(record.normalized_text.split_whitespace().map(str::to_string));
        }
    }
    let words: Vec<String> = words.into_iter().collect();
    info!(collections = collections.len(), words = words.len(), "embedding vocabulary");

    let vectors = embed_in_batches(embedder, &words, batch_size).await?;
    let mut vocab = VocabularyIndex::new(embedder.dimension(), embedder.model_id());
    for (word, vector) in words.iter().zip(&vectors) {
        vocab.push(word.clone(), vector)?;
    }
    persist::save_vocabulary(paths, &vocab)?;
    info!(words = vocab.len(), model = embedder.model_id(), "vocabulary index written");

    Ok(VocabularyReport { num_words: vocab.len(), embedding_model: embedder.model_id().to_string() })
}
