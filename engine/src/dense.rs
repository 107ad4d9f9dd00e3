//! Exact nearest-neighbour search over fixed-dimension embeddings.
//!
//! Distances are squared L2, so for unit-normalized vectors
//! `cosine = 1 - d / 2` (see [`l2_to_similarity`]).

use crate::error::{EngineError, Result};
use crate::index::ScoredDoc;
use serde::{Deserialize, Serialize};

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cosine similarity recovered from a squared L2 distance between unit vectors.
pub fn l2_to_similarity(squared_distance: f32) -> f32 { 1.0 - squared_distance / 2.0 }

/// Row-major flat vector storage searched by brute force.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Self { Self { dimension, data: Vec::new() } }

    pub fn dimension(&self) -> usize { self.dimension }

    pub fn len(&self) -> usize {
        if self.dimension == 0 { 0 } else { self.data.len() / self.dimension }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// The `k` nearest positions as `(position, squared distance)`, closest first, ties by position.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(pos, row)| (pos, squared_l2(row, query)))
            .collect();
        let cmp = |a: &(usize, f32), b: &(usize, f32)| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0));
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, cmp);
            scored.truncate(k);
        }
        scored.sort_by(cmp);
        Ok(scored)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch { expected: self.dimension, actual: vector.len() });
        }
        Ok(())
    }
}

/// Per-collection dense index. Vector position `i` belongs to `doc_ids[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseIndex {
    model: String,
    doc_ids: Vec<String>,
    vectors: FlatL2Index,
}

impl DenseIndex {
    pub fn new(dimension: usize, model: impl Into<String>) -> Self {
        Self { model: model.into(), doc_ids: Vec::new(), vectors: FlatL2Index::new(dimension) }
    }

    pub fn push(&mut self, doc_id: impl Into<String>, vector: &[f32]) -> Result<()> {
        self.vectors.add(vector)?;
        self.doc_ids.push(doc_id.into());
        Ok(())
    }

    pub fn model(&self) -> &str { &self.model }

    pub fn dimension(&self) -> usize { self.vectors.dimension() }

    pub fn len(&self) -> usize { self.doc_ids.len() }

    pub fn is_empty(&self) -> bool { self.doc_ids.is_empty() }

    pub fn doc_ids(&self) -> &[String] { &self.doc_ids }

    /// Checks the position/identifier pairing after a load.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.vectors.len() != self.doc_ids.len() {
            return Err(format!("{} vectors for {} document ids", self.vectors.len(), self.doc_ids.len()));
        }
        Ok(())
    }

    /// Nearest `candidates` by distance, re-ranked by similarity, top `k` kept.
    pub fn search_vector(&self, query: &[f32], candidates: usize, k: usize) -> Result<Vec<ScoredDoc>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<ScoredDoc> = self
            .vectors
            .search(query, candidates.max(k))?
            .into_iter()
            .filter_map(|(pos, dist)| {
                self.doc_ids.get(pos).map(|id| ScoredDoc::new(id.clone(), l2_to_similarity(dist)))
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    /// Nearest `k` as `(doc_id, squared distance)`, closest first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(&str, f32)>> {
        Ok(self
            .vectors
            .search(query, k)?
            .into_iter()
            .filter_map(|(pos, dist)| self.doc_ids.get(pos).map(|id| (id.as_str(), dist)))
            .collect())
    }
}
