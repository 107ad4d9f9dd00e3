use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub type TermId = u32;
/// Position of a document in its collection's build order.
pub type DocIdx = u32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: DocIdx,
    pub weight: f32,
}

/// Retrieval method identifier. `Hybrid` is the composite of the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Tfidf,
    Bm25,
    Dense,
    Hybrid,
}

impl Method {
    /// Single methods in fusion merge order.
    pub const SINGLE: [Method; 3] = [Method::Dense, Method::Tfidf, Method::Bm25];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Tfidf => "tfidf",
            Method::Bm25 => "bm25",
            Method::Dense => "dense",
            Method::Hybrid => "hybrid",
        }
    }

    pub fn is_single(&self) -> bool { !matches!(self, Method::Hybrid) }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Method {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tfidf" => Ok(Method::Tfidf),
            "bm25" => Ok(Method::Bm25),
            // the semantic index was historically exposed as "bert"
            "dense" | "bert" => Ok(Method::Dense),
            "hybrid" => Ok(Method::Hybrid),
            other => Err(EngineError::UnknownMethod(other.to_string())),
        }
    }
}

/// A ranked `(doc_id, score)` pair. Score scale depends on the producing method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: String,
    pub score: f32,
}

impl ScoredDoc {
    pub fn new(doc_id: impl Into<String>, score: f32) -> Self {
        Self { doc_id: doc_id.into(), score }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub doc_text: String,
    pub score: f32,
}

/// Collection names double as directory and tree names.
pub fn validate_collection(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidCollection(name.to_string()))
    }
}

/// Top-k positions of a dense score vector, descending by score, ties by position.
pub fn rank_top_k(scores: &[f32], k: usize) -> Vec<(DocIdx, f32)> {
    if k == 0 || scores.is_empty() {
        return Vec::new();
    }
    let cmp = |a: &DocIdx, b: &DocIdx| -> Ordering {
        scores[*b as usize]
            .total_cmp(&scores[*a as usize])
            .then_with(|| a.cmp(b))
    };
    let mut order: Vec<DocIdx> = (0..scores.len() as DocIdx).collect();
    if order.len() > k {
        order.select_nth_unstable_by(k - 1, cmp);
        order.truncate(k);
    }
    order.sort_by(cmp);
    order.into_iter().map(|i| (i, scores[i as usize])).collect()
}
