//! Weighted min-max score fusion.
//!
//! Each method's list is scaled to [0, 1] on its own, multiplied by the
//! method weight, and summed per document. A document a method did not
//! return gets nothing from that method.

use crate::index::{Method, ScoredDoc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-method fusion weights. They are expected to sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub dense: f32,
    pub tfidf: f32,
    pub bm25: f32,
}

impl Default for FusionWeights {
    fn default() -> Self { Self { dense: 0.5, tfidf: 0.2, bm25: 0.3 } }
}

impl FusionWeights {
    pub fn weight(&self, method: Method) -> f32 {
        match method {
            Method::Dense => self.dense,
            Method::Tfidf => self.tfidf,
            Method::Bm25 => self.bm25,
            Method::Hybrid => 0.0,
        }
    }

    pub fn total(&self) -> f32 { self.dense + self.tfidf + self.bm25 }

    pub fn sums_to_one(&self) -> bool { (self.total() - 1.0).abs() < 1e-4 }
}

/// Min-max scale a ranked list onto [0, 1].
///
/// When every score is equal (including a single-item list) all items get 0.0.
pub fn min_max_normalize(results: &[ScoredDoc]) -> Vec<f32> {
    if results.is_empty() {
        return Vec::new();
    }
    let (min, max) = results
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), r| (lo.min(r.score), hi.max(r.score)));
    if max == min {
        return vec![0.0; results.len()];
    }
    let range = max - min;
    results.iter().map(|r| (r.score - min) / range).collect()
}

/// Merge per-method lists by document id, in the given method order.
///
/// Ties in the fused score keep first-encountered order.
pub fn fuse(ranked: &[(Method, Vec<ScoredDoc>)], weights: &FusionWeights, k: usize) -> Vec<ScoredDoc> {
    let mut merged: Vec<ScoredDoc> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();

    for (method, results) in ranked {
        let weight = weights.weight(*method);
        for (result, norm) in results.iter().zip(min_max_normalize(results)) {
            let i = *slot.entry(result.doc_id.clone()).or_insert_with(|| {
                merged.push(ScoredDoc::new(result.doc_id.clone(), 0.0));
                merged.len() - 1
            });
            merged[i].score += norm * weight;
        }
    }

    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[(&str, f32)]) -> Vec<ScoredDoc> {
        items.iter().map(|(id, s)| ScoredDoc::new(*id, *s)).collect()
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!(FusionWeights::default().sums_to_one());
    }

    #[test]
    fn min_max_scales_to_unit_interval() {
        let n = min_max_normalize(&list(&[("a", 12.0), ("b", 7.0), ("c", 2.0)]));
        assert_eq!(n, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn degenerate_lists_normalize_to_zero() {
        assert_eq!(min_max_normalize(&list(&[("only", 3.7)])), vec![0.0]);
        assert_eq!(min_max_normalize(&list(&[("a", 1.0), ("b", 1.0)])), vec![0.0, 0.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn dense_only_document_gets_dense_weight() {
        let ranked = vec![
            (Method::Dense, list(&[("x", 0.93), ("y", 0.41)])),
            (Method::Tfidf, list(&[("y", 0.8), ("z", 0.2)])),
            (Method::Bm25, list(&[("z", 9.0), ("y", 3.0)])),
        ];
        let fused = fuse(&ranked, &FusionWeights::default(), 10);
        let x = fused.iter().find(|d| d.doc_id == "x").unwrap();
        assert!((x.score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn fused_score_is_weighted_sum() {
        let w = FusionWeights::default();
        let ranked = vec![
            (Method::Dense, list(&[("a", 0.9), ("b", 0.7), ("c", 0.5)])),
            (Method::Tfidf, list(&[("b", 0.6), ("a", 0.3), ("d", 0.0)])),
            (Method::Bm25, list(&[("d", 4.0), ("b", 2.0), ("a", 0.0)])),
        ];
        let fused = fuse(&ranked, &w, 10);
        let score = |id: &str| fused.iter().find(|d| d.doc_id == id).unwrap().score;
        // a: dense 1.0, tfidf 0.5, bm25 0.0
        assert!((score("a") - (0.5 * 1.0 + 0.2 * 0.5)).abs() < 1e-6);
        // b: dense 0.5, tfidf 1.0, bm25 0.5
        assert!((score("b") - (0.5 * 0.5 + 0.2 * 1.0 + 0.3 * 0.5)).abs() < 1e-6);
        assert!((score("d") - 0.3).abs() < 1e-6);
        assert!(fused.windows(2).all(|p| p[0].score >= p[1].score));
    }

    #[test]
    fn ties_keep_first_encountered_order() {
        let ranked = vec![
            (Method::Tfidf, list(&[("p", 1.0), ("q", 0.0)])),
            (Method::Bm25, list(&[("r", 5.0), ("s", 5.0)])),
        ];
        let fused = fuse(&ranked, &FusionWeights::default(), 10);
        let ids: Vec<&str> = fused.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["p", "q", "r", "s"]);
    }

    #[test]
    fn truncates_to_k() {
        let many: Vec<ScoredDoc> = (0..30).map(|i| ScoredDoc::new(format!("d{i}"), i as f32)).collect();
        assert_eq!(fuse(&[(Method::Dense, many)], &FusionWeights::default(), 10).len(), 10);
    }
}
