//! Sparse TF-IDF vector space.
//!
//! Weights follow the usual smoothed formulation: raw term counts,
//! `idf = ln((1 + N) / (1 + df)) + 1`, and L2-normalized document and query
//! vectors, so a query score is the cosine between the two.

use crate::index::{rank_top_k, DocIdx, Posting, ScoredDoc, TermId};
use crate::tokenizer::normalize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfIdfIndex {
    vocabulary: HashMap<String, TermId>,
    idf: Vec<f32>,
    /// postings per term id, sorted by doc
    postings: Vec<Vec<Posting>>,
    doc_ids: Vec<String>,
}

impl TfIdfIndex {
    /// Build from `(doc_id, normalized terms)` in collection order. The vocabulary is frozen afterwards.
    pub fn build<I>(docs: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut doc_ids = Vec::new();
        let mut raw: BTreeMap<String, Vec<(DocIdx, u32)>> = BTreeMap::new();
        for (doc_id, terms) in docs {
            let doc = doc_ids.len() as DocIdx;
            doc_ids.push(doc_id);
            let mut counts: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *counts.entry(term).or_insert(0) += 1;
            }
            for (term, tf) in counts {
                raw.entry(term).or_default().push((doc, tf));
            }
        }

        let n = doc_ids.len() as f32;
        let mut vocabulary = HashMap::with_capacity(raw.len());
        let mut idf = Vec::with_capacity(raw.len());
        let mut postings: Vec<Vec<Posting>> = Vec::with_capacity(raw.len());
        let mut doc_norms = vec![0.0f32; doc_ids.len()];

        // BTreeMap iteration gives lexicographic term ids
        for (term_id, (term, mut plist)) in raw.into_iter().enumerate() {
            let df = plist.len() as f32;
            let term_idf = ((1.0 + n) / (1.0 + df)).ln() + 1.0;
            plist.sort_by_key(|(doc, _)| *doc);
            let weighted: Vec<Posting> = plist
                .into_iter()
                .map(|(doc, tf)| {
                    let weight = tf as f32 * term_idf;
                    doc_norms[doc as usize] += weight * weight;
                    Posting { doc, weight }
                })
                .collect();
            vocabulary.insert(term, term_id as TermId);
            idf.push(term_idf);
            postings.push(weighted);
        }

        for norm in doc_norms.iter_mut() {
            *norm = norm.sqrt();
            if *norm == 0.0 { *norm = 1.0; }
        }
        for plist in postings.iter_mut() {
            for p in plist.iter_mut() {
                p.weight /= doc_norms[p.doc as usize];
            }
        }

        Self { vocabulary, idf, postings, doc_ids }
    }

    pub fn num_docs(&self) -> usize { self.doc_ids.len() }

    pub fn num_terms(&self) -> usize { self.vocabulary.len() }

    pub fn doc_ids(&self) -> &[String] { &self.doc_ids }

    /// L2-normalized query weights. Terms outside the vocabulary are dropped.
    pub fn query_vector(&self, terms: &[String]) -> HashMap<TermId, f32> {
        let mut weights: HashMap<TermId, f32> = HashMap::new();
        for term in terms {
            if let Some(&tid) = self.vocabulary.get(term) {
                *weights.entry(tid).or_insert(0.0) += self.idf[tid as usize];
            }
        }
        let norm = weights.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for w in weights.values_mut() { *w /= norm; }
        }
        weights
    }

    /// Dot product of the query against every document vector.
    pub fn score_terms(&self, terms: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_ids.len()];
        for (tid, q_w) in self.query_vector(terms) {
            for p in &self.postings[tid as usize] {
                scores[p.doc as usize] += p.weight * q_w;
            }
        }
        scores
    }

    /// Normalize `query`, score every document, return the top `k`.
    ///
    /// A query with no known terms scores every document 0.0, so the first
    /// `k` documents in build order come back.
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredDoc> {
        let scores = self.score_terms(&normalize(query));
        rank_top_k(&scores, k)
            .into_iter()
            .map(|(doc, score)| ScoredDoc::new(self.doc_ids[doc as usize].clone(), score))
            .collect()
    }
}
