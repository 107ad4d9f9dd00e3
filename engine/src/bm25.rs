//! Okapi BM25 over normalized document terms.

use crate::index::{rank_top_k, DocIdx, ScoredDoc, TermId};
use crate::tokenizer::normalize;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    /// Floor for negative IDF values, as a fraction of the mean IDF.
    pub epsilon: f32,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: 1.5, b: 0.75, epsilon: 0.25 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    params: Bm25Params,
    terms: HashMap<String, TermId>,
    idf: Vec<f32>,
    /// `(doc, term frequency)` per term id, sorted by doc
    postings: Vec<Vec<(DocIdx, u32)>>,
    doc_len: Vec<u32>,
    avgdl: f32,
    doc_ids: Vec<String>,
}

impl Bm25Index {
    pub fn build<I>(docs: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        Self::build_with(docs, Bm25Params::default())
    }

    pub fn build_with<I>(docs: I, params: Bm25Params) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut doc_ids = Vec::new();
        let mut doc_len = Vec::new();
        let mut terms: HashMap<String, TermId> = HashMap::new();
        let mut postings: Vec<Vec<(DocIdx, u32)>> = Vec::new();

        for (doc_id, tokens) in docs {
            let doc = doc_ids.len() as DocIdx;
            doc_ids.push(doc_id);
            doc_len.push(tokens.len() as u32);
            let mut counts: HashMap<TermId, u32> = HashMap::new();
            for token in tokens {
                let next = terms.len() as TermId;
                let tid = *terms.entry(token).or_insert_with(|| {
                    postings.push(Vec::new());
                    next
                });
                *counts.entry(tid).or_insert(0) += 1;
            }
            for (tid, tf) in counts {
                postings[tid as usize].push((doc, tf));
            }
        }

        let n = doc_ids.len() as f32;
        let total_len: u64 = doc_len.iter().map(|l| *l as u64).sum();
        let avgdl = if doc_ids.is_empty() { 0.0 } else { total_len as f32 / n };

        let mut idf: Vec<f32> = postings
            .iter()
            .map(|plist| {
                let df = plist.len() as f32;
                (n - df + 0.5).ln() - (df + 0.5).ln()
            })
            .collect();
        if !idf.is_empty() {
            let mean = idf.iter().sum::<f32>() / idf.len() as f32;
            let floor = params.epsilon * mean;
            for v in idf.iter_mut() {
                if *v < 0.0 { *v = floor; }
            }
        }
        for plist in postings.iter_mut() {
            plist.sort_by_key(|(doc, _)| *doc);
        }

        Self { params, terms, idf, postings, doc_len, avgdl, doc_ids }
    }

    pub fn num_docs(&self) -> usize { self.doc_ids.len() }

    pub fn num_terms(&self) -> usize { self.terms.len() }

    pub fn avgdl(&self) -> f32 { self.avgdl }

    pub fn doc_ids(&self) -> &[String] { &self.doc_ids }

    /// BM25 score of every document. Each query token counts once per occurrence.
    pub fn score_terms(&self, query: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_ids.len()];
        let Bm25Params { k1, b, .. } = self.params;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };
        for token in query {
            let Some(&tid) = self.terms.get(token) else { continue };
            let idf = self.idf[tid as usize];
            for &(doc, tf) in &self.postings[tid as usize] {
                let tf = tf as f32;
                let dl = self.doc_len[doc as usize] as f32;
                scores[doc as usize] += idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / avgdl));
            }
        }
        scores
    }

    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredDoc> {
        let scores = self.score_terms(&normalize(query));
        rank_top_k(&scores, k)
            .into_iter()
            .map(|(doc, score)| ScoredDoc::new(self.doc_ids[doc as usize].clone(), score))
            .collect()
    }
}
