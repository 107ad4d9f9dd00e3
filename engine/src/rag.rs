//! Retrieval-augmented answering over the dense indexes.

use crate::error::{EngineError, Result};
use crate::search::SearchEngine;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Answer briefly and concisely. Be direct and use only the relevant context below:\n\n{context}\n\nQuestion: {question}\nAnswer:";

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{(context|question)\}").expect("valid regex");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPassage {
    pub collection: String,
    pub doc_id: String,
    pub text: String,
    /// Squared L2 distance to the question embedding.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<ContextPassage>,
}

/// A text-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Fill `{context}` (passages separated by a blank line) and `{question}` in one pass.
pub fn build_prompt(template: &str, passages: &[ContextPassage], question: &str) -> String {
    let context = passages.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("\n\n");
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "context" => context.clone(),
            _ => question.to_string(),
        })
        .into_owned()
}

impl SearchEngine {
    /// Nearest passages from every configured collection, closest first.
    ///
    /// A collection without a usable dense index is skipped. If none can be
    /// searched the last error is returned.
    pub async fn retrieve_context(&self, question: &str) -> Result<Vec<ContextPassage>> {
        let rag = &self.config().rag;
        let vector = self.embed_query(question).await?;

        let mut passages: Vec<ContextPassage> = Vec::new();
        let mut searched = 0usize;
        let mut last_err: Option<EngineError> = None;
        for collection in &rag.collections {
            let index = match self.load_index(crate::index::Method::Dense, collection).await {
                Ok(index) => index,
                Err(e) => {
                    warn!(collection = %collection, error = %e, "skipping collection for chat context");
                    last_err = Some(e);
                    continue;
                }
            };
            if index.as_dense().is_none() {
                continue;
            }
            searched += 1;
            let query = vector.clone();
            let k = rag.per_collection;
            let nearest = tokio::task::spawn_blocking(move || -> Result<Vec<(String, f32)>> {
                let Some(dense) = index.as_dense() else { return Ok(Vec::new()) };
                Ok(dense.nearest(&query, k)?.into_iter().map(|(id, d)| (id.to_string(), d)).collect())
            })
            .await??;
            for (doc_id, distance) in nearest {
                let text = self.store().get_document_text(collection, &doc_id)?;
                passages.push(ContextPassage { collection: collection.clone(), doc_id, text, distance });
            }
        }
        if searched == 0 {
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        passages.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        debug!(passages = passages.len(), searched, "retrieved chat context");
        Ok(passages)
    }

    pub async fn answer(&self, chat: &dyn ChatModel, question: &str) -> Result<RagAnswer> {
        let sources = self.retrieve_context(question).await?;
        let prompt = build_prompt(&self.config().rag.prompt_template, &sources, question);
        let answer = chat.complete(&prompt).await?;
        info!(sources = sources.len(), answer_len = answer.len(), "answered question");
        Ok(RagAnswer { answer: answer.trim().to_string(), sources })
    }
}
