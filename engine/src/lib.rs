//! Multi-method retrieval engine: TF-IDF, BM25 and dense vector search over
//! named document collections, min-max score fusion, and embedding-based
//! query expansion.

pub mod bm25;
pub mod build;
pub mod config;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod expansion;
pub mod fusion;
pub mod index;
pub mod persist;
pub mod rag;
pub mod search;
pub mod store;
pub mod tfidf;
pub mod tokenizer;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use index::{DocIdx, Method, Posting, ScoredDoc, SearchHit, TermId};
pub use search::SearchEngine;
