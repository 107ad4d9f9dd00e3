//! Document store: raw and normalized text per document, one sled tree per collection.

use crate::error::Result;
use crate::index::validate_collection;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub raw_text: String,
    pub normalized_text: String,
}

/// Cheap to clone; clones share the same database.
#[derive(Clone)]
pub struct DocumentStore {
    db: sled::Db,
}

impl DocumentStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self { db: sled::open(path)? })
    }

    /// In-memory store removed on drop.
    pub fn temporary() -> Result<Self> {
        Ok(Self { db: sled::Config::new().temporary(true).open()? })
    }

    fn tree(&self, collection: &str) -> Result<sled::Tree> {
        validate_collection(collection)?;
        Ok(self.db.open_tree(collection)?)
    }

    pub fn insert(&self, collection: &str, doc_id: &str, record: &DocumentRecord) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        self.tree(collection)?.insert(doc_id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get(&self, collection: &str, doc_id: &str) -> Result<Option<DocumentRecord>> {
        match self.tree(collection)?.get(doc_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Raw text of a document, or an empty string when it is unknown.
    pub fn get_document_text(&self, collection: &str, doc_id: &str) -> Result<String> {
        Ok(self.get(collection, doc_id)?.map(|r| r.raw_text).unwrap_or_default())
    }

    pub fn len(&self, collection: &str) -> Result<usize> {
        Ok(self.tree(collection)?.len())
    }

    pub fn is_empty(&self, collection: &str) -> Result<bool> {
        Ok(self.len(collection)? == 0)
    }

    /// Collections with at least one tree, sorted.
    pub fn collections(&self) -> Vec<String> {
        let default = self.db.name();
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .into_iter()
            .filter(|n| *n != default)
            .filter_map(|n| String::from_utf8(n.to_vec()).ok())
            .filter(|n| validate_collection(n).is_ok())
            .collect();
        names.sort();
        names
    }

    /// Every `(doc_id, record)` of a collection, in key order.
    pub fn records(&self, collection: &str) -> Result<Vec<(String, DocumentRecord)>> {
        let mut out = Vec::new();
        for entry in self.tree(collection)?.iter() {
            let (key, value) = entry?;
            let doc_id = String::from_utf8_lossy(&key).into_owned();
            out.push((doc_id, bincode::deserialize(&value)?));
        }
        Ok(out)
    }

    pub fn clear_collection(&self, collection: &str) -> Result<()> {
        self.tree(collection)?.clear()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
