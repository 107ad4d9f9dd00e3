use crate::bm25::Bm25Index;
use crate::dense::DenseIndex;
use crate::error::{EngineError, Result};
use crate::expansion::VocabularyIndex;
use crate::index::{validate_collection, Method};
use crate::tfidf::TfIdfIndex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub collection: String,
    pub num_docs: u32,
    pub created_at: String,
    pub version: u32,
    /// Absent when the dense index was not built.
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub dimension: Option<usize>,
}

/// Layout of an index directory.
///
/// ```text
/// <root>/docstore/            sled document store
/// <root>/vocabulary.bin       global vocabulary embeddings
/// <root>/<collection>/tfidf.bin
/// <root>/<collection>/bm25.bin
/// <root>/<collection>/dense.bin
/// <root>/<collection>/meta.json
/// ```
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn collection_dir(&self, collection: &str) -> PathBuf { self.root.join(collection) }

    pub fn artifact(&self, method: Method, collection: &str) -> PathBuf {
        let file = match method {
            Method::Tfidf => "tfidf.bin",
            Method::Bm25 => "bm25.bin",
            Method::Dense | Method::Hybrid => "dense.bin",
        };
        self.collection_dir(collection).join(file)
    }

    pub fn meta(&self, collection: &str) -> PathBuf { self.collection_dir(collection).join("meta.json") }

    pub fn vocabulary(&self) -> PathBuf { self.root.join("vocabulary.bin") }

    pub fn docstore(&self) -> PathBuf { self.root.join("docstore") }

    pub fn has_artifact(&self, method: Method, collection: &str) -> bool {
        validate_collection(collection).is_ok() && self.artifact(method, collection).is_file()
    }

    /// Collections with a `meta.json`, sorted.
    pub fn collections(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_collection(&name).is_ok() && self.meta(&name).is_file() {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Write to `<path>.tmp`, then rename over `path`.
fn write_atomic(path: &Path, write: impl FnOnce(&mut BufWriter<File>) -> Result<()>) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        write(&mut w)?;
        w.flush()?;
        w.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn save_bin<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |w| Ok(bincode::serialize_into(w, value)?))
}

fn load_bin<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    bincode::deserialize_from(reader).map_err(|e| EngineError::CorruptIndex {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn load_artifact<T: DeserializeOwned>(paths: &IndexPaths, method: Method, collection: &str) -> Result<T> {
    validate_collection(collection)?;
    let path = paths.artifact(method, collection);
    if !path.is_file() {
        return Err(EngineError::IndexNotFound { method, collection: collection.to_string() });
    }
    load_bin(&path)
}

pub fn save_tfidf(paths: &IndexPaths, collection: &str, index: &TfIdfIndex) -> Result<()> {
    save_bin(&paths.artifact(Method::Tfidf, collection), index)
}

pub fn load_tfidf(paths: &IndexPaths, collection: &str) -> Result<TfIdfIndex> {
    load_artifact(paths, Method::Tfidf, collection)
}

pub fn save_bm25(paths: &IndexPaths, collection: &str, index: &Bm25Index) -> Result<()> {
    save_bin(&paths.artifact(Method::Bm25, collection), index)
}

pub fn load_bm25(paths: &IndexPaths, collection: &str) -> Result<Bm25Index> {
    load_artifact(paths, Method::Bm25, collection)
}

pub fn save_dense(paths: &IndexPaths, collection: &str, index: &DenseIndex) -> Result<()> {
    save_bin(&paths.artifact(Method::Dense, collection), index)
}

pub fn load_dense(paths: &IndexPaths, collection: &str) -> Result<DenseIndex> {
    let index: DenseIndex = load_artifact(paths, Method::Dense, collection)?;
    index.validate().map_err(|reason| EngineError::CorruptIndex {
        path: paths.artifact(Method::Dense, collection).display().to_string(),
        reason,
    })?;
    Ok(index)
}

pub fn save_vocabulary(paths: &IndexPaths, vocab: &VocabularyIndex) -> Result<()> {
    save_bin(&paths.vocabulary(), vocab)
}

pub fn load_vocabulary(paths: &IndexPaths) -> Result<VocabularyIndex> {
    let path = paths.vocabulary();
    if !path.is_file() {
        return Err(EngineError::EmbeddingUnavailable(format!("no vocabulary index at {}", path.display())));
    }
    let vocab: VocabularyIndex = load_bin(&path)?;
    vocab
        .validate()
        .map_err(|reason| EngineError::CorruptIndex { path: path.display().to_string(), reason })?;
    Ok(vocab)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    write_atomic(&paths.meta(&meta.collection), |w| {
        serde_json::to_writer_pretty(&mut *w, meta)?;
        Ok(())
    })
}

pub fn load_meta(paths: &IndexPaths, collection: &str) -> Result<MetaFile> {
    validate_collection(collection)?;
    let reader = BufReader::new(File::open(paths.meta(collection))?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
