//! Corpus readers: ANTIQUE-style TSV and BEIR-style JSONL.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `doc_id<TAB>text` per line
    Tsv,
    /// `{"_id": ..., "text": ...}` per line
    Jsonl,
}

impl FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tsv" | "txt" => Ok(Format::Tsv),
            "jsonl" | "json" => Ok(Format::Jsonl),
            other => bail!("unknown corpus format '{other}' (expected tsv or jsonl)"),
        }
    }
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(|e| e.parse().ok())
    }
}

#[derive(Debug, Default)]
pub struct Corpus {
    /// `(doc_id, raw_text)` in file order
    pub documents: Vec<(String, String)>,
    pub skipped: usize,
}

#[derive(Deserialize)]
struct JsonlDoc {
    #[serde(rename = "_id")]
    id: serde_json::Value,
    #[serde(default)]
    text: String,
}

fn parse_tsv_line(line: &str) -> Option<(String, String)> {
    let (id, text) = line.split_once('\t')?;
    let (id, text) = (id.trim(), text.trim());
    if id.is_empty() || text.is_empty() {
        return None;
    }
    Some((id.to_string(), text.to_string()))
}

fn parse_jsonl_line(line: &str) -> Option<(String, String)> {
    let doc: JsonlDoc = serde_json::from_str(line).ok()?;
    let id = match doc.id {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if id.is_empty() || doc.text.trim().is_empty() {
        return None;
    }
    Some((id, doc.text))
}

/// Read one file, skipping (and counting) malformed lines.
pub fn read_file(path: &Path, format: Format, corpus: &mut Corpus) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = match format {
            Format::Tsv => parse_tsv_line(&line),
            Format::Jsonl => parse_jsonl_line(&line),
        };
        match parsed {
            Some(doc) => corpus.documents.push(doc),
            None => corpus.skipped += 1,
        }
    }
    Ok(())
}

/// Read a file or every matching file under a directory (sorted by path).
///
/// `format` forces the format; otherwise it is taken from each file's extension.
pub fn read_corpus(input: &Path, format: Option<Format>) -> Result<Corpus> {
    let mut files: Vec<(PathBuf, Format)> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if !p.is_file() {
                continue;
            }
            if let Some(f) = Format::from_path(p) {
                if format.map_or(true, |forced| forced == f) {
                    files.push((p.to_path_buf(), f));
                }
            }
        }
    } else if input.is_file() {
        let f = match format.or_else(|| Format::from_path(input)) {
            Some(f) => f,
            None => bail!("cannot infer corpus format of {}; pass --format", input.display()),
        };
        files.push((input.to_path_buf(), f));
    } else {
        bail!("input {} does not exist", input.display());
    }

    let mut corpus = Corpus::default();
    for (path, f) in files {
        tracing::debug!(path = %path.display(), format = ?f, "reading corpus file");
        read_file(&path, f, &mut corpus)?;
    }
    Ok(corpus)
}
