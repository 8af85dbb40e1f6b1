//! Index Manager
//!
//! Walks configured KB trees, parses Markdown + frontmatter into entries,
//! upserts them into the store, and enqueues each for embedding. Also the
//! write path for creating and deleting entries through their source files.

mod document;

use std::path::{Path, PathBuf};

pub use document::{entry_from_document, extract_wikilinks, parse_document, Document, DocumentError};

use crate::config::{Config, KbConfig};
use crate::model::{Entry, IndexStats};
use crate::storage::{Store, StoreError};

/// Index error
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// KB is not in the configuration
    #[error("KB not found: {0}")]
    KbNotFound(String),
    /// Write attempted on a read-only KB
    #[error("KB is read-only: {0}")]
    KbReadOnly(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Fields for a new entry created through the service (rather than
/// ingested from an existing file).
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub id: String,
    pub title: String,
    pub entry_type: String,
    pub date: Option<String>,
    pub importance: Option<i64>,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub tags: Vec<String>,
}

/// Service for building and maintaining the index from KB source trees.
pub struct IndexManager<'a> {
    store: &'a Store,
    config: &'a Config,
}

impl<'a> IndexManager<'a> {
    pub fn new(store: &'a Store, config: &'a Config) -> Self {
        Self { store, config }
    }

    /// Index one KB: walk its tree, upsert every parseable `*.md` file,
    /// and enqueue each entry for embedding. Files with no or invalid
    /// frontmatter are logged and skipped. Returns the indexed count.
    pub fn index_kb(
        &self,
        kb_name: &str,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<usize, IndexError> {
        let kb = self
            .config
            .get_kb(kb_name)
            .ok_or_else(|| IndexError::KbNotFound(kb_name.to_string()))?;

        self.store.register_kb(kb)?;

        let files = markdown_files(&kb.path)?;
        let total = files.len();
        let mut indexed = 0;

        for (i, path) in files.iter().enumerate() {
            if let Some(callback) = progress {
                callback(i, total);
            }
            match self.index_file(kb, path) {
                Ok(true) => indexed += 1,
                Ok(false) => {}
                Err(IndexError::Io(e)) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                }
                Err(e) => return Err(e),
            }
        }

        self.store.touch_kb_indexed(&kb.name)?;
        if let Some(callback) = progress {
            callback(total, total);
        }

        tracing::info!("Indexed {} entries from KB '{}'", indexed, kb.name);
        Ok(indexed)
    }

    /// Index every configured KB. Returns the total indexed count.
    pub fn index_all(&self, progress: Option<&dyn Fn(usize, usize)>) -> Result<usize, IndexError> {
        let mut total = 0;
        for kb in &self.config.knowledge_bases {
            if !kb.path.exists() {
                tracing::warn!("Skipping KB '{}': path does not exist", kb.name);
                continue;
            }
            total += self.index_kb(&kb.name, progress)?;
        }
        Ok(total)
    }

    fn index_file(&self, kb: &KbConfig, path: &Path) -> Result<bool, IndexError> {
        let content = std::fs::read_to_string(path)?;
        let doc = match parse_document(&content) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                return Ok(false);
            }
        };

        let entry = entry_from_document(&doc, &kb.name, kb.kb_type, path);
        self.store.upsert_entry(&entry)?;
        // Same writer, before the next transaction: the worker is
        // guaranteed to observe the row.
        self.store.queue_insert(&entry.id, &entry.kb_name)?;
        Ok(true)
    }

    /// Create an entry: write its Markdown source file, then index it.
    pub fn create_entry(&self, kb_name: &str, new: &NewEntry) -> Result<Entry, IndexError> {
        let kb = self
            .config
            .get_kb(kb_name)
            .ok_or_else(|| IndexError::KbNotFound(kb_name.to_string()))?;
        if kb.read_only {
            return Err(IndexError::KbReadOnly(kb_name.to_string()));
        }

        let path = kb.path.join(format!("{}.md", new.id));
        std::fs::create_dir_all(&kb.path)?;
        std::fs::write(&path, render_markdown(new))?;

        self.index_file(kb, &path)?;
        self.store
            .get_entry(&new.id, kb_name)?
            .ok_or_else(|| {
                IndexError::Store(StoreError::EntryNotFound {
                    id: new.id.clone(),
                    kb_name: kb_name.to_string(),
                })
            })
    }

    /// Delete an entry: remove its source file and its index row.
    pub fn delete_entry(&self, id: &str, kb_name: &str) -> Result<bool, IndexError> {
        let kb = self
            .config
            .get_kb(kb_name)
            .ok_or_else(|| IndexError::KbNotFound(kb_name.to_string()))?;
        if kb.read_only {
            return Err(IndexError::KbReadOnly(kb_name.to_string()));
        }

        let Some(entry) = self.store.get_entry(id, kb_name)? else {
            return Ok(false);
        };
        if let Some(file_path) = entry.file_path.as_deref() {
            match std::fs::remove_file(file_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.store.delete_entry(id, kb_name)?)
    }

    /// Index-wide statistics.
    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        Ok(self.store.stats()?)
    }
}

/// Markdown files under a KB root, sorted, `_`-prefixed names skipped.
fn markdown_files(kb_path: &Path) -> Result<Vec<PathBuf>, IndexError> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(kb_path) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('_') || !name.ends_with(".md") {
            continue;
        }
        files.push(entry.into_path());
    }
    files.sort();
    Ok(files)
}

/// Render a new entry as Markdown with YAML frontmatter.
fn render_markdown(new: &NewEntry) -> String {
    let mut fm = String::new();
    fm.push_str(&format!("id: {}\n", new.id));
    fm.push_str(&format!("title: {}\n", new.title));
    fm.push_str(&format!("type: {}\n", new.entry_type));
    if let Some(ref date) = new.date {
        fm.push_str(&format!("date: {date}\n"));
    }
    if let Some(importance) = new.importance {
        fm.push_str(&format!("importance: {importance}\n"));
    }
    if let Some(ref status) = new.status {
        fm.push_str(&format!("status: {status}\n"));
    }
    if let Some(ref summary) = new.summary {
        fm.push_str(&format!("summary: {summary}\n"));
    }
    if !new.tags.is_empty() {
        fm.push_str("tags:\n");
        for tag in &new.tags {
            fm.push_str(&format!("  - {tag}\n"));
        }
    }
    let body = new.body.as_deref().unwrap_or("");
    format!("---\n{fm}---\n{body}\n")
}
