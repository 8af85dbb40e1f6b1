//! Entry Embedding Service
//!
//! Derives text from entries, computes vectors, and keeps the sqlite-vec
//! index in step with the entry table. Also the semantic KNN search path.

use crate::model::{EmbedBatchReport, EmbeddingStats, Entry, SearchHit};
use crate::storage::Store;

use super::local::LocalEmbedder;
use super::worker::{EmbedError, EntryEmbedder};

/// Body prefix length used for embedding text, in characters.
const BODY_EMBED_CHARS: usize = 500;

/// Maximum synthesized snippet length, in characters.
const SNIPPET_CHARS: usize = 200;

/// Service for generating and querying entry embeddings.
pub struct EmbeddingService<'a> {
    store: &'a Store,
    embedder: LocalEmbedder,
}

impl<'a> EmbeddingService<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self::with_model(store, crate::DEFAULT_EMBEDDING_MODEL)
    }

    pub fn with_model(store: &'a Store, model_name: &str) -> Self {
        Self {
            store,
            embedder: LocalEmbedder::new(model_name),
        }
    }

    /// Whether the model is loadable. Triggers the first (lazy) load.
    pub fn is_ready(&self) -> bool {
        self.embedder.is_ready()
    }

    /// Embed a raw text string.
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>, super::local::EmbeddingError> {
        self.embedder.embed(text)
    }

    /// Embed a single entry and store the vector under its rowid.
    ///
    /// Returns `Ok(false)`, not an error, when the entry is missing or
    /// has no embeddable text.
    pub fn embed_entry(&self, entry_id: &str, kb_name: &str) -> Result<bool, EmbedError> {
        if !self.store.vec_enabled() {
            return Ok(false);
        }
        let Some(entry) = self.store.get_entry(entry_id, kb_name)? else {
            return Ok(false);
        };
        let text = entry_text(&entry);
        if text.trim().is_empty() {
            return Ok(false);
        }

        let Some(rowid) = self.store.entry_rowid(entry_id, kb_name)? else {
            return Ok(false);
        };

        let vector = self
            .embedder
            .embed(&text)
            .map_err(|e| EmbedError::Model(e.to_string()))?;
        self.store.upsert_embedding(rowid, &vector)?;
        Ok(true)
    }

    /// Batch embed entries, optionally restricted to one KB.
    ///
    /// Already-embedded entries are skipped unless `force`; the set of
    /// embedded rowids is fetched once up front. Individual failures are
    /// logged and counted, never propagated. All vectors land in a single
    /// commit; the progress callback fires once per entry.
    pub fn embed_all(
        &self,
        kb_name: Option<&str>,
        force: bool,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<EmbedBatchReport, EmbedError> {
        let mut report = EmbedBatchReport::default();
        if !self.store.vec_enabled() {
            return Ok(report);
        }

        let entries = self.store.list_entries(kb_name)?;
        let total = entries.len();

        let embedded_rowids = if force {
            std::collections::HashSet::new()
        } else {
            self.store.embedded_rowids()?
        };

        let mut computed: Vec<(i64, Vec<f32>)> = Vec::new();
        for (i, (rowid, entry)) in entries.iter().enumerate() {
            if let Some(callback) = progress {
                callback(i, total);
            }

            if !force && embedded_rowids.contains(rowid) {
                report.skipped += 1;
                continue;
            }
            let text = entry_text(entry);
            if text.trim().is_empty() {
                report.skipped += 1;
                continue;
            }

            match self.embedder.embed(&text) {
                Ok(vector) => {
                    computed.push((*rowid, vector));
                    report.embedded += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to embed entry {}: {}", entry.id, e);
                    report.errors += 1;
                }
            }
        }

        self.store.write_embeddings(&computed)?;

        if let Some(callback) = progress {
            callback(total, total);
        }
        Ok(report)
    }

    /// Semantic KNN search. Embeds the query, then delegates.
    pub fn search_similar(
        &self,
        query: &str,
        kb_name: Option<&str>,
        limit: i64,
        max_distance: f64,
    ) -> Result<Vec<SearchHit>, EmbedError> {
        if !self.store.vec_enabled() {
            return Ok(Vec::new());
        }
        let embedding = self
            .embedder
            .embed(query)
            .map_err(|e| EmbedError::Model(e.to_string()))?;
        self.search_similar_embedded(&embedding, kb_name, limit, max_distance)
    }

    /// Semantic KNN search with a precomputed query embedding.
    ///
    /// Over-fetches (`k = limit * 3` with a KB filter, else `* 2`) so the
    /// in-memory KB filter and the distance cutoff still leave `limit`
    /// survivors, then truncates.
    pub fn search_similar_embedded(
        &self,
        query_embedding: &[f32],
        kb_name: Option<&str>,
        limit: i64,
        max_distance: f64,
    ) -> Result<Vec<SearchHit>, EmbedError> {
        if !self.store.vec_enabled() || limit <= 0 {
            return Ok(Vec::new());
        }

        let fetch = limit * if kb_name.is_some() { 3 } else { 2 };
        let neighbors = self.store.knn(query_embedding, fetch)?;

        let mut hits = Vec::new();
        for (rowid, distance) in neighbors {
            if distance > max_distance {
                continue;
            }
            let Some(entry) = self.store.get_entry_by_rowid(rowid)? else {
                continue;
            };
            if let Some(kb) = kb_name {
                if entry.kb_name != kb {
                    continue;
                }
            }
            hits.push(hit_from_entry(entry, distance));
            if hits.len() as i64 >= limit {
                break;
            }
        }
        Ok(hits)
    }

    /// Whether any vectors exist.
    pub fn has_embeddings(&self) -> Result<bool, EmbedError> {
        Ok(self.store.embedding_count()? > 0)
    }

    /// Count and coverage statistics.
    pub fn embedding_stats(&self) -> Result<EmbeddingStats, EmbedError> {
        if !self.store.vec_enabled() {
            return Ok(EmbeddingStats {
                available: false,
                count: 0,
                total_entries: 0,
                coverage_percent: 0.0,
            });
        }
        let count = self.store.embedding_count()?;
        let total_entries = self.store.entry_count(None)?;
        let coverage_percent = if total_entries > 0 {
            count as f64 / total_entries as f64 * 100.0
        } else {
            0.0
        };
        Ok(EmbeddingStats {
            available: true,
            count,
            total_entries,
            coverage_percent,
        })
    }
}

impl EntryEmbedder for EmbeddingService<'_> {
    fn embed_entry(&self, entry_id: &str, kb_name: &str) -> Result<bool, EmbedError> {
        EmbeddingService::embed_entry(self, entry_id, kb_name)
    }
}

/// Text used for an entry's embedding: title, summary, and the first 500
/// characters of body, space-joined, empty fields omitted.
pub(crate) fn entry_text(entry: &Entry) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !entry.title.is_empty() {
        parts.push(&entry.title);
    }
    if let Some(summary) = entry.summary.as_deref() {
        if !summary.is_empty() {
            parts.push(summary);
        }
    }
    let body_prefix;
    if let Some(body) = entry.body.as_deref() {
        if !body.is_empty() {
            body_prefix = char_prefix(body, BODY_EMBED_CHARS);
            parts.push(body_prefix);
        }
    }
    parts.join(" ")
}

/// A preview snippet for semantic hits, which bypass FTS's highlighter:
/// the summary when present, else the first paragraph of body. Truncated
/// with an ellipsis.
pub(crate) fn synthesize_snippet(entry: &Entry) -> String {
    if let Some(summary) = entry.summary.as_deref() {
        if !summary.is_empty() {
            return ellipsize(summary, SNIPPET_CHARS);
        }
    }
    let Some(body) = entry.body.as_deref() else {
        return String::new();
    };
    let text = body.trim();
    if text.is_empty() {
        return String::new();
    }

    // First paragraph-ish chunk
    let mut cut = text;
    for sep in ["\n\n", "\n"] {
        if let Some(idx) = text.find(sep) {
            if idx > 0 && idx < SNIPPET_CHARS * 2 {
                cut = &text[..idx];
                break;
            }
        }
    }
    ellipsize(cut, SNIPPET_CHARS)
}

fn hit_from_entry(entry: Entry, distance: f64) -> SearchHit {
    let snippet = synthesize_snippet(&entry);
    SearchHit {
        id: entry.id,
        kb_name: entry.kb_name,
        entry_type: entry.entry_type,
        title: entry.title,
        date: entry.date,
        importance: entry.importance,
        tags: entry.tags,
        snippet,
        rank: None,
        distance: Some(distance),
        rrf_score: None,
    }
}

fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}\u{2026}", char_prefix(text, max_chars))
    } else {
        text.to_string()
    }
}
