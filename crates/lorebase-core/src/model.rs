//! Domain types shared across the storage, search, and embedding layers.

use serde::{Deserialize, Serialize};

/// Kind of knowledge base, controls the default entry type during indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KbType {
    /// Long-form research notes (actors, organizations, themes, ...)
    Research,
    /// Dated timeline events
    Events,
    /// Free-form notes
    Notes,
}

impl KbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KbType::Research => "research",
            KbType::Events => "events",
            KbType::Notes => "notes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "research" => Some(KbType::Research),
            "events" => Some(KbType::Events),
            "notes" => Some(KbType::Notes),
            _ => None,
        }
    }

    /// Entry type assigned when the frontmatter does not name one.
    pub fn default_entry_type(&self) -> &'static str {
        match self {
            KbType::Research => "note",
            KbType::Events => "timeline_event",
            KbType::Notes => "note",
        }
    }
}

/// A single indexed entry. Identity is the composite `(id, kb_name)`.
///
/// Dependent rows (`tags`, `links`, `sources`) live and die with the entry;
/// the store rewrites them wholesale on upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub kb_name: String,
    pub entry_type: String,
    pub title: String,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub location: Option<String>,
    /// ISO-8601 date string (`YYYY-MM-DD`)
    pub date: Option<String>,
    /// 1-10 when present
    pub importance: Option<i64>,
    pub status: Option<String>,
    /// Absolute path of the source Markdown file
    pub file_path: Option<String>,
    pub created_by: Option<String>,
    pub modified_by: Option<String>,
    pub tags: Vec<String>,
    /// Wikilink targets referenced from the body
    pub links: Vec<String>,
    pub sources: Vec<String>,
}

/// A registered knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbRecord {
    pub name: String,
    pub kb_type: String,
    pub path: String,
    pub read_only: bool,
    pub repo_id: Option<i64>,
    pub repo_subpath: Option<String>,
    pub last_indexed: Option<String>,
}

/// One recorded change to an entry, as surfaced by an attribution source.
///
/// The engine only stores and serves these records; producing them (walking
/// a git log or otherwise) is the caller's business.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryVersion {
    pub entry_id: String,
    pub kb_name: String,
    pub commit_hash: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_login: Option<String>,
    pub commit_date: String,
    pub message: Option<String>,
    pub diff_summary: Option<String>,
    pub change_type: Option<String>,
}

/// A single search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub kb_name: String,
    pub entry_type: String,
    pub title: String,
    pub date: Option<String>,
    pub importance: Option<i64>,
    pub tags: Vec<String>,
    /// Match-highlighted excerpt (keyword) or synthesized preview (semantic)
    pub snippet: String,
    /// FTS5 rank (lower is better) when the keyword leg produced this hit
    pub rank: Option<f64>,
    /// Cosine distance when the semantic leg produced this hit
    pub distance: Option<f64>,
    /// Fusion score attached by hybrid search
    pub rrf_score: Option<f64>,
}

/// Outcome counts for a batch embedding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedBatchReport {
    pub embedded: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Aggregate counts for the embedding queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub failed: i64,
    pub total: i64,
}

/// Embedding coverage for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingStats {
    pub available: bool,
    pub count: i64,
    pub total_entries: i64,
    /// Percent of entries with a vector, 0.0 when the index is empty
    pub coverage_percent: f64,
}

/// Index-wide counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_entries: i64,
    pub total_tags: i64,
    pub total_links: i64,
    /// (kb_name, entry count) pairs
    pub kbs: Vec<(String, i64)>,
}
