//! # Lorebase Core
//!
//! Local knowledge-base search engine over collections of Markdown files
//! with YAML frontmatter. Entries from one or more named knowledge bases
//! (KBs) are kept in a single SQLite index and queried in three modes:
//!
//! - **Keyword**: FTS5 full-text search (porter + unicode61, BM25 ranking)
//! - **Semantic**: vector KNN over local embeddings (sqlite-vec `vec0` table)
//! - **Hybrid**: Reciprocal Rank Fusion of both legs
//!
//! Embedding work is scheduled through a durable on-disk queue so writes
//! never block on model inference. Schema evolution is handled by a
//! versioned, forward-only migration runtime with a baseline-stamp escape
//! hatch for databases that predate it.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lorebase_core::{Config, IndexManager, SearchRequest, SearchService, Store};
//!
//! let config = Config::load("lorebase.yaml".as_ref())?;
//! let store = Store::open(&config.settings.index_path)?;
//!
//! // Index every configured KB
//! let indexer = IndexManager::new(&store, &config);
//! indexer.index_all(None)?;
//!
//! // Search
//! let search = SearchService::with_settings(&store, &config.settings);
//! let hits = search.search(&SearchRequest::new("climate-policy 2024-01-15"))?;
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local embedding generation with fastembed
//! - `bundled-sqlite` (default): compile SQLite (with FTS5) into the binary
//!
//! Without `embeddings`, or when the sqlite-vec extension fails to load,
//! the engine degrades to keyword-only search; nothing raises.

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod index;
pub mod model;
pub mod repair;
pub mod search;
pub mod storage;

pub mod embeddings;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{Config, ConfigError, KbConfig, Settings};

pub use model::{
    EmbedBatchReport, EmbeddingStats, Entry, EntryVersion, IndexStats, KbRecord, KbType,
    QueueStatus, SearchHit,
};

pub use storage::{
    migrate_to_head, stamp_baseline, Migration, SearchFilters, Store, StoreError, MIGRATIONS,
};

pub use search::{
    reciprocal_rank_fusion, sanitize_fts_query, HybridConfig, QueryExpansionService, SearchMode,
    SearchRequest, SearchService, ALL_KBS,
};

pub use embeddings::{EmbedError, EmbeddingWorker, EntryEmbedder, DEFAULT_MAX_ATTEMPTS};

#[cfg(feature = "embeddings")]
pub use embeddings::{cosine_similarity, Embedding, EmbeddingError, EmbeddingService};

pub use index::{IndexError, IndexManager, NewEntry};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model identifier
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension, fixed per database (all-MiniLM-L6-v2 output size)
pub const EMBEDDING_DIMENSIONS: usize = 384;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, Entry, IndexManager, KbConfig, SearchHit, SearchMode, SearchRequest,
        SearchService, Settings, Store, StoreError,
    };

    pub use crate::{EmbeddingWorker, EntryEmbedder};

    #[cfg(feature = "embeddings")]
    pub use crate::EmbeddingService;
}
