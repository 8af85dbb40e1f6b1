//! Storage Module
//!
//! SQLite store with:
//! - Entries and dependent rows, composite-keyed by (id, kb_name)
//! - Content-external FTS5 shadow kept coherent by triggers
//! - sqlite-vec KNN table keyed by entry rowid
//! - Versioned forward-only migrations with baseline stamping
//! - The durable embedding queue

mod migrations;
mod sqlite;

pub use migrations::{
    get_current_version, migrate_to_head, stamp_baseline, Migration, MIGRATIONS,
};
pub use sqlite::{
    blob_to_embedding, embedding_to_blob, QueueRow, Result, SearchFilters, Store, StoreError,
    HIGHLIGHT_CLOSE, HIGHLIGHT_OPEN,
};
