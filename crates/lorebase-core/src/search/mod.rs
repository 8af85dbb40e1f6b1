//! Search Module
//!
//! - FTS5 query sanitization for hyphenated input
//! - Hybrid fusion (Reciprocal Rank Fusion)
//! - AI query expansion (optional, degrades to no-op)
//! - The unified search surface dispatching all three modes

mod expansion;
mod hybrid;
mod keyword;
mod service;

pub use expansion::{ExpansionProvider, QueryExpansionService, MAX_TERMS, MAX_TERM_LENGTH};
pub use hybrid::{reciprocal_rank_fusion, HybridConfig, RRF_K};
pub use keyword::sanitize_fts_query;
pub use service::{SearchMode, SearchRequest, SearchService, ALL_KBS};
