//! Unified search surface.
//!
//! Dispatches keyword, semantic, and hybrid queries over the store,
//! normalizes presentation-layer sentinels, and wires in optional query
//! expansion. Optional-capability gaps (no embeddings, no vector extension,
//! failed expansion) degrade silently; only genuine store failures raise.

use serde::{Deserialize, Serialize};

use crate::model::SearchHit;
use crate::search::expansion::QueryExpansionService;
use crate::search::hybrid::{reciprocal_rank_fusion, HybridConfig};
use crate::search::keyword::sanitize_fts_query;
use crate::storage::{SearchFilters, Store, StoreError};

#[cfg(feature = "embeddings")]
use std::num::NonZeroUsize;
#[cfg(feature = "embeddings")]
use std::sync::Mutex;

#[cfg(feature = "embeddings")]
use lru::LruCache;

/// Presentation-layer sentinel meaning "no KB filter". Normalized away at
/// this boundary; the store never sees it.
pub const ALL_KBS: &str = "All KBs";

/// Cosine distance cutoff for pure semantic search.
const SEMANTIC_MAX_DISTANCE: f64 = 1.1;
/// Looser cutoff for the semantic leg of hybrid search; fusion reranks.
const HYBRID_MAX_DISTANCE: f64 = 1.3;

/// Search mode for queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMode {
    /// Parse a mode name; anything unrecognized falls back to keyword.
    pub fn parse(s: &str) -> Self {
        match s {
            "semantic" => SearchMode::Semantic,
            "hybrid" => SearchMode::Hybrid,
            _ => SearchMode::Keyword,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// One search call.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub kb_name: Option<String>,
    pub entry_type: Option<String>,
    /// AND-joined tag filters
    pub tags: Vec<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: i64,
    pub offset: i64,
    /// None uses the service default
    pub mode: Option<SearchMode>,
    /// Rewrite the lexical leg with AI-generated terms
    pub expand: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            kb_name: None,
            entry_type: None,
            tags: Vec::new(),
            date_from: None,
            date_to: None,
            limit: 50,
            offset: 0,
            mode: None,
            expand: false,
        }
    }
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// Service for search operations across all three modes.
pub struct SearchService<'a> {
    store: &'a Store,
    expansion: Option<QueryExpansionService>,
    default_mode: SearchMode,
    hybrid: HybridConfig,
    #[cfg(feature = "embeddings")]
    embedding_model: String,
    /// LRU cache for query embeddings; repeated queries skip the model.
    #[cfg(feature = "embeddings")]
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl<'a> SearchService<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            expansion: None,
            default_mode: SearchMode::Keyword,
            hybrid: HybridConfig::default(),
            #[cfg(feature = "embeddings")]
            embedding_model: crate::DEFAULT_EMBEDDING_MODEL.to_string(),
            #[cfg(feature = "embeddings")]
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Wire defaults and expansion from settings.
    pub fn with_settings(store: &'a Store, settings: &crate::config::Settings) -> Self {
        let mut service = Self::new(store);
        service.default_mode = settings.search_mode;
        service.expansion = QueryExpansionService::from_settings(settings);
        #[cfg(feature = "embeddings")]
        {
            service.embedding_model = settings.embedding_model.clone();
        }
        service
    }

    /// Override the hybrid fusion tunables.
    pub fn with_hybrid_config(mut self, config: HybridConfig) -> Self {
        self.hybrid = config;
        self
    }

    /// Search across entries. See the request type for filter semantics.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, StoreError> {
        let mode = request.mode.unwrap_or(self.default_mode);
        let kb_name = normalize_kb(request.kb_name.as_deref());

        // Expansion rewrites the FTS5 leg only; the dense leg is already
        // robust to phrasing.
        let expanded = if request.expand {
            self.expand_query(&request.query)
        } else {
            request.query.clone()
        };

        match mode {
            SearchMode::Semantic => {
                // The KNN query has no OFFSET; fetch limit+offset and slice.
                let hits = self.semantic_leg(
                    &request.query,
                    kb_name,
                    request.limit + request.offset,
                    SEMANTIC_MAX_DISTANCE,
                );
                Ok(paginate(hits, request.offset as usize, request.limit as usize))
            }
            SearchMode::Hybrid => self.hybrid_search(request, kb_name, &expanded),
            SearchMode::Keyword => self.store.search(
                &sanitize_fts_query(&expanded),
                &filters_for(request, kb_name),
                request.limit,
                request.offset,
            ),
        }
    }

    fn expand_query(&self, query: &str) -> String {
        let Some(ref expansion) = self.expansion else {
            return query.to_string();
        };
        let terms = expansion.expand(query);
        if terms.is_empty() {
            return query.to_string();
        }
        let mut parts = vec![query.to_string()];
        parts.extend(terms);
        parts.join(" OR ")
    }

    /// Hybrid search: over-fetch both legs, fuse with RRF, paginate the
    /// fused ordering. Falls back to plain keyword pagination when the
    /// semantic leg is empty.
    fn hybrid_search(
        &self,
        request: &SearchRequest,
        kb_name: Option<&str>,
        expanded: &str,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let fetch = request.limit * self.hybrid.overfetch;
        let keyword_hits = self.store.search(
            &sanitize_fts_query(expanded),
            &filters_for(request, kb_name),
            fetch,
            0,
        )?;
        let semantic_hits =
            self.semantic_leg(&request.query, kb_name, fetch, HYBRID_MAX_DISTANCE);

        let offset = request.offset as usize;
        let limit = request.limit as usize;

        if semantic_hits.is_empty() {
            return Ok(paginate(keyword_hits, offset, limit));
        }

        let keyword_keys: Vec<(String, String)> = keyword_hits
            .iter()
            .map(|h| (h.id.clone(), h.kb_name.clone()))
            .collect();
        let semantic_keys: Vec<(String, String)> = semantic_hits
            .iter()
            .map(|h| (h.id.clone(), h.kb_name.clone()))
            .collect();

        let fused = reciprocal_rank_fusion(&keyword_keys, &semantic_keys, self.hybrid.rrf_k);

        // Prefer the keyword record when both legs carry the entry: it has
        // the highlighted snippet.
        let mut by_key: std::collections::HashMap<(String, String), SearchHit> =
            std::collections::HashMap::new();
        for hit in semantic_hits {
            by_key.insert((hit.id.clone(), hit.kb_name.clone()), hit);
        }
        for hit in keyword_hits {
            by_key.insert((hit.id.clone(), hit.kb_name.clone()), hit);
        }

        let mut results = Vec::with_capacity(limit);
        for (key, score) in fused.into_iter().skip(offset).take(limit) {
            if let Some(mut hit) = by_key.remove(&key) {
                hit.rrf_score = Some(score);
                results.push(hit);
            }
        }
        Ok(results)
    }

    /// The semantic leg. Returns an empty list for every optional-capability
    /// gap: embeddings feature off, vector extension missing, no vectors
    /// yet, or query embedding failure.
    #[cfg(feature = "embeddings")]
    fn semantic_leg(
        &self,
        query: &str,
        kb_name: Option<&str>,
        limit: i64,
        max_distance: f64,
    ) -> Vec<SearchHit> {
        use crate::embeddings::EmbeddingService;

        if !self.store.vec_enabled() {
            return Vec::new();
        }
        // No vectors yet: skip without ever touching the model.
        match self.store.embedding_count() {
            Ok(count) if count > 0 => {}
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Vector index unavailable: {}", e);
                return Vec::new();
            }
        }
        let service = EmbeddingService::with_model(self.store, &self.embedding_model);
        match self.query_embedding(&service, query) {
            Ok(embedding) => service
                .search_similar_embedded(&embedding, kb_name, limit, max_distance)
                .unwrap_or_else(|e| {
                    tracing::warn!("Semantic search failed: {}", e);
                    Vec::new()
                }),
            Err(e) => {
                tracing::warn!("Query embedding failed: {}", e);
                Vec::new()
            }
        }
    }

    #[cfg(not(feature = "embeddings"))]
    fn semantic_leg(
        &self,
        _query: &str,
        _kb_name: Option<&str>,
        _limit: i64,
        _max_distance: f64,
    ) -> Vec<SearchHit> {
        Vec::new()
    }

    /// Get the query embedding from cache or compute it.
    #[cfg(feature = "embeddings")]
    fn query_embedding(
        &self,
        service: &crate::embeddings::EmbeddingService<'_>,
        query: &str,
    ) -> Result<Vec<f32>, crate::embeddings::EmbeddingError> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(cached) = cache.get(query) {
                return Ok(cached.clone());
            }
        }

        let embedding = service.embed_text(query)?;

        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), embedding.clone());
        }
        Ok(embedding)
    }
}

/// Map the `"All KBs"` sentinel to absence-of-filter.
fn normalize_kb(kb_name: Option<&str>) -> Option<&str> {
    match kb_name {
        Some(ALL_KBS) | None => None,
        Some(kb) => Some(kb),
    }
}

fn filters_for(request: &SearchRequest, kb_name: Option<&str>) -> SearchFilters {
    SearchFilters {
        kb_name: kb_name.map(str::to_string),
        entry_type: request.entry_type.clone(),
        tags: request.tags.clone(),
        date_from: request.date_from.clone(),
        date_to: request.date_to.clone(),
    }
}

fn paginate(hits: Vec<SearchHit>, offset: usize, limit: usize) -> Vec<SearchHit> {
    hits.into_iter().skip(offset).take(limit).collect()
}
