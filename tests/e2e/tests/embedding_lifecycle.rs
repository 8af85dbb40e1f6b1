//! Journey: batch embedding and semantic retrieval with the real model.
//!
//! These tests download the embedding model on first run, so they are
//! ignored by default: `cargo test -p lorebase-e2e-tests -- --ignored`.

use lorebase_e2e_tests::{open_store, research_config, write_md};
use lorebase_core::{EmbeddingService, IndexManager, SearchMode, SearchRequest, SearchService};

fn seeded() -> (tempfile::TempDir, lorebase_core::Config, lorebase_core::Store) {
    let dir = tempfile::tempdir().unwrap();
    let config = research_config(dir.path());
    let kb_root = &config.knowledge_bases[0].path;

    write_md(
        kb_root,
        "climate-policy.md",
        "---\nid: climate-policy\ntitle: Climate Policy\nsummary: Overview of climate change policy and environmental protection measures\n---\nThe climate crisis demands immediate policy action on carbon emissions.\n",
    );
    write_md(
        kb_root,
        "tax-reform.md",
        "---\nid: tax-reform\ntitle: Tax Reform Proposals\nsummary: Analysis of proposed changes to the tax code\n---\nTax reform proposals include changes to corporate and individual tax rates.\n",
    );
    write_md(
        kb_root,
        "immigration.md",
        "---\nid: immigration\ntitle: Immigration and Border Security\nsummary: Immigration policy including border enforcement and visa programs\n---\nImmigration reform covers border security, visa processing, and asylum policies.\n",
    );

    let store = open_store(&config);
    IndexManager::new(&store, &config).index_all(None).unwrap();
    (dir, config, store)
}

#[test]
#[ignore = "downloads the embedding model"]
fn embed_all_then_incremental_then_semantic_ranking() {
    let (_dir, config, store) = seeded();
    assert!(store.vec_enabled(), "sqlite-vec must be loaded");

    let service = EmbeddingService::new(&store);
    assert!(!service.has_embeddings().unwrap());

    // First pass embeds everything
    let first = service.embed_all(None, false, None).unwrap();
    assert_eq!(first.embedded, 3);
    assert_eq!(first.skipped, 0);
    assert_eq!(first.errors, 0);
    assert!(service.has_embeddings().unwrap());

    // Second pass skips everything
    let second = service.embed_all(None, false, None).unwrap();
    assert_eq!(second.embedded, 0);
    assert_eq!(second.skipped, 3);

    // Force re-embeds
    let forced = service.embed_all(None, true, None).unwrap();
    assert_eq!(forced.embedded, 3);

    let stats = service.embedding_stats().unwrap();
    assert!(stats.available);
    assert_eq!(stats.count, 3);
    assert_eq!(stats.total_entries, 3);
    assert!((stats.coverage_percent - 100.0).abs() < 1e-9);

    // Semantic retrieval ranks the climate entry first for an
    // environmental query
    let hits = service
        .search_similar("environmental regulations", None, 10, 1.1)
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].id, "climate-policy");
    assert!(hits[0].distance.is_some());
    assert!(!hits[0].snippet.is_empty());

    // KB filter drops everything for an unknown KB
    let none = service
        .search_similar("environmental regulations", Some("nonexistent"), 10, 1.1)
        .unwrap();
    assert!(none.is_empty());

    // Hybrid search fuses both legs and attaches rrf scores
    let search = SearchService::with_settings(&store, &config.settings);
    let mut request = SearchRequest::new("climate carbon emissions");
    request.mode = Some(SearchMode::Hybrid);
    let fused = search.search(&request).unwrap();
    assert!(!fused.is_empty());
    assert_eq!(fused[0].id, "climate-policy");
    assert!(fused[0].rrf_score.is_some());
}

// No model involved: the entry is skipped before any inference happens.
#[test]
fn textless_entries_are_skipped_not_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = research_config(dir.path());
    let store = open_store(&config);
    store
        .register_kb(&config.knowledge_bases[0])
        .unwrap();
    // An entry with no text at all (possible via direct store writes)
    store
        .upsert_entry(&lorebase_core::Entry {
            id: "empty".into(),
            kb_name: "research".into(),
            entry_type: "note".into(),
            ..lorebase_core::Entry::default()
        })
        .unwrap();

    let service = EmbeddingService::new(&store);
    let report = service.embed_all(None, false, None).unwrap();
    assert_eq!(report.embedded, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors, 0);
}
