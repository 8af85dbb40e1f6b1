//! Journey: repair-free KB tree -> index -> keyword and hybrid search.

use lorebase_e2e_tests::{open_store, research_config, write_md};
use lorebase_core::{IndexManager, SearchMode, SearchRequest, SearchService, ALL_KBS};

fn seeded() -> (tempfile::TempDir, lorebase_core::Config, lorebase_core::Store) {
    let dir = tempfile::tempdir().unwrap();
    let config = research_config(dir.path());
    let kb_root = &config.knowledge_bases[0].path;

    write_md(
        kb_root,
        "actors/alex-jones.md",
        "---\nid: alex-jones\ntitle: Alex Jones\ntype: actor\ntags:\n  - media\n---\nBroadcaster profile; see [[infowars]].\n",
    );
    write_md(
        kb_root,
        "events/rally.md",
        "---\nid: rally-2024\ntitle: January Rally\ntype: event\ndate: 2024-01-15\nimportance: 6\ntags:\n  - politics\n---\nA dated rally with broadcaster coverage.\n",
    );
    write_md(
        kb_root,
        "themes/climate.md",
        "---\nid: climate-policy\ntitle: Climate Policy\ntype: theme\nsummary: Carbon emissions policy overview\n---\nThe climate crisis demands policy action.\n",
    );

    let store = open_store(&config);
    let indexer = IndexManager::new(&store, &config);
    let count = indexer.index_all(None).unwrap();
    assert_eq!(count, 3);
    (dir, config, store)
}

#[test]
fn hyphenated_queries_find_entries_instead_of_excluding() {
    let (_dir, config, store) = seeded();
    let service = SearchService::with_settings(&store, &config.settings);

    // Raw "alex-jones" would be read by FTS5 as "alex NOT jones"; the
    // sanitizer quotes it, so the actor's own page matches.
    let mut request = SearchRequest::new("alex-jones");
    request.kb_name = Some(ALL_KBS.to_string());
    let hits = service.search(&request).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "alex-jones");
    assert_eq!(hits[0].tags, vec!["media"]);
}

#[test]
fn filters_and_pagination_compose() {
    let (_dir, config, store) = seeded();
    let service = SearchService::with_settings(&store, &config.settings);

    let mut request = SearchRequest::new("broadcaster");
    request.entry_type = Some("event".to_string());
    let hits = service.search(&request).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "rally-2024");

    let mut dated = SearchRequest::new("broadcaster");
    dated.date_from = Some("2024-01-01".to_string());
    dated.date_to = Some("2024-12-31".to_string());
    assert_eq!(service.search(&dated).unwrap().len(), 1);

    let mut tagged = SearchRequest::new("broadcaster");
    tagged.tags = vec!["politics".to_string()];
    assert_eq!(service.search(&tagged).unwrap().len(), 1);

    let mut beyond = SearchRequest::new("broadcaster");
    beyond.offset = 50;
    assert!(service.search(&beyond).unwrap().is_empty());
}

#[test]
fn hybrid_mode_degrades_to_keyword_without_vectors() {
    let (_dir, config, store) = seeded();
    let service = SearchService::with_settings(&store, &config.settings);

    let mut request = SearchRequest::new("policy");
    request.mode = Some(SearchMode::Hybrid);
    let hits = service.search(&request).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "climate-policy");
    // Keyword fallback carries no fusion score
    assert!(hits[0].rrf_score.is_none());
}

#[test]
fn deleting_entries_keeps_fts_shadow_coherent() {
    let (_dir, config, store) = seeded();

    assert_eq!(store.entry_count(None).unwrap(), 3);
    assert_eq!(store.fts_count().unwrap(), 3);

    let indexer = IndexManager::new(&store, &config);
    assert!(indexer.delete_entry("rally-2024", "research").unwrap());

    assert_eq!(store.entry_count(None).unwrap(), 2);
    assert_eq!(store.fts_count().unwrap(), 2);

    let service = SearchService::with_settings(&store, &config.settings);
    assert!(service.search(&SearchRequest::new("rally")).unwrap().is_empty());
}

#[test]
fn search_hits_serialize_for_presentation_layers() {
    let (_dir, config, store) = seeded();
    let service = SearchService::with_settings(&store, &config.settings);
    let hits = service.search(&SearchRequest::new("climate")).unwrap();
    let json = serde_json::to_string(&hits).unwrap();
    assert!(json.contains("\"climate-policy\""));
    assert!(json.contains("\"snippet\""));
}
