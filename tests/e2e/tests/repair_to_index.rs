//! Journey: messy source files -> frontmatter repair -> index -> search.

use lorebase_e2e_tests::{open_store, research_config, write_md};
use lorebase_core::{repair, IndexManager, SearchRequest, SearchService};

#[test]
fn repaired_kb_indexes_under_injected_ids() {
    let dir = tempfile::tempdir().unwrap();
    let config = research_config(dir.path());
    let kb_root = config.knowledge_bases[0].path.clone();

    // No id key, prefixed wikilinks, legacy frontmatter keys.
    write_md(
        &kb_root,
        "actors/powell-lewis.md",
        "---\ntitle: Powell Lewis\nessay_type: actor\nresearch_status: \"active\"\n---\nWorks with [[organizations/ALEC]] on model bills.\n",
    );
    write_md(
        &kb_root,
        "events/jan6.md",
        "---\ntitle: Capitol Riot\nevent_date: 2021-01-06\n---\nEvent body.\n",
    );
    write_md(&kb_root, "_index.md", "---\ntitle: Index page\n---\n");

    // Repair passes, in the order an import would run them.
    let injected = repair::inject_ids(&kb_root).unwrap();
    assert_eq!(injected.len(), 2);
    assert_eq!(repair::normalize_wikilinks(&kb_root).unwrap(), 1);
    let counts = repair::normalize_research_frontmatter(&kb_root).unwrap();
    assert_eq!(counts.essay_type_to_type, 1);
    assert_eq!(counts.event_date_to_date, 1);
    assert_eq!(counts.research_status_normalized, 1);

    // Index the repaired tree.
    let store = open_store(&config);
    let indexer = IndexManager::new(&store, &config);
    assert_eq!(indexer.index_all(None).unwrap(), 2);

    // Entries landed under their injected stem ids with repaired fields.
    let actor = store.get_entry("powell-lewis", "research").unwrap().unwrap();
    assert_eq!(actor.entry_type, "actor");
    assert_eq!(actor.status.as_deref(), Some("in-progress"));
    assert_eq!(actor.links, vec!["ALEC"]);

    let event = store.get_entry("jan6", "research").unwrap().unwrap();
    assert_eq!(event.date.as_deref(), Some("2021-01-06"));

    // And the hyphenated id is searchable thanks to the sanitizer.
    let service = SearchService::with_settings(&store, &config.settings);
    let hits = service.search(&SearchRequest::new("model bills")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "powell-lewis");
}
