//! Journey: enqueue-after-write, worker draining, retry and quarantine,
//! and KNN over worker-produced vectors, all with stub embedders so no
//! model download is involved.

use std::sync::atomic::{AtomicUsize, Ordering};

use lorebase_e2e_tests::{open_store, research_config, unit_vector, write_md};
use lorebase_core::{EmbedError, EmbeddingWorker, EntryEmbedder, IndexManager, Store};

/// Writes a deterministic unit vector per entry, like the real service but
/// without a model.
struct VectorWriter<'a> {
    store: &'a Store,
    counter: AtomicUsize,
}

impl EntryEmbedder for VectorWriter<'_> {
    fn embed_entry(&self, entry_id: &str, kb_name: &str) -> Result<bool, EmbedError> {
        let Some(rowid) = self.store.entry_rowid(entry_id, kb_name)? else {
            return Ok(false);
        };
        let hot = self.counter.fetch_add(1, Ordering::SeqCst);
        self.store.upsert_embedding(rowid, &unit_vector(hot))?;
        Ok(true)
    }
}

struct AlwaysFails;
impl EntryEmbedder for AlwaysFails {
    fn embed_entry(&self, _entry_id: &str, _kb_name: &str) -> Result<bool, EmbedError> {
        Err(EmbedError::Model("stubbed to raise".into()))
    }
}

fn seeded() -> (tempfile::TempDir, lorebase_core::Config, Store) {
    let dir = tempfile::tempdir().unwrap();
    let config = research_config(dir.path());
    let kb_root = &config.knowledge_bases[0].path;
    for (id, title) in [
        ("climate-policy", "Climate Policy"),
        ("tax-reform", "Tax Reform"),
        ("immigration", "Immigration"),
    ] {
        write_md(
            kb_root,
            &format!("{id}.md"),
            &format!("---\nid: {id}\ntitle: {title}\n---\nBody for {title}.\n"),
        );
    }
    let store = open_store(&config);
    IndexManager::new(&store, &config).index_all(None).unwrap();
    (dir, config, store)
}

#[test]
fn indexing_enqueues_and_worker_drains_into_vectors() {
    let (_dir, _config, store) = seeded();
    assert_eq!(store.queue_counts().unwrap().pending, 3);

    let embedder = VectorWriter {
        store: &store,
        counter: AtomicUsize::new(0),
    };
    let worker = EmbeddingWorker::new(&store, &embedder);

    assert_eq!(worker.process_batch(10).unwrap(), 3);
    assert_eq!(worker.get_status().unwrap().total, 0);

    if store.vec_enabled() {
        assert_eq!(store.embedding_count().unwrap(), 3);
        // Every vector row has a parent entry
        for rowid in store.embedded_rowids().unwrap() {
            assert!(store.get_entry_by_rowid(rowid).unwrap().is_some());
        }
        // KNN with the first entry's vector ranks that entry first
        let neighbors = store.knn(&unit_vector(0), 3).unwrap();
        assert_eq!(neighbors.len(), 3);
        assert!(neighbors[0].1 < 1e-6);
        assert!(neighbors[1].1 > 0.5);
    }
}

#[test]
fn poisoned_entries_retry_then_quarantine_then_reset() {
    let (_dir, _config, store) = seeded();
    let embedder = AlwaysFails;
    let worker = EmbeddingWorker::new(&store, &embedder).with_max_attempts(2);

    // Two failing passes quarantine everything
    worker.process_batch(10).unwrap();
    let mid = worker.get_status().unwrap();
    assert_eq!(mid.pending, 3);
    assert_eq!(mid.failed, 0);

    worker.process_batch(10).unwrap();
    let after = worker.get_status().unwrap();
    assert_eq!(after.pending, 0);
    assert_eq!(after.failed, 3);

    // Quarantined rows are invisible to further batches
    assert_eq!(worker.process_batch(10).unwrap(), 0);
    assert_eq!(worker.get_status().unwrap().failed, 3);

    // Manual reset is the only way back
    assert_eq!(worker.reset_failed().unwrap(), 3);
    assert_eq!(worker.get_status().unwrap().pending, 3);
}

#[test]
fn deleting_an_entry_clears_its_queue_row() {
    let (_dir, _config, store) = seeded();
    assert_eq!(store.queue_counts().unwrap().pending, 3);
    store.delete_entry("tax-reform", "research").unwrap();
    assert_eq!(store.queue_counts().unwrap().pending, 2);
}

#[test]
fn requeue_after_successful_drain_is_reprocessed() {
    let (_dir, config, store) = seeded();
    let embedder = VectorWriter {
        store: &store,
        counter: AtomicUsize::new(0),
    };
    let worker = EmbeddingWorker::new(&store, &embedder);
    worker.process_batch(10).unwrap();

    // Reindexing re-enqueues every entry; the worker sees them again.
    IndexManager::new(&store, &config).index_all(None).unwrap();
    assert_eq!(store.queue_counts().unwrap().pending, 3);
    assert_eq!(worker.process_batch(10).unwrap(), 3);
}
