//! Journey: schema creation, reopen, and baseline stamping of a database
//! that predates the migration runtime.

use lorebase_core::{
    migrate_to_head, stamp_baseline, Entry, KbConfig, KbType, Store, MIGRATIONS,
};

#[test]
fn fresh_database_reaches_head_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("index.db");

    {
        let store = Store::open(&db_path).unwrap();
        store
            .register_kb(&KbConfig {
                name: "kb".into(),
                path: "/tmp/kb".into(),
                kb_type: KbType::Notes,
                read_only: false,
            })
            .unwrap();
        store
            .upsert_entry(&Entry {
                id: "persisted".into(),
                kb_name: "kb".into(),
                entry_type: "note".into(),
                title: "Persisted".into(),
                body: Some("survives reopen".into()),
                ..Entry::default()
            })
            .unwrap();
    }

    // Reopen: migrations are a no-op, data is intact, FTS still answers.
    let store = Store::open(&db_path).unwrap();
    assert!(store.get_entry("persisted", "kb").unwrap().is_some());
    let hits = store
        .search("survives", &Default::default(), 10, 0)
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn pre_migration_database_is_stamped_then_upgraded() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("legacy.db");

    // A database created before the migration runtime: relational tables
    // exist (as an ORM would have made them), no schema_version.
    {
        let conn = rusqlite_open(&db_path);
        conn.execute_batch(
            "CREATE TABLE kb (name TEXT PRIMARY KEY, kb_type TEXT NOT NULL DEFAULT 'notes',
                 path TEXT NOT NULL, read_only INTEGER NOT NULL DEFAULT 0, last_indexed TEXT);
             CREATE TABLE entry (id TEXT NOT NULL, kb_name TEXT NOT NULL,
                 entry_type TEXT NOT NULL DEFAULT 'note', title TEXT NOT NULL DEFAULT '',
                 summary TEXT, body TEXT, location TEXT, date TEXT, importance INTEGER,
                 status TEXT, file_path TEXT, created_at TEXT, updated_at TEXT,
                 PRIMARY KEY (id, kb_name));
             CREATE VIRTUAL TABLE entry_fts USING fts5(
                 id, kb_name, entry_type, title, body, summary, location,
                 content='entry', content_rowid='rowid', tokenize='porter unicode61');
             INSERT INTO kb (name, path) VALUES ('legacy', '/tmp/legacy');
             INSERT INTO entry (id, kb_name, title, body)
                 VALUES ('old', 'legacy', 'Old Entry', 'pre-migration data');
             INSERT INTO entry_fts(rowid, id, kb_name, entry_type, title, body, summary, location)
                 SELECT rowid, id, kb_name, entry_type, title, COALESCE(body,''), '', ''
                 FROM entry;",
        )
        .unwrap();
    }

    // Opening stamps the baseline and applies the rest.
    let store = Store::open(&db_path).unwrap();
    let entry = store.get_entry("old", "legacy").unwrap().unwrap();
    assert_eq!(entry.title, "Old Entry");

    // Post-upgrade tables work immediately.
    store.set_setting("upgraded", "yes").unwrap();
    store.queue_insert("old", "legacy").unwrap();
    assert_eq!(store.queue_counts().unwrap().pending, 1);
}

#[test]
fn stamp_baseline_is_idempotent_on_raw_connections() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("raw.db");
    let mut conn = rusqlite_open(&db_path);

    // Empty database: nothing to stamp, migrations build everything.
    assert!(!stamp_baseline(&conn).unwrap());
    let applied = migrate_to_head(&mut conn).unwrap();
    assert_eq!(applied as usize, MIGRATIONS.len());

    // Now a version table exists; stamping stays a no-op.
    assert!(!stamp_baseline(&conn).unwrap());
    assert_eq!(migrate_to_head(&mut conn).unwrap(), 0);
}

fn rusqlite_open(path: &std::path::Path) -> rusqlite::Connection {
    rusqlite::Connection::open(path).unwrap()
}
