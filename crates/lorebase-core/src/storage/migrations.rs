//! Database Migrations
//!
//! Versioned, forward-only schema evolution. Each migration runs in its own
//! transaction; a database that predates the migration runtime can be
//! stamped at the baseline version without re-running it.

use rusqlite::Connection;

use super::sqlite::StoreError;

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: kb, entry + dependents, FTS5 shadow and triggers",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Collaboration tables: user, repo, workspace_repo, entry_version",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Settings table and embedding queue",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
///
/// The FTS shadow is content-external, pointing at `entry` by rowid, so the
/// three triggers are load-bearing: without them the index silently drifts.
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS kb (
    name TEXT PRIMARY KEY,
    kb_type TEXT NOT NULL DEFAULT 'notes',
    path TEXT NOT NULL,
    read_only INTEGER NOT NULL DEFAULT 0,
    last_indexed TEXT
);

CREATE TABLE IF NOT EXISTS entry (
    id TEXT NOT NULL,
    kb_name TEXT NOT NULL REFERENCES kb(name) ON DELETE CASCADE,
    entry_type TEXT NOT NULL DEFAULT 'note',
    title TEXT NOT NULL DEFAULT '',
    summary TEXT,
    body TEXT,
    location TEXT,
    date TEXT,
    importance INTEGER,
    status TEXT,
    file_path TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (id, kb_name)
);

CREATE INDEX IF NOT EXISTS idx_entry_kb ON entry(kb_name);
CREATE INDEX IF NOT EXISTS idx_entry_type ON entry(entry_type);
CREATE INDEX IF NOT EXISTS idx_entry_date ON entry(date);

CREATE TABLE IF NOT EXISTS entry_tag (
    entry_id TEXT NOT NULL,
    kb_name TEXT NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (entry_id, kb_name, tag),
    FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_entry_tag_tag ON entry_tag(tag);

CREATE TABLE IF NOT EXISTS link (
    entry_id TEXT NOT NULL,
    kb_name TEXT NOT NULL,
    target_id TEXT NOT NULL,
    PRIMARY KEY (entry_id, kb_name, target_id),
    FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_link_target ON link(target_id);

CREATE TABLE IF NOT EXISTS source (
    entry_id TEXT NOT NULL,
    kb_name TEXT NOT NULL,
    source TEXT NOT NULL,
    PRIMARY KEY (entry_id, kb_name, source),
    FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE
);

CREATE VIRTUAL TABLE IF NOT EXISTS entry_fts USING fts5(
    id, kb_name, entry_type, title, body, summary, location,
    content='entry', content_rowid='rowid',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS entry_ai AFTER INSERT ON entry BEGIN
    INSERT INTO entry_fts(rowid, id, kb_name, entry_type, title, body, summary, location)
    VALUES (new.rowid, new.id, new.kb_name, new.entry_type, new.title,
            COALESCE(new.body, ''), COALESCE(new.summary, ''), COALESCE(new.location, ''));
END;

CREATE TRIGGER IF NOT EXISTS entry_ad AFTER DELETE ON entry BEGIN
    INSERT INTO entry_fts(entry_fts, rowid, id, kb_name, entry_type, title, body, summary, location)
    VALUES('delete', old.rowid, old.id, old.kb_name, old.entry_type, old.title,
           COALESCE(old.body, ''), COALESCE(old.summary, ''), COALESCE(old.location, ''));
END;

CREATE TRIGGER IF NOT EXISTS entry_au AFTER UPDATE ON entry BEGIN
    INSERT INTO entry_fts(entry_fts, rowid, id, kb_name, entry_type, title, body, summary, location)
    VALUES('delete', old.rowid, old.id, old.kb_name, old.entry_type, old.title,
           COALESCE(old.body, ''), COALESCE(old.summary, ''), COALESCE(old.location, ''));
    INSERT INTO entry_fts(rowid, id, kb_name, entry_type, title, body, summary, location)
    VALUES (new.rowid, new.id, new.kb_name, new.entry_type, new.title,
            COALESCE(new.body, ''), COALESCE(new.summary, ''), COALESCE(new.location, ''));
END;

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// V2: Collaboration tables
///
/// The ALTER TABLE ADD COLUMN statements are applied separately by the
/// runner because a database stamped at baseline may already carry the
/// columns. See [`apply_v2_columns`].
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    login TEXT NOT NULL UNIQUE,
    display_name TEXT,
    email TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    last_seen TEXT
);
CREATE INDEX IF NOT EXISTS idx_user_login ON user(login);

CREATE TABLE IF NOT EXISTS repo (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    local_path TEXT NOT NULL,
    remote_url TEXT,
    default_branch TEXT DEFAULT 'main',
    last_synced_commit TEXT,
    last_synced TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_repo_name ON repo(name);

CREATE TABLE IF NOT EXISTS workspace_repo (
    user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE,
    repo_id INTEGER NOT NULL REFERENCES repo(id) ON DELETE CASCADE,
    added_at TEXT DEFAULT CURRENT_TIMESTAMP,
    role TEXT DEFAULT 'subscriber',
    PRIMARY KEY (user_id, repo_id)
);

CREATE TABLE IF NOT EXISTS entry_version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL,
    kb_name TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    author_name TEXT,
    author_email TEXT,
    author_login TEXT,
    commit_date TEXT NOT NULL,
    message TEXT,
    diff_summary TEXT,
    change_type TEXT,
    FOREIGN KEY (entry_id, kb_name) REFERENCES entry(id, kb_name) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_entry_version_entry ON entry_version(entry_id, kb_name);
CREATE INDEX IF NOT EXISTS idx_entry_version_commit ON entry_version(commit_hash);
CREATE INDEX IF NOT EXISTS idx_entry_version_date ON entry_version(commit_date);

INSERT OR IGNORE INTO user (login, display_name) VALUES ('local', 'Local User');
"#;

/// Columns added by V2 that may already exist on a baseline-stamped
/// database. Applied with duplicate-column tolerance.
const V2_ADD_COLUMNS: &[&str] = &[
    "ALTER TABLE kb ADD COLUMN repo_id INTEGER REFERENCES repo(id) ON DELETE SET NULL",
    "ALTER TABLE kb ADD COLUMN repo_subpath TEXT DEFAULT ''",
    "ALTER TABLE entry ADD COLUMN created_by TEXT",
    "ALTER TABLE entry ADD COLUMN modified_by TEXT",
];

/// V3: Settings table and embedding queue
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS setting (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    value TEXT,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_setting_key ON setting(key);

CREATE TABLE IF NOT EXISTS embed_queue (
    entry_id TEXT NOT NULL,
    kb_name TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (entry_id, kb_name)
);
CREATE INDEX IF NOT EXISTS idx_embed_queue_status ON embed_queue(status, queued_at);
"#;

/// Read the stored schema version, 0 when the version table does not exist.
pub fn get_current_version(conn: &Connection) -> rusqlite::Result<u32> {
    if !table_exists(conn, "schema_version")? {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Apply every migration newer than the stored head, in ascending order,
/// each in its own transaction. Returns the number applied.
pub fn migrate_to_head(conn: &mut Connection) -> Result<u32, StoreError> {
    let current_version = get_current_version(conn).map_err(StoreError::from_sqlite)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        tracing::info!(
            "Applying migration v{}: {}",
            migration.version,
            migration.description
        );

        let tx = conn
            .transaction()
            .map_err(StoreError::from_sqlite)?;

        // execute_batch handles multi-statement SQL including triggers
        tx.execute_batch(migration.up)
            .map_err(|source| StoreError::SchemaCorrupt {
                version: migration.version,
                source,
            })?;

        if migration.version == 2 {
            apply_v2_columns(&tx)?;
        }

        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            [migration.version],
        )
        .map_err(|source| StoreError::SchemaCorrupt {
            version: migration.version,
            source,
        })?;

        tx.commit().map_err(|source| StoreError::SchemaCorrupt {
            version: migration.version,
            source,
        })?;

        applied += 1;
    }

    Ok(applied)
}

/// Record the baseline version on a database that has tables but no version
/// table (created before the migration runtime existed). Returns true when
/// a stamp was written.
pub fn stamp_baseline(conn: &Connection) -> Result<bool, StoreError> {
    if table_exists(conn, "schema_version").map_err(StoreError::from_sqlite)? {
        return Ok(false);
    }
    if !table_exists(conn, "entry").map_err(StoreError::from_sqlite)? {
        return Ok(false);
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(StoreError::from_sqlite)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'))",
        [],
    )
    .map_err(StoreError::from_sqlite)?;

    tracing::info!("Stamped baseline schema version 1 on pre-migration database");
    Ok(true)
}

/// ALTER TABLE ADD COLUMN for V2, swallowing only the duplicate-column
/// error a baseline-stamped database produces. Anything else propagates.
fn apply_v2_columns(conn: &Connection) -> Result<(), StoreError> {
    for sql in V2_ADD_COLUMNS {
        match conn.execute_batch(sql) {
            Ok(()) => {}
            Err(e) if is_duplicate_column(&e) => {
                tracing::debug!("Column already present, skipping: {}", sql);
            }
            Err(source) => {
                return Err(StoreError::SchemaCorrupt { version: 2, source });
            }
        }
    }
    Ok(())
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("duplicate column name")
    )
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )
}
