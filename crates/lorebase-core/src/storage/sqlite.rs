//! SQLite Storage Implementation
//!
//! Core store: entries with dependent rows, the FTS5 shadow kept coherent by
//! triggers, the sqlite-vec KNN table, the KB registry, settings, and the
//! embedding queue rows the worker drains.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, ToSql};

use crate::config::KbConfig;
use crate::model::{Entry, EntryVersion, IndexStats, KbRecord, QueueStatus, SearchHit};
use crate::EMBEDDING_DIMENSIONS;

/// Delimiters FTS5 wraps around matched terms in snippets.
pub const HIGHLIGHT_OPEN: &str = "**";
/// Closing delimiter for snippet highlights.
pub const HIGHLIGHT_CLOSE: &str = "**";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(rusqlite::Error),
    /// The store is locked by another writer; retryable
    #[error("Store is busy: {0}")]
    Busy(rusqlite::Error),
    /// A migration aborted mid-flight
    #[error("Schema migration v{version} failed: {source}")]
    SchemaCorrupt {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },
    /// Entry lookup failed
    #[error("Entry not found: {id} in {kb_name}")]
    EntryNotFound { id: String, kb_name: String },
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl StoreError {
    /// Classify a rusqlite error, surfacing lock contention as retryable.
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::Busy(err)
            }
            _ => StoreError::Database(err),
        }
    }

    /// True when the caller may simply retry the operation.
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::from_sqlite(err)
    }
}

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// FILTERS
// ============================================================================

/// WHERE-clause filters for lexical search. All fields optional; tags are
/// AND-joined.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub kb_name: Option<String>,
    pub entry_type: Option<String>,
    pub tags: Vec<String>,
    /// Inclusive ISO date lower bound
    pub date_from: Option<String>,
    /// Inclusive ISO date upper bound
    pub date_to: Option<String>,
}

/// A pending embedding-queue row.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub entry_id: String,
    pub kb_name: String,
    pub attempts: i64,
}

// ============================================================================
// STORE
// ============================================================================

/// Main store with integrated FTS and vector index.
///
/// Uses separate reader/writer connections for interior mutability. All
/// methods take `&self`, making the store `Send + Sync` so callers can share
/// it behind an `Arc` without an outer mutex.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    /// Whether the sqlite-vec extension loaded and `vec_entry` exists.
    vec_enabled: bool,
}

impl Store {
    /// Register sqlite-vec as an auto-extension. Must run before any
    /// connection is opened so every connection sees the vec0 module.
    fn register_vec_extension() {
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut std::ffi::c_char,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> std::ffi::c_int,
            >(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    }

    /// Apply PRAGMAs to a connection.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;",
        )?;
        Ok(())
    }

    /// Open (or create) the index database at `path`, bringing the schema to
    /// the current version.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Self::register_vec_extension();

        let mut writer = Connection::open(path)?;
        Self::configure_connection(&writer)?;

        // Pre-migration databases get stamped at baseline, then everything
        // newer than the stored head applies.
        super::migrations::stamp_baseline(&writer)?;
        super::migrations::migrate_to_head(&mut writer)?;

        let vec_enabled = Self::try_load_vec(&writer);

        let reader = Connection::open(path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            vec_enabled,
        })
    }

    /// Probe the sqlite-vec extension and create the KNN table when present.
    ///
    /// `vec_entry` is not migration-managed: it can only exist when the
    /// extension is loadable, and its rows join `entry` by rowid.
    fn try_load_vec(conn: &Connection) -> bool {
        match conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0)) {
            Ok(version) => {
                let sql = format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS vec_entry USING vec0(
                        embedding float[{EMBEDDING_DIMENSIONS}] distance_metric=cosine
                    );"
                );
                if let Err(e) = conn.execute_batch(&sql) {
                    tracing::warn!("Failed to create vec_entry table: {}", e);
                    return false;
                }
                tracing::info!("sqlite-vec {} loaded, vector search enabled", version);
                true
            }
            Err(e) => {
                tracing::warn!("sqlite-vec not available: {} - vector search disabled", e);
                false
            }
        }
    }

    /// Whether vector search is available on this database.
    pub fn vec_enabled(&self) -> bool {
        self.vec_enabled
    }

    // ========================================================================
    // ENTRIES
    // ========================================================================

    /// Insert or replace an entry together with its dependent rows, in one
    /// transaction. Replacement keeps the entry's rowid stable (the vector
    /// index joins on it); dependents are deleted and reinserted, no diff.
    /// The FTS shadow follows via triggers. Returns the entry rowid.
    pub fn upsert_entry(&self, entry: &Entry) -> Result<i64> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        let tx = writer.transaction()?;

        tx.execute(
            "INSERT INTO entry (
                id, kb_name, entry_type, title, summary, body, location,
                date, importance, status, file_path, created_by, modified_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id, kb_name) DO UPDATE SET
                entry_type = excluded.entry_type,
                title = excluded.title,
                summary = excluded.summary,
                body = excluded.body,
                location = excluded.location,
                date = excluded.date,
                importance = excluded.importance,
                status = excluded.status,
                file_path = excluded.file_path,
                modified_by = excluded.modified_by,
                updated_at = datetime('now')",
            params![
                entry.id,
                entry.kb_name,
                entry.entry_type,
                entry.title,
                entry.summary,
                entry.body,
                entry.location,
                entry.date,
                entry.importance,
                entry.status,
                entry.file_path,
                entry.created_by,
                entry.modified_by,
            ],
        )?;

        for table in ["entry_tag", "link", "source"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE entry_id = ?1 AND kb_name = ?2"),
                params![entry.id, entry.kb_name],
            )?;
        }
        for tag in &entry.tags {
            tx.execute(
                "INSERT OR IGNORE INTO entry_tag (entry_id, kb_name, tag) VALUES (?1, ?2, ?3)",
                params![entry.id, entry.kb_name, tag],
            )?;
        }
        for target in &entry.links {
            tx.execute(
                "INSERT OR IGNORE INTO link (entry_id, kb_name, target_id) VALUES (?1, ?2, ?3)",
                params![entry.id, entry.kb_name, target],
            )?;
        }
        for source in &entry.sources {
            tx.execute(
                "INSERT OR IGNORE INTO source (entry_id, kb_name, source) VALUES (?1, ?2, ?3)",
                params![entry.id, entry.kb_name, source],
            )?;
        }

        let rowid: i64 = tx.query_row(
            "SELECT rowid FROM entry WHERE id = ?1 AND kb_name = ?2",
            params![entry.id, entry.kb_name],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(rowid)
    }

    /// Look up a single entry with its dependents.
    pub fn get_entry(&self, id: &str, kb_name: &str) -> Result<Option<Entry>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;

        let entry = reader
            .query_row(
                "SELECT id, kb_name, entry_type, title, summary, body, location,
                        date, importance, status, file_path, created_by, modified_by
                 FROM entry WHERE id = ?1 AND kb_name = ?2",
                params![id, kb_name],
                Self::row_to_entry,
            )
            .optional()?;

        let Some(mut entry) = entry else {
            return Ok(None);
        };
        Self::load_dependents(&reader, &mut entry)?;
        Ok(Some(entry))
    }

    /// Look up an entry by its internal rowid (no dependents).
    pub fn get_entry_by_rowid(&self, rowid: i64) -> Result<Option<Entry>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let entry = reader
            .query_row(
                "SELECT id, kb_name, entry_type, title, summary, body, location,
                        date, importance, status, file_path, created_by, modified_by
                 FROM entry WHERE rowid = ?1",
                params![rowid],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// The internal rowid joining `entry` to the FTS and vector indexes.
    pub fn entry_rowid(&self, id: &str, kb_name: &str) -> Result<Option<i64>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let rowid = reader
            .query_row(
                "SELECT rowid FROM entry WHERE id = ?1 AND kb_name = ?2",
                params![id, kb_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rowid)
    }

    /// Delete an entry. Dependent rows cascade, the FTS delete trigger
    /// removes the shadow row, and the vector-index and queue rows are
    /// removed explicitly in the same transaction (vec0 tables sit outside
    /// FK enforcement). Returns false when the entry did not exist.
    pub fn delete_entry(&self, id: &str, kb_name: &str) -> Result<bool> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        let tx = writer.transaction()?;

        let rowid: Option<i64> = tx
            .query_row(
                "SELECT rowid FROM entry WHERE id = ?1 AND kb_name = ?2",
                params![id, kb_name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(rowid) = rowid else {
            return Ok(false);
        };

        if self.vec_enabled {
            tx.execute("DELETE FROM vec_entry WHERE rowid = ?1", params![rowid])?;
        }
        tx.execute(
            "DELETE FROM embed_queue WHERE entry_id = ?1 AND kb_name = ?2",
            params![id, kb_name],
        )?;
        tx.execute(
            "DELETE FROM entry WHERE id = ?1 AND kb_name = ?2",
            params![id, kb_name],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Entries of one KB (or all), with rowids, dependents not populated.
    /// Used by the batch embedder; tags/links/sources are not needed there.
    pub fn list_entries(&self, kb_name: Option<&str>) -> Result<Vec<(i64, Entry)>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;

        let sql_all = "SELECT rowid, id, kb_name, entry_type, title, summary, body, location,
                              date, importance, status, file_path, created_by, modified_by
                       FROM entry ORDER BY kb_name, id";
        let sql_kb = "SELECT rowid, id, kb_name, entry_type, title, summary, body, location,
                             date, importance, status, file_path, created_by, modified_by
                      FROM entry WHERE kb_name = ?1 ORDER BY id";

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(i64, Entry)> {
            let rowid: i64 = row.get(0)?;
            let entry = Entry {
                id: row.get(1)?,
                kb_name: row.get(2)?,
                entry_type: row.get(3)?,
                title: row.get(4)?,
                summary: row.get(5)?,
                body: row.get(6)?,
                location: row.get(7)?,
                date: row.get(8)?,
                importance: row.get(9)?,
                status: row.get(10)?,
                file_path: row.get(11)?,
                created_by: row.get(12)?,
                modified_by: row.get(13)?,
                ..Entry::default()
            };
            Ok((rowid, entry))
        };

        let mut out = Vec::new();
        if let Some(kb) = kb_name {
            let mut stmt = reader.prepare(sql_kb)?;
            for row in stmt.query_map(params![kb], map_row)? {
                out.push(row?);
            }
        } else {
            let mut stmt = reader.prepare(sql_all)?;
            for row in stmt.query_map([], map_row)? {
                out.push(row?);
            }
        }
        Ok(out)
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
        Ok(Entry {
            id: row.get(0)?,
            kb_name: row.get(1)?,
            entry_type: row.get(2)?,
            title: row.get(3)?,
            summary: row.get(4)?,
            body: row.get(5)?,
            location: row.get(6)?,
            date: row.get(7)?,
            importance: row.get(8)?,
            status: row.get(9)?,
            file_path: row.get(10)?,
            created_by: row.get(11)?,
            modified_by: row.get(12)?,
            ..Entry::default()
        })
    }

    fn load_dependents(conn: &Connection, entry: &mut Entry) -> rusqlite::Result<()> {
        entry.tags = Self::string_column(
            conn,
            "SELECT tag FROM entry_tag WHERE entry_id = ?1 AND kb_name = ?2 ORDER BY tag",
            &entry.id,
            &entry.kb_name,
        )?;
        entry.links = Self::string_column(
            conn,
            "SELECT target_id FROM link WHERE entry_id = ?1 AND kb_name = ?2 ORDER BY target_id",
            &entry.id,
            &entry.kb_name,
        )?;
        entry.sources = Self::string_column(
            conn,
            "SELECT source FROM source WHERE entry_id = ?1 AND kb_name = ?2 ORDER BY source",
            &entry.id,
            &entry.kb_name,
        )?;
        Ok(())
    }

    fn string_column(
        conn: &Connection,
        sql: &str,
        id: &str,
        kb_name: &str,
    ) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![id, kb_name], |row| row.get(0))?;
        rows.collect()
    }

    // ========================================================================
    // LEXICAL SEARCH
    // ========================================================================

    /// Full-text search over the FTS shadow, joined back to `entry` for
    /// filters, ordered by FTS relevance. The query must already be valid
    /// FTS5 syntax (see `search::sanitize_fts_query`).
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SearchHit>> {
        let mut sql = format!(
            "SELECT e.id, e.kb_name, e.entry_type, e.title, e.date, e.importance,
                    snippet(entry_fts, -1, '{HIGHLIGHT_OPEN}', '{HIGHLIGHT_CLOSE}', '\u{2026}', 12),
                    entry_fts.rank
             FROM entry_fts
             JOIN entry e ON e.rowid = entry_fts.rowid
             WHERE entry_fts MATCH ?"
        );

        let query = query.to_string();
        let mut bind: Vec<&dyn ToSql> = vec![&query];

        if let Some(ref kb) = filters.kb_name {
            sql.push_str(" AND e.kb_name = ?");
            bind.push(kb);
        }
        if let Some(ref entry_type) = filters.entry_type {
            sql.push_str(" AND e.entry_type = ?");
            bind.push(entry_type);
        }
        if let Some(ref date_from) = filters.date_from {
            sql.push_str(" AND e.date >= ?");
            bind.push(date_from);
        }
        if let Some(ref date_to) = filters.date_to {
            sql.push_str(" AND e.date <= ?");
            bind.push(date_to);
        }
        for tag in &filters.tags {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM entry_tag t
                              WHERE t.entry_id = e.id AND t.kb_name = e.kb_name AND t.tag = ?)",
            );
            bind.push(tag);
        }
        sql.push_str(" ORDER BY entry_fts.rank LIMIT ? OFFSET ?");
        bind.push(&limit);
        bind.push(&offset);

        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;

        let mut hits: Vec<SearchHit> = {
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt.query_map(bind.as_slice(), |row| {
                Ok(SearchHit {
                    id: row.get(0)?,
                    kb_name: row.get(1)?,
                    entry_type: row.get(2)?,
                    title: row.get(3)?,
                    date: row.get(4)?,
                    importance: row.get(5)?,
                    tags: Vec::new(),
                    snippet: row.get(6)?,
                    rank: row.get(7)?,
                    distance: None,
                    rrf_score: None,
                })
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        for hit in &mut hits {
            hit.tags = Self::string_column(
                &reader,
                "SELECT tag FROM entry_tag WHERE entry_id = ?1 AND kb_name = ?2 ORDER BY tag",
                &hit.id,
                &hit.kb_name,
            )?;
        }
        Ok(hits)
    }

    // ========================================================================
    // KB REGISTRY
    // ========================================================================

    /// Register or refresh a KB row from configuration.
    pub fn register_kb(&self, kb: &KbConfig) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        writer.execute(
            "INSERT INTO kb (name, kb_type, path, read_only) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                kb_type = excluded.kb_type,
                path = excluded.path,
                read_only = excluded.read_only",
            params![
                kb.name,
                kb.kb_type.as_str(),
                kb.path.to_string_lossy(),
                kb.read_only as i64,
            ],
        )?;
        Ok(())
    }

    /// Fetch a registered KB.
    pub fn get_kb(&self, name: &str) -> Result<Option<KbRecord>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let kb = reader
            .query_row(
                "SELECT name, kb_type, path, read_only, repo_id, repo_subpath, last_indexed
                 FROM kb WHERE name = ?1",
                params![name],
                Self::row_to_kb,
            )
            .optional()?;
        Ok(kb)
    }

    /// All registered KBs.
    pub fn list_kbs(&self) -> Result<Vec<KbRecord>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let mut stmt = reader.prepare(
            "SELECT name, kb_type, path, read_only, repo_id, repo_subpath, last_indexed
             FROM kb ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::row_to_kb)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Stamp a KB's last successful index time.
    pub fn touch_kb_indexed(&self, name: &str) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        writer.execute(
            "UPDATE kb SET last_indexed = datetime('now') WHERE name = ?1",
            params![name],
        )?;
        Ok(())
    }

    fn row_to_kb(row: &rusqlite::Row) -> rusqlite::Result<KbRecord> {
        let read_only: i64 = row.get(3)?;
        Ok(KbRecord {
            name: row.get(0)?,
            kb_type: row.get(1)?,
            path: row.get(2)?,
            read_only: read_only != 0,
            repo_id: row.get(4)?,
            repo_subpath: row.get(5)?,
            last_indexed: row.get(6)?,
        })
    }

    // ========================================================================
    // SETTINGS
    // ========================================================================

    /// Persist a process-wide key/value setting.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        writer.execute(
            "INSERT INTO setting (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// Read a setting.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let value = reader
            .query_row(
                "SELECT value FROM setting WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // ========================================================================
    // ENTRY VERSIONS (attribution records)
    // ========================================================================

    /// Record one attributed change to an entry.
    pub fn add_entry_version(&self, version: &EntryVersion) -> Result<i64> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        writer.execute(
            "INSERT INTO entry_version (
                entry_id, kb_name, commit_hash, author_name, author_email,
                author_login, commit_date, message, diff_summary, change_type
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                version.entry_id,
                version.kb_name,
                version.commit_hash,
                version.author_name,
                version.author_email,
                version.author_login,
                version.commit_date,
                version.message,
                version.diff_summary,
                version.change_type,
            ],
        )?;
        Ok(writer.last_insert_rowid())
    }

    /// Change history for an entry, most recent first.
    pub fn get_entry_versions(
        &self,
        entry_id: &str,
        kb_name: &str,
        limit: i64,
    ) -> Result<Vec<EntryVersion>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let mut stmt = reader.prepare(
            "SELECT entry_id, kb_name, commit_hash, author_name, author_email,
                    author_login, commit_date, message, diff_summary, change_type
             FROM entry_version
             WHERE entry_id = ?1 AND kb_name = ?2
             ORDER BY commit_date DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![entry_id, kb_name, limit], |row| {
            Ok(EntryVersion {
                entry_id: row.get(0)?,
                kb_name: row.get(1)?,
                commit_hash: row.get(2)?,
                author_name: row.get(3)?,
                author_email: row.get(4)?,
                author_login: row.get(5)?,
                commit_date: row.get(6)?,
                message: row.get(7)?,
                diff_summary: row.get(8)?,
                change_type: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ========================================================================
    // COUNTS
    // ========================================================================

    /// Number of entries, optionally per KB.
    pub fn entry_count(&self, kb_name: Option<&str>) -> Result<i64> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let count = match kb_name {
            Some(kb) => reader.query_row(
                "SELECT COUNT(*) FROM entry WHERE kb_name = ?1",
                params![kb],
                |row| row.get(0),
            )?,
            None => reader.query_row("SELECT COUNT(*) FROM entry", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    /// Number of rows in the FTS shadow (coherence checks).
    pub fn fts_count(&self) -> Result<i64> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        Ok(reader.query_row("SELECT COUNT(*) FROM entry_fts", [], |row| row.get(0))?)
    }

    /// Index-wide statistics.
    pub fn stats(&self) -> Result<IndexStats> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let total_entries: i64 =
            reader.query_row("SELECT COUNT(*) FROM entry", [], |row| row.get(0))?;
        let total_tags: i64 = reader.query_row(
            "SELECT COUNT(DISTINCT tag) FROM entry_tag",
            [],
            |row| row.get(0),
        )?;
        let total_links: i64 =
            reader.query_row("SELECT COUNT(*) FROM link", [], |row| row.get(0))?;

        let mut stmt = reader
            .prepare("SELECT kb_name, COUNT(*) FROM entry GROUP BY kb_name ORDER BY kb_name")?;
        let kbs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;

        Ok(IndexStats {
            total_entries,
            total_tags,
            total_links,
            kbs,
        })
    }

    // ========================================================================
    // VECTOR INDEX
    // ========================================================================

    /// Store an embedding for the entry with this rowid. Delete-then-insert;
    /// vec0 rows cannot be updated in place.
    pub fn upsert_embedding(&self, rowid: i64, embedding: &[f32]) -> Result<()> {
        if !self.vec_enabled {
            return Err(StoreError::Init("sqlite-vec not loaded".into()));
        }
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        let tx = writer.transaction()?;
        Self::write_embedding_tx(&tx, rowid, embedding)?;
        tx.commit()?;
        Ok(())
    }

    /// Store a batch of embeddings in a single transaction.
    pub fn write_embeddings(&self, rows: &[(i64, Vec<f32>)]) -> Result<()> {
        if !self.vec_enabled {
            return Err(StoreError::Init("sqlite-vec not loaded".into()));
        }
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        let tx = writer.transaction()?;
        for (rowid, embedding) in rows {
            Self::write_embedding_tx(&tx, *rowid, embedding)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn write_embedding_tx(
        tx: &rusqlite::Transaction<'_>,
        rowid: i64,
        embedding: &[f32],
    ) -> Result<()> {
        let blob = embedding_to_blob(embedding);
        tx.execute("DELETE FROM vec_entry WHERE rowid = ?1", params![rowid])?;
        tx.execute(
            "INSERT INTO vec_entry (rowid, embedding) VALUES (?1, ?2)",
            params![rowid, blob],
        )?;
        Ok(())
    }

    /// Remove the embedding for a rowid, if any.
    pub fn delete_embedding(&self, rowid: i64) -> Result<()> {
        if !self.vec_enabled {
            return Ok(());
        }
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        writer.execute("DELETE FROM vec_entry WHERE rowid = ?1", params![rowid])?;
        Ok(())
    }

    /// KNN over the vector index. Returns (rowid, cosine distance) pairs
    /// ordered by distance ascending. Empty when vectors are disabled.
    pub fn knn(&self, query: &[f32], k: i64) -> Result<Vec<(i64, f64)>> {
        if !self.vec_enabled || k <= 0 {
            return Ok(Vec::new());
        }
        let blob = embedding_to_blob(query);
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let mut stmt = reader.prepare(
            "SELECT rowid, distance FROM vec_entry
             WHERE embedding MATCH ?1 AND k = ?2
             ORDER BY distance",
        )?;
        let rows = stmt.query_map(params![blob, k], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Rowids that already have a vector. One query, used by the batch
    /// embedder to skip work.
    pub fn embedded_rowids(&self) -> Result<HashSet<i64>> {
        if !self.vec_enabled {
            return Ok(HashSet::new());
        }
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let mut stmt = reader.prepare("SELECT rowid FROM vec_entry")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Number of embedded entries.
    pub fn embedding_count(&self) -> Result<i64> {
        if !self.vec_enabled {
            return Ok(0);
        }
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        Ok(reader.query_row("SELECT COUNT(*) FROM vec_entry", [], |row| row.get(0))?)
    }

    // ========================================================================
    // EMBEDDING QUEUE
    // ========================================================================

    /// Enqueue an entry for embedding. Idempotent: concurrent enqueues of
    /// the same key leave one row.
    pub fn queue_insert(&self, entry_id: &str, kb_name: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        writer.execute(
            "INSERT OR IGNORE INTO embed_queue (entry_id, kb_name, queued_at, status, attempts)
             VALUES (?1, ?2, ?3, 'pending', 0)",
            params![entry_id, kb_name, now],
        )?;
        Ok(())
    }

    /// Oldest pending rows still under the attempt bound, FIFO.
    pub fn queue_pending(&self, max_attempts: i64, limit: i64) -> Result<Vec<QueueRow>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let mut stmt = reader.prepare(
            "SELECT entry_id, kb_name, attempts FROM embed_queue
             WHERE status = 'pending' AND attempts < ?1
             ORDER BY queued_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![max_attempts, limit], |row| {
            Ok(QueueRow {
                entry_id: row.get(0)?,
                kb_name: row.get(1)?,
                attempts: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Apply the outcome of one worker batch in a single transaction:
    /// successes leave the queue; failures record the new attempt count and
    /// flip to `failed` once it reaches the bound.
    pub fn queue_apply(
        &self,
        done: &[(String, String)],
        failures: &[(String, String, i64, String)],
        max_attempts: i64,
    ) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        let tx = writer.transaction()?;
        for (entry_id, kb_name) in done {
            tx.execute(
                "DELETE FROM embed_queue WHERE entry_id = ?1 AND kb_name = ?2",
                params![entry_id, kb_name],
            )?;
        }
        for (entry_id, kb_name, attempts, error) in failures {
            let status = if *attempts >= max_attempts {
                "failed"
            } else {
                "pending"
            };
            tx.execute(
                "UPDATE embed_queue SET attempts = ?1, status = ?2, error = ?3
                 WHERE entry_id = ?4 AND kb_name = ?5",
                params![attempts, status, error, entry_id, kb_name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Aggregate queue counts.
    pub fn queue_counts(&self) -> Result<QueueStatus> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("Reader lock poisoned".into()))?;
        let mut stmt =
            reader.prepare("SELECT status, COUNT(*) FROM embed_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut status = QueueStatus::default();
        for row in rows {
            let (state, count) = row?;
            match state.as_str() {
                "pending" => status.pending = count,
                "failed" => status.failed = count,
                _ => {}
            }
            status.total += count;
        }
        Ok(status)
    }

    /// Return quarantined rows to `pending` with a fresh attempt budget.
    pub fn queue_reset_failed(&self) -> Result<usize> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("Writer lock poisoned".into()))?;
        let n = writer.execute(
            "UPDATE embed_queue SET status = 'pending', attempts = 0, error = NULL
             WHERE status = 'failed'",
            [],
        )?;
        Ok(n)
    }
}

/// Little-endian float32 packing for sqlite-vec blobs.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_blob`]. None when the length is not a multiple
/// of four bytes.
pub fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::KbType;
    use std::path::PathBuf;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("index.db")).unwrap();
        (dir, store)
    }

    fn test_kb(store: &Store, name: &str) {
        store
            .register_kb(&KbConfig {
                name: name.to_string(),
                path: PathBuf::from("/tmp/kb"),
                kb_type: KbType::Research,
                read_only: false,
            })
            .unwrap();
    }

    fn entry(id: &str, kb: &str, title: &str, body: &str) -> Entry {
        Entry {
            id: id.to_string(),
            kb_name: kb.to_string(),
            entry_type: "note".to_string(),
            title: title.to_string(),
            body: Some(body.to_string()),
            ..Entry::default()
        }
    }

    #[test]
    fn upsert_get_delete_roundtrip() {
        let (_dir, store) = test_store();
        test_kb(&store, "kb");

        let mut e = entry("alpha", "kb", "Alpha", "first body");
        e.tags = vec!["one".into(), "two".into()];
        e.links = vec!["beta".into()];
        e.sources = vec!["https://example.com".into()];
        store.upsert_entry(&e).unwrap();

        let got = store.get_entry("alpha", "kb").unwrap().unwrap();
        assert_eq!(got.title, "Alpha");
        assert_eq!(got.tags, vec!["one", "two"]);
        assert_eq!(got.links, vec!["beta"]);
        assert_eq!(got.sources.len(), 1);

        assert!(store.delete_entry("alpha", "kb").unwrap());
        assert!(store.get_entry("alpha", "kb").unwrap().is_none());
        assert!(!store.delete_entry("alpha", "kb").unwrap());
    }

    #[test]
    fn replace_keeps_rowid_and_rewrites_dependents() {
        let (_dir, store) = test_store();
        test_kb(&store, "kb");

        let mut e = entry("alpha", "kb", "Alpha", "first");
        e.tags = vec!["old".into()];
        let rowid = store.upsert_entry(&e).unwrap();

        e.title = "Alpha v2".to_string();
        e.tags = vec!["new".into()];
        let rowid2 = store.upsert_entry(&e).unwrap();
        assert_eq!(rowid, rowid2);

        let got = store.get_entry("alpha", "kb").unwrap().unwrap();
        assert_eq!(got.title, "Alpha v2");
        assert_eq!(got.tags, vec!["new"]);
    }

    #[test]
    fn fts_shadow_tracks_entry_count() {
        let (_dir, store) = test_store();
        test_kb(&store, "kb");

        for i in 0..5 {
            store
                .upsert_entry(&entry(&format!("e{i}"), "kb", "Title", "body text"))
                .unwrap();
        }
        assert_eq!(store.entry_count(None).unwrap(), 5);
        assert_eq!(store.fts_count().unwrap(), 5);

        store.upsert_entry(&entry("e0", "kb", "Updated", "new body")).unwrap();
        assert_eq!(store.fts_count().unwrap(), 5);

        store.delete_entry("e3", "kb").unwrap();
        assert_eq!(store.entry_count(None).unwrap(), 4);
        assert_eq!(store.fts_count().unwrap(), 4);
    }

    #[test]
    fn fts_search_reflects_updates() {
        let (_dir, store) = test_store();
        test_kb(&store, "kb");
        store
            .upsert_entry(&entry("a", "kb", "Climate", "carbon emissions policy"))
            .unwrap();

        let hits = store
            .search("carbon", &SearchFilters::default(), 10, 0)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("**carbon**"));

        store
            .upsert_entry(&entry("a", "kb", "Climate", "renewable energy targets"))
            .unwrap();
        assert!(store
            .search("carbon", &SearchFilters::default(), 10, 0)
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .search("renewable", &SearchFilters::default(), 10, 0)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn search_filters_apply() {
        let (_dir, store) = test_store();
        test_kb(&store, "kb1");
        test_kb(&store, "kb2");

        let mut a = entry("a", "kb1", "Shared topic", "shared words here");
        a.entry_type = "event".to_string();
        a.date = Some("2024-01-10".to_string());
        a.tags = vec!["politics".into()];
        store.upsert_entry(&a).unwrap();

        let mut b = entry("b", "kb2", "Shared topic", "shared words here");
        b.date = Some("2024-03-05".to_string());
        store.upsert_entry(&b).unwrap();

        let kb_only = store
            .search(
                "shared",
                &SearchFilters {
                    kb_name: Some("kb1".into()),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(kb_only.len(), 1);
        assert_eq!(kb_only[0].id, "a");

        let typed = store
            .search(
                "shared",
                &SearchFilters {
                    entry_type: Some("event".into()),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(typed.len(), 1);

        let dated = store
            .search(
                "shared",
                &SearchFilters {
                    date_from: Some("2024-02-01".into()),
                    date_to: Some("2024-12-31".into()),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(dated.len(), 1);
        assert_eq!(dated[0].id, "b");

        let tagged = store
            .search(
                "shared",
                &SearchFilters {
                    tags: vec!["politics".into()],
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].tags, vec!["politics"]);
    }

    #[test]
    fn vector_roundtrip_and_knn() {
        let (_dir, store) = test_store();
        if !store.vec_enabled() {
            return;
        }
        test_kb(&store, "kb");

        let r1 = store.upsert_entry(&entry("a", "kb", "A", "a")).unwrap();
        let r2 = store.upsert_entry(&entry("b", "kb", "B", "b")).unwrap();

        let mut v1 = vec![0.0f32; EMBEDDING_DIMENSIONS];
        v1[0] = 1.0;
        let mut v2 = vec![0.0f32; EMBEDDING_DIMENSIONS];
        v2[1] = 1.0;
        store.write_embeddings(&[(r1, v1.clone()), (r2, v2)]).unwrap();
        assert_eq!(store.embedding_count().unwrap(), 2);

        let hits = store.knn(&v1, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, r1);
        assert!(hits[0].1 < hits[1].1);

        // Deleting the entry clears its vector row in the same transaction
        store.delete_entry("a", "kb").unwrap();
        assert_eq!(store.embedding_count().unwrap(), 1);
        let remaining = store.embedded_rowids().unwrap();
        assert!(!remaining.contains(&r1));
    }

    #[test]
    fn vec_rows_always_have_a_parent_entry() {
        let (_dir, store) = test_store();
        if !store.vec_enabled() {
            return;
        }
        test_kb(&store, "kb");
        let rowid = store.upsert_entry(&entry("a", "kb", "A", "a")).unwrap();
        store
            .upsert_embedding(rowid, &vec![0.5f32; EMBEDDING_DIMENSIONS])
            .unwrap();

        for r in store.embedded_rowids().unwrap() {
            assert!(store.get_entry_by_rowid(r).unwrap().is_some());
        }
    }

    #[test]
    fn blob_roundtrip_is_lossless() {
        let original = vec![0.1f32, 0.2, -0.3, 0.0, 1.0, -1.0];
        let blob = embedding_to_blob(&original);
        assert_eq!(blob.len(), original.len() * 4);
        let recovered = blob_to_embedding(&blob).unwrap();
        for (a, b) in original.iter().zip(recovered.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!(blob_to_embedding(&blob[..5]).is_none());
    }

    #[test]
    fn queue_is_idempotent_and_fifo() {
        let (_dir, store) = test_store();
        test_kb(&store, "kb");
        store.queue_insert("a", "kb").unwrap();
        store.queue_insert("a", "kb").unwrap();
        store.queue_insert("b", "kb").unwrap();

        let status = store.queue_counts().unwrap();
        assert_eq!(status.pending, 2);
        assert_eq!(status.total, 2);

        let rows = store.queue_pending(3, 10).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn queue_apply_quarantines_at_bound() {
        let (_dir, store) = test_store();
        store.queue_insert("a", "kb").unwrap();

        store
            .queue_apply(&[], &[("a".into(), "kb".into(), 3, "boom".into())], 3)
            .unwrap();
        let status = store.queue_counts().unwrap();
        assert_eq!(status.failed, 1);
        assert_eq!(status.pending, 0);
        assert!(store.queue_pending(3, 10).unwrap().is_empty());

        assert_eq!(store.queue_reset_failed().unwrap(), 1);
        assert_eq!(store.queue_counts().unwrap().pending, 1);
    }

    #[test]
    fn settings_roundtrip() {
        let (_dir, store) = test_store();
        assert!(store.get_setting("missing").unwrap().is_none());
        store.set_setting("last_embed_model", "all-MiniLM-L6-v2").unwrap();
        store.set_setting("last_embed_model", "bge-small-en-v1.5").unwrap();
        assert_eq!(
            store.get_setting("last_embed_model").unwrap().as_deref(),
            Some("bge-small-en-v1.5")
        );
    }

    #[test]
    fn entry_versions_roundtrip() {
        let (_dir, store) = test_store();
        test_kb(&store, "kb");
        store.upsert_entry(&entry("a", "kb", "A", "a")).unwrap();

        store
            .add_entry_version(&EntryVersion {
                entry_id: "a".into(),
                kb_name: "kb".into(),
                commit_hash: "deadbeef".into(),
                author_login: Some("local".into()),
                commit_date: "2026-01-02T03:04:05Z".into(),
                message: Some("edit".into()),
                ..EntryVersion::default()
            })
            .unwrap();

        let versions = store.get_entry_versions("a", "kb", 10).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].commit_hash, "deadbeef");
    }
}
