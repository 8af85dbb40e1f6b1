//! Background Embedding Worker
//!
//! Drains the durable `embed_queue` table: a single-threaded, at-least-once
//! processor with bounded retries and poison-row quarantine. The queue is
//! the state; the worker itself holds none, so a crash between batches
//! loses nothing.

use crate::model::QueueStatus;
use crate::storage::{Store, StoreError};

/// Default retry bound before a row is quarantined.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// Error text longer than this is truncated before it is logged or stored.
const MAX_ERROR_LEN: usize = 200;

/// Per-entry embedding failure, as seen by the worker.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Model-layer failure (initialization or inference)
    #[error("Embedding failed: {0}")]
    Model(String),
}

/// The seam between the worker and whatever computes embeddings.
///
/// Returns `Ok(false)` when the entry is missing or textless: a skip,
/// not an error, and the row still leaves the queue.
pub trait EntryEmbedder {
    fn embed_entry(&self, entry_id: &str, kb_name: &str) -> Result<bool, EmbedError>;
}

/// Durable-queue worker. `enqueue` is idempotent and safe from many
/// writers; `process_batch` is meant to run on one background task.
pub struct EmbeddingWorker<'a> {
    store: &'a Store,
    embedder: &'a dyn EntryEmbedder,
    max_attempts: i64,
}

impl<'a> EmbeddingWorker<'a> {
    pub fn new(store: &'a Store, embedder: &'a dyn EntryEmbedder) -> Self {
        Self {
            store,
            embedder,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Add an entry to the queue. Idempotent: re-enqueueing an already
    /// queued key is a no-op.
    pub fn enqueue(&self, entry_id: &str, kb_name: &str) -> Result<(), StoreError> {
        self.store.queue_insert(entry_id, kb_name)
    }

    /// Process up to `batch_size` pending rows, oldest first. Successes
    /// leave the queue; failures record the attempt and quarantine at the
    /// bound. Per-entry errors never propagate; the return value is the
    /// count of successfully embedded entries, and queue mutations for the
    /// whole batch commit together.
    pub fn process_batch(&self, batch_size: i64) -> Result<usize, StoreError> {
        let rows = self.store.queue_pending(self.max_attempts, batch_size)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut done: Vec<(String, String)> = Vec::new();
        let mut failures: Vec<(String, String, i64, String)> = Vec::new();

        for row in rows {
            match self.embedder.embed_entry(&row.entry_id, &row.kb_name) {
                Ok(_) => done.push((row.entry_id, row.kb_name)),
                Err(e) => {
                    let attempts = row.attempts + 1;
                    let error = truncate_error(&e.to_string());
                    tracing::warn!(
                        "Embed failed for {} (attempt {}/{}): {}",
                        row.entry_id,
                        attempts,
                        self.max_attempts,
                        error
                    );
                    failures.push((row.entry_id, row.kb_name, attempts, error));
                }
            }
        }

        let succeeded = done.len();
        self.store.queue_apply(&done, &failures, self.max_attempts)?;
        Ok(succeeded)
    }

    /// Aggregate queue counts.
    pub fn get_status(&self) -> Result<QueueStatus, StoreError> {
        self.store.queue_counts()
    }

    /// Return quarantined rows to `pending` with a fresh attempt budget.
    /// The only way a `failed` row is ever processed again.
    pub fn reset_failed(&self) -> Result<usize, StoreError> {
        self.store.queue_reset_failed()
    }
}

fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &message[..end])
}
