//! Embedding Subsystem
//!
//! - The durable background worker and its embedder seam (always compiled)
//! - Local model inference and the entry-level embedding service
//!   (behind the `embeddings` feature)

pub mod worker;

#[cfg(feature = "embeddings")]
pub mod local;

#[cfg(feature = "embeddings")]
pub mod service;

pub use worker::{EmbedError, EmbeddingWorker, EntryEmbedder, DEFAULT_MAX_ATTEMPTS};

#[cfg(feature = "embeddings")]
pub use local::{cosine_similarity, Embedding, EmbeddingError, LocalEmbedder, BATCH_SIZE};

#[cfg(feature = "embeddings")]
pub use service::EmbeddingService;
