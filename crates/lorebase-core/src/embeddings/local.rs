//! Local Semantic Embeddings
//!
//! fastembed (ONNX) inference behind a lazily-initialized global model.
//! The model loads on first use, never at construction: a process that only
//! runs keyword queries over a pre-built index must not pay for it.

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::EMBEDDING_DIMENSIONS;

/// Maximum text length for embedding, in bytes (longer input is truncated
/// at a char boundary).
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for bulk embedding generation
pub const BATCH_SIZE: usize = 32;

// ============================================================================
// GLOBAL MODEL
// ============================================================================

/// First initialization fixes the model for the process; the dimension is
/// fixed per database anyway.
static EMBEDDING_MODEL_RESULT: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

/// Map a configured model identifier to a fastembed model. Every supported
/// model produces 384-dim vectors; unknown names fall back to the default.
fn resolve_model(name: &str) -> EmbeddingModel {
    match name {
        "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
        "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        other => {
            tracing::warn!(
                "Unknown embedding model '{}', using {}",
                other,
                crate::DEFAULT_EMBEDDING_MODEL
            );
            EmbeddingModel::AllMiniLML6V2
        }
    }
}

/// Model cache directory: LOREBASE_MODEL_CACHE env var, else the platform
/// cache directory.
fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("LOREBASE_MODEL_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(dirs) = directories::ProjectDirs::from("io", "lorebase", "lorebase") {
        return dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model(
    model_name: &str,
) -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!("Failed to create model cache directory {:?}: {}", cache, e);
        }

        let options = InitOptions::new(resolve_model(model_name))
            .with_show_download_progress(false)
            .with_cache_dir(cache);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "Failed to initialize embedding model '{}': {}. \
                 Ensure the ONNX runtime is available and model files can be downloaded.",
                model_name, e
            )
        })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ModelInit(format!("Model lock poisoned: {e}"))),
        Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Failed to initialize the embedding model
    #[error("Model initialization failed: {0}")]
    ModelInit(String),
    /// Failed to generate an embedding
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
    /// Invalid input (empty text)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// EMBEDDING TYPE
// ============================================================================

/// A semantic embedding vector
#[derive(Debug, Clone)]
pub struct Embedding {
    /// The embedding vector
    pub vector: Vec<f32>,
    /// Dimensions of the vector
    pub dimensions: usize,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        let dimensions = vector.len();
        Self { vector, dimensions }
    }

    /// Little-endian float32 packing, 4 bytes per component.
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::storage::embedding_to_blob(&self.vector)
    }

    /// Inverse of [`Embedding::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        crate::storage::blob_to_embedding(bytes).map(Self::new)
    }

    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.vector, &other.vector)
    }
}

// ============================================================================
// MODEL FRONT
// ============================================================================

/// Thin front over the global model: text in, fixed-dimension vectors out.
pub struct LocalEmbedder {
    model_name: String,
}

impl LocalEmbedder {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
        }
    }

    /// Whether the model is loaded (or loadable). Triggers the first load.
    pub fn is_ready(&self) -> bool {
        match get_model(&self.model_name) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Embedding model not ready: {}", e);
                false
            }
        }
    }

    /// Load the model now, surfacing initialization errors early.
    pub fn init(&self) -> Result<(), EmbeddingError> {
        get_model(&self.model_name).map(|_| ())
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    /// Generate an embedding for a single text.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".into()));
        }

        let mut model = get_model(&self.model_name)?;
        let text = truncate_at_boundary(text, MAX_TEXT_LENGTH);

        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if embeddings.is_empty() {
            return Err(EmbeddingError::EmbeddingFailed(
                "No embedding generated".into(),
            ));
        }
        Ok(embeddings.remove(0))
    }

    /// Generate embeddings for multiple texts, batched.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut model = get_model(&self.model_name)?;
        let mut all = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk
                .iter()
                .map(|t| truncate_at_boundary(t, MAX_TEXT_LENGTH))
                .collect();
            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
            all.extend(embeddings);
        }
        Ok(all)
    }
}

/// Truncate to at most `max` bytes without splitting a char.
fn truncate_at_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// Cosine similarity between two vectors (0 when lengths differ).
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-4);
    }

    #[test]
    fn cosine_similarity_opposite() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_similarity_length_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn embedding_bytes_roundtrip() {
        let original = Embedding::new(vec![1.5, 2.5, -3.5, 0.0]);
        let bytes = original.to_bytes();
        assert_eq!(bytes.len(), 16);
        let restored = Embedding::from_bytes(&bytes).unwrap();
        assert_eq!(restored.dimensions, 4);
        for (a, b) in original.vector.iter().zip(restored.vector.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate_at_boundary(text, 2);
        assert!(cut.len() <= 2);
        assert!(text.starts_with(cut));
        assert_eq!(truncate_at_boundary("short", 100), "short");
    }

    #[test]
    fn resolve_model_falls_back() {
        // Unknown names warn and use the default; the call itself must not panic.
        let _ = resolve_model("totally-made-up");
        let _ = resolve_model("all-MiniLM-L6-v2");
    }
}
