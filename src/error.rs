//! Structured errors for the semantic indexing and search subsystem.
//!
//! Every failure the indexer or searcher can hit maps to one of these
//! kinds. They are caught at the orchestration boundary (`run_index` /
//! `run_search`) and converted to a `{"ok": false, "error": ...}` payload
//! with a nonzero exit status; none propagate as panics.

use thiserror::Error;

/// Errors raised by the semantic memory layer.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A required library or backend is absent (e.g. unknown vector backend,
    /// local embeddings compiled out).
    #[error("{0}")]
    DependencyMissing(String),

    /// No usable embedding backend could be selected at index time.
    #[error("No embedding provider available. Set OPENAI_API_KEY or build with the local-embeddings feature.")]
    NoProviderAvailable,

    /// The provider recorded at index time is unavailable at query time.
    /// Substituting another provider would compare vectors from different
    /// spaces, so the only safe recovery is a rebuild.
    #[error("Index was built with '{required}' embeddings which is unavailable. Re-index with: memstack index --force")]
    ProviderMismatch { required: String },

    /// Search attempted before any index build.
    #[error("Vector index not found. Run: memstack index")]
    StoreNotFound,

    /// A remote or local embedding call failed.
    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    /// A vector store operation failed.
    #[error("Vector store error: {0}")]
    BackendFailure(String),
}

impl From<sqlx::Error> for MemoryError {
    fn from(err: sqlx::Error) -> Self {
        MemoryError::BackendFailure(err.to_string())
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(err: std::io::Error) -> Self {
        MemoryError::BackendFailure(err.to_string())
    }
}
