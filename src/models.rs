//! Core data types for the semantic memory layer.
//!
//! These flow through the chunking, indexing, and search pipeline. The
//! relational row types live with their queries in [`crate::memory`].

use serde::Serialize;

/// A heading-bounded slice of a markdown document, the unit of retrieval.
///
/// The id is derived from the file name, the section's start line, and the
/// content hash, so editing one section does not perturb the ids of the
/// others. Identity across indexing runs is governed solely by
/// `content_hash`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub source: String,
    /// Empty for content preceding the first heading.
    pub section_title: String,
    pub date: String,
    pub project: String,
    /// `session` or `plan`, from the parent directory name.
    pub kind: String,
    /// Truncated SHA-256 of the trimmed content, used for dedup.
    pub content_hash: String,
}

/// A chunk paired with its embedding vector, as stored in the vector store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Outcome of an indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub chunks_indexed: usize,
    pub files_scanned: usize,
    /// Name of the embedding provider used.
    pub embedding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A single semantic search hit. `score` is a normalized similarity in
/// [0, 1], 1.0 = identical, rounded to 4 decimals.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content: String,
    pub source: String,
    pub section_title: String,
    pub score: f64,
    pub date: String,
    pub project: String,
    #[serde(rename = "type")]
    pub kind: String,
}
