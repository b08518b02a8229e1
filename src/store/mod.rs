//! Vector storage backends.
//!
//! Two backends sit behind [`VectorStore`]: an embedded SQLite table that
//! keeps full chunk metadata in columns, and a Qdrant collection reached
//! over HTTP that stores a minimal payload and leaves file-derived
//! metadata to be reconstructed at query time. Both return raw distances;
//! score normalization happens in the search layer.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::VectorConfig;
use crate::error::MemoryError;
use crate::models::VectorRecord;

pub mod qdrant;
pub mod sqlite;

/// Distance metric for vector search. Backends compute the raw distance;
/// cosine distance is `1 - cos(a, b)` in `[0, 2]`, L2 is the Euclidean
/// distance in `[0, inf)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
}

impl Metric {
    pub fn parse(s: &str) -> Option<Metric> {
        match s {
            "cosine" => Some(Metric::Cosine),
            "l2" => Some(Metric::L2),
            _ => None,
        }
    }
}

/// Sidecar record written after a successful indexing run. Queries read it
/// to pin the embedding provider and score formula to whatever built the
/// index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub provider: String,
    pub dimension: usize,
    #[serde(default)]
    pub metric: Metric,
}

/// Read `metadata.json` from the index directory. A missing file means no
/// index has ever been built.
pub fn read_metadata(dir: &Path) -> Result<Option<IndexMetadata>, MemoryError> {
    let path = dir.join("metadata.json");
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    let meta = serde_json::from_str(&raw)
        .map_err(|e| MemoryError::BackendFailure(format!("Invalid index metadata: {}", e)))?;
    Ok(Some(meta))
}

/// Write `metadata.json`, creating the directory if needed. Called only
/// after vectors have landed in the store, so a crash mid-index leaves the
/// metadata describing the previous complete state.
pub fn write_metadata(dir: &Path, meta: &IndexMetadata) -> Result<(), MemoryError> {
    fs::create_dir_all(dir)?;
    let raw = serde_json::to_string_pretty(meta)
        .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;
    fs::write(dir.join("metadata.json"), raw)?;
    Ok(())
}

/// Storage backend for embedded chunks.
///
/// `search` returns `(record, distance)` pairs in ascending distance
/// order, truncated to `top_k`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether the store holds any vectors.
    async fn is_initialized(&self) -> Result<bool, MemoryError>;

    /// Whether a chunk with this content hash is already stored.
    async fn contains_hash(&self, hash: &str) -> Result<bool, MemoryError>;

    /// All stored content hashes, for bulk dedup during indexing.
    async fn content_hashes(&self) -> Result<HashSet<String>, MemoryError>;

    /// Insert or replace records keyed by chunk id.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), MemoryError>;

    /// Remove all stored vectors.
    async fn clear(&self) -> Result<(), MemoryError>;

    /// Nearest neighbors of `vector` under `metric`.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        metric: Metric,
    ) -> Result<Vec<(VectorRecord, f32)>, MemoryError>;
}

/// Open the backend named in the config.
pub async fn open_store(config: &VectorConfig) -> Result<Box<dyn VectorStore>, MemoryError> {
    match config.backend.as_str() {
        "sqlite" => Ok(Box::new(sqlite::SqliteVectorStore::open(config).await?)),
        "qdrant" => Ok(Box::new(qdrant::QdrantStore::new(config)?)),
        other => Err(MemoryError::DependencyMissing(format!(
            "Unknown vector backend: '{}'",
            other
        ))),
    }
}

/// Serialize an f32 vector to bytes (little-endian).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Deserialize bytes back to an f32 vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Returns 0 for mismatched
/// lengths or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Raw distance between two vectors under `metric`.
pub fn distance(a: &[f32], b: &[f32], metric: Metric) -> f32 {
    match metric {
        Metric::Cosine => 1.0 - cosine_similarity(a, b),
        Metric::L2 => {
            if a.len() != b.len() {
                return f32::INFINITY;
            }
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt()
        }
    }
}
