//! Semantic query pipeline: embed the query with the provider that built
//! the index, run the nearest-neighbor search, and normalize raw
//! distances into a comparable score.
//!
//! Scores are in `[0, 1]`, higher is better, rounded to four decimals.
//! The formula is keyed on the metric persisted at index time, so results
//! from either backend and either metric read on the same scale.

use std::path::Path;

use crate::chunker::file_meta;
use crate::config::Config;
use crate::embedding;
use crate::error::MemoryError;
use crate::models::{SearchResult, VectorRecord};
use crate::store::{self, Metric};

/// Run a semantic search over the indexed memory. Results come back in
/// descending score order, at most `top_k` of them.
pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: usize,
) -> Result<Vec<SearchResult>, MemoryError> {
    let meta = store::read_metadata(&config.vector.path)?.ok_or(MemoryError::StoreNotFound)?;

    let store = store::open_store(&config.vector).await?;
    if !store.is_initialized().await? {
        return Err(MemoryError::StoreNotFound);
    }

    let provider = embedding::select_for_query(&config.embedding, &meta.provider).await?;
    let query_vector = embedding::embed_query(&provider, &config.embedding, query).await?;

    let hits = store.search(&query_vector, top_k, meta.metric).await?;

    let mut results: Vec<SearchResult> = hits
        .into_iter()
        .map(|(record, d)| to_result(record, d, meta.metric))
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    tracing::debug!(results = results.len(), "search complete");
    Ok(results)
}

/// Map a raw distance into a `[0, 1]` relevance score, rounded to four
/// decimal places.
///
/// Cosine distance lives in `[0, 2]`, so `1 - d` is clamped at zero;
/// L2 is unbounded, so it is squashed through `1 / (1 + d)`.
pub fn normalize_score(d: f32, metric: Metric) -> f64 {
    let score = match metric {
        Metric::Cosine => (1.0 - d as f64).max(0.0),
        Metric::L2 => (1.0 / (1.0 + d as f64)).max(0.0),
    };
    (score * 10_000.0).round() / 10_000.0
}

fn to_result(record: VectorRecord, d: f32, metric: Metric) -> SearchResult {
    let chunk = record.chunk;

    // Backends that store a minimal payload leave the file-derived fields
    // empty; rebuild them from the source path.
    let (date, project, kind) = if chunk.project.is_empty() && chunk.kind.is_empty() {
        let meta = file_meta(Path::new(&chunk.source));
        (meta.date, meta.project, meta.kind)
    } else {
        (chunk.date, chunk.project, chunk.kind)
    };

    SearchResult {
        content: chunk.content,
        source: chunk.source,
        section_title: chunk.section_title,
        score: normalize_score(d, metric),
        date,
        project,
        kind,
    }
}
