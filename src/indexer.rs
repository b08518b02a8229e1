//! Indexing pipeline: discover memory files, chunk them, embed what is
//! new, and upsert into the vector store.
//!
//! Chunk ids embed a content hash, so re-running the indexer skips every
//! chunk whose text is unchanged. Index metadata is written only after the
//! vectors have landed, which keeps a crashed run from pinning queries to
//! a provider that never produced vectors.

use std::collections::HashSet;
use std::path::PathBuf;

use globset::Glob;

use crate::chunker::chunk_markdown;
use crate::config::Config;
use crate::embedding;
use crate::error::MemoryError;
use crate::models::{Chunk, IndexReport, VectorRecord};
use crate::store::{self, IndexMetadata, Metric};

/// Run a full indexing pass. `force` drops the existing vectors and
/// rebuilds from scratch.
pub async fn run_index(config: &Config, force: bool) -> Result<IndexReport, MemoryError> {
    // Provider first: a run over an empty corpus still reports which
    // provider it would have used.
    let provider = embedding::select_for_indexing(&config.embedding).await?;

    let files = discover_files(&[config.memory.sessions_dir(), config.memory.plans_dir()])?;
    tracing::info!(files = files.len(), "scanning memory files");

    if files.is_empty() {
        return Ok(IndexReport {
            chunks_indexed: 0,
            files_scanned: 0,
            embedding: provider.kind.name().to_string(),
            message: Some("No memory files found".to_string()),
        });
    }

    let mut chunks = Vec::new();
    for file in &files {
        match std::fs::read_to_string(file) {
            Ok(text) => chunks.extend(chunk_markdown(&text, file)),
            Err(e) => {
                tracing::warn!(file = %file.display(), "skipping unreadable file: {}", e);
            }
        }
    }

    if chunks.is_empty() {
        return Ok(IndexReport {
            chunks_indexed: 0,
            files_scanned: files.len(),
            embedding: provider.kind.name().to_string(),
            message: Some("No indexable content found".to_string()),
        });
    }

    let store = store::open_store(&config.vector).await?;
    let metric = Metric::parse(&config.vector.metric).unwrap_or_default();

    let existing = if !force && store.is_initialized().await? {
        store.content_hashes().await?
    } else {
        HashSet::new()
    };

    let new_chunks = filter_new_chunks(chunks, &existing);

    if new_chunks.is_empty() {
        return Ok(IndexReport {
            chunks_indexed: 0,
            files_scanned: files.len(),
            embedding: provider.kind.name().to_string(),
            message: Some("All chunks already indexed".to_string()),
        });
    }

    tracing::info!(
        chunks = new_chunks.len(),
        provider = provider.kind.name(),
        "embedding new chunks"
    );

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(new_chunks.len());
    for batch in new_chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        vectors.extend(embedding::embed_texts(&provider, &config.embedding, &texts).await?);
    }

    if vectors.len() != new_chunks.len() {
        return Err(MemoryError::EmbeddingFailure(format!(
            "Expected {} embeddings, got {}",
            new_chunks.len(),
            vectors.len()
        )));
    }

    let dimension = vectors.first().map(|v| v.len()).unwrap_or(provider.dims);
    let records: Vec<VectorRecord> = new_chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| VectorRecord { chunk, embedding })
        .collect();

    // The old vectors are dropped only once their replacements exist, so
    // an embedding failure leaves the previous index intact.
    if force && store.is_initialized().await? {
        tracing::info!("force rebuild: clearing existing vectors");
        store.clear().await?;
    }

    store.upsert(&records).await?;

    store::write_metadata(
        &config.vector.path,
        &IndexMetadata {
            provider: provider.kind.name().to_string(),
            dimension,
            metric,
        },
    )?;

    Ok(IndexReport {
        chunks_indexed: records.len(),
        files_scanned: files.len(),
        embedding: provider.kind.name().to_string(),
        message: None,
    })
}

/// Markdown files under the given directories, recursive, sorted by path.
/// Missing directories are skipped.
fn discover_files(dirs: &[PathBuf]) -> Result<Vec<PathBuf>, MemoryError> {
    let matcher = Glob::new("*.md")
        .map_err(|e| MemoryError::BackendFailure(e.to_string()))?
        .compile_matcher();

    let mut files = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| MemoryError::BackendFailure(e.to_string()))?;
            if entry.file_type().is_file() && matcher.is_match(entry.file_name()) {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Drop chunks whose content hash is already stored, and duplicates
/// within the batch itself.
fn filter_new_chunks(chunks: Vec<Chunk>, existing: &HashSet<String>) -> Vec<Chunk> {
    let mut seen: HashSet<String> = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| {
            !existing.contains(&chunk.content_hash) && seen.insert(chunk.content_hash.clone())
        })
        .collect()
}
