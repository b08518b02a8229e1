//! Embedding provider selection and backends.
//!
//! Three backends sit behind one batch interface:
//! - **openai**: the OpenAI embeddings API, with batching, retry, and
//!   exponential backoff (429/5xx retried, other 4xx fail fast).
//! - **local**: fastembed inference, compiled in behind the default-on
//!   `local-embeddings` feature; the model is downloaded once and cached.
//! - **mock**: deterministic hash-derived vectors; offline, used by the
//!   test suite.
//!
//! Selection is an ordered chain of candidates rather than error-driven
//! fallback. At index time the chain is OpenAI (credential present and a
//! one-item connectivity probe succeeds) then local; at query time the
//! chain is pinned to whatever provider built the index. Vectors from a
//! different provider live in a different space, so substitution is never
//! silent.

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::MemoryError;

/// Dimensionality of the mock provider's vectors.
pub const MOCK_DIMS: usize = 64;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// An embedding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Local,
    Mock,
}

impl ProviderKind {
    /// Name persisted in the index metadata.
    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Local => "local",
            ProviderKind::Mock => "mock",
        }
    }
}

/// A provider chosen for one invocation. Dimensionality is fixed once
/// selected; every vector in a collection must share it.
#[derive(Debug, Clone)]
pub struct SelectedProvider {
    pub kind: ProviderKind,
    pub dims: usize,
}

/// Candidate order for an indexing run. A pinned provider shrinks the
/// chain to that single candidate.
fn index_chain(config: &EmbeddingConfig) -> Vec<ProviderKind> {
    match config.provider.as_str() {
        "openai" => vec![ProviderKind::OpenAi],
        "local" => vec![ProviderKind::Local],
        "mock" => vec![ProviderKind::Mock],
        _ => vec![ProviderKind::OpenAi, ProviderKind::Local],
    }
}

/// Pick the provider for an indexing run, trying candidates in order.
///
/// # Errors
///
/// [`MemoryError::NoProviderAvailable`] when no candidate is usable;
/// indexing cannot proceed without embeddings.
pub async fn select_for_indexing(
    config: &EmbeddingConfig,
) -> Result<SelectedProvider, MemoryError> {
    for kind in index_chain(config) {
        if let Some(provider) = try_candidate(kind, config, true).await {
            tracing::info!(provider = provider.kind.name(), "selected embedding provider");
            return Ok(provider);
        }
        tracing::debug!(candidate = kind.name(), "embedding candidate unavailable");
    }
    Err(MemoryError::NoProviderAvailable)
}

/// Pick the provider for a query, pinned to the one recorded at index
/// time. `required = "local"` never attempts OpenAI even when a credential
/// is present; an unavailable required provider is a hard
/// [`MemoryError::ProviderMismatch`].
pub async fn select_for_query(
    config: &EmbeddingConfig,
    required: &str,
) -> Result<SelectedProvider, MemoryError> {
    let kind = match required {
        "openai" => ProviderKind::OpenAi,
        "local" => ProviderKind::Local,
        "mock" => ProviderKind::Mock,
        _ => {
            return Err(MemoryError::ProviderMismatch {
                required: required.to_string(),
            })
        }
    };

    // No probe at query time; the query embedding itself is the first call.
    try_candidate(kind, config, false)
        .await
        .ok_or_else(|| MemoryError::ProviderMismatch {
            required: required.to_string(),
        })
}

async fn try_candidate(
    kind: ProviderKind,
    config: &EmbeddingConfig,
    probe: bool,
) -> Option<SelectedProvider> {
    match kind {
        ProviderKind::OpenAi => {
            std::env::var("OPENAI_API_KEY").ok()?;
            if probe {
                // One short request with no retries, so a dead network
                // falls through to the next candidate quickly.
                let probe_config = EmbeddingConfig {
                    max_retries: 0,
                    timeout_secs: config.timeout_secs.min(10),
                    ..config.clone()
                };
                if let Err(e) = embed_openai(&probe_config, &["ping".to_string()]).await {
                    tracing::warn!("OpenAI connectivity probe failed: {}", e);
                    return None;
                }
            }
            Some(SelectedProvider {
                kind,
                dims: openai_dims(&config.model),
            })
        }
        ProviderKind::Local => {
            if !local_available() {
                return None;
            }
            Some(SelectedProvider {
                kind,
                dims: local_dims(&config.local_model),
            })
        }
        ProviderKind::Mock => Some(SelectedProvider {
            kind,
            dims: MOCK_DIMS,
        }),
    }
}

/// Embed a batch of texts, one vector per input, order preserved.
pub async fn embed_texts(
    provider: &SelectedProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, MemoryError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    match provider.kind {
        ProviderKind::OpenAi => embed_openai(config, texts).await,
        ProviderKind::Local => embed_local(config, texts).await,
        ProviderKind::Mock => Ok(texts.iter().map(|t| mock_embedding(t)).collect()),
    }
}

/// Embed a single query text as a one-item batch.
pub async fn embed_query(
    provider: &SelectedProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>, MemoryError> {
    let results = embed_texts(provider, config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| MemoryError::EmbeddingFailure("Empty embedding response".to_string()))
}

// ============ OpenAI ============

fn openai_dims(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        // text-embedding-3-small, text-embedding-ada-002
        _ => 1536,
    }
}

/// Call the OpenAI embeddings API with retry/backoff.
///
/// Retry strategy:
/// - HTTP 429 or 5xx: retry with exponential backoff (1s, 2s, 4s, ... capped at 2^5)
/// - HTTP 4xx (not 429): fail immediately
/// - Network error: retry
async fn embed_openai(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, MemoryError> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| MemoryError::EmbeddingFailure("OPENAI_API_KEY not set".to_string()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| MemoryError::EmbeddingFailure(e.to_string()))?;

    let body = serde_json::json!({
        "model": config.model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(OPENAI_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| MemoryError::EmbeddingFailure(e.to_string()))?;
                    return parse_openai_response(&json);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(MemoryError::EmbeddingFailure(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                    continue;
                }

                // Client error (not 429): don't retry
                let body_text = response.text().await.unwrap_or_default();
                return Err(MemoryError::EmbeddingFailure(format!(
                    "OpenAI API error {}: {}",
                    status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(MemoryError::EmbeddingFailure(e.to_string()));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        MemoryError::EmbeddingFailure("Embedding failed after retries".to_string())
    }))
}

/// Extract the `data[].embedding` arrays in input order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, MemoryError> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        MemoryError::EmbeddingFailure("Invalid OpenAI response: missing data array".to_string())
    })?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                MemoryError::EmbeddingFailure(
                    "Invalid OpenAI response: missing embedding".to_string(),
                )
            })?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings")]
fn local_available() -> bool {
    true
}

#[cfg(not(feature = "local-embeddings"))]
fn local_available() -> bool {
    false
}

fn local_dims(model: &str) -> usize {
    match model {
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
        // all-minilm-l6-v2, bge-small-en-v1.5
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings")]
fn local_model_for(name: &str) -> Result<fastembed::EmbeddingModel, MemoryError> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(MemoryError::EmbeddingFailure(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings")]
async fn embed_local(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, MemoryError> {
    let model = local_model_for(&config.local_model)?;
    let batch_size = config.batch_size;
    let texts = texts.to_vec();

    tokio::task::spawn_blocking(move || {
        let mut embedder = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| {
            MemoryError::EmbeddingFailure(format!(
                "Failed to initialize local embedding model: {}",
                e
            ))
        })?;

        embedder
            .embed(texts, Some(batch_size))
            .map_err(|e| MemoryError::EmbeddingFailure(format!("Local embedding failed: {}", e)))
    })
    .await
    .map_err(|e| MemoryError::EmbeddingFailure(e.to_string()))?
}

#[cfg(not(feature = "local-embeddings"))]
async fn embed_local(
    _config: &EmbeddingConfig,
    _texts: &[String],
) -> Result<Vec<Vec<f32>>, MemoryError> {
    Err(MemoryError::DependencyMissing(
        "Local embeddings require the local-embeddings feature".to_string(),
    ))
}

// ============ Mock ============

/// Deterministic embedding derived from the text's hash. Components are
/// strictly positive and L2-normalized, so any two mock vectors have a
/// positive cosine similarity.
pub fn mock_embedding(text: &str) -> Vec<f32> {
    use std::hash::{DefaultHasher, Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let bytes = hasher.finish().to_le_bytes();

    let mut embedding: Vec<f32> = (0..MOCK_DIMS)
        .map(|i| (bytes[i % 8] as f32 + 1.0) / 256.0)
        .collect();

    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    for v in &mut embedding {
        *v /= norm;
    }
    embedding
}
