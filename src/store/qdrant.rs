//! Vector store backed by a Qdrant server over its REST API.
//!
//! Qdrant point ids must be integers or UUIDs, so the chunk id is hashed
//! to a u64 and the original id travels in the payload. The payload keeps
//! only content, source, section title, and content hash; date, project,
//! and kind are derived from the source filename again at query time.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::VectorConfig;
use crate::error::MemoryError;
use crate::models::{Chunk, VectorRecord};
use crate::store::{Metric, VectorStore};

const SCROLL_PAGE: usize = 256;

pub struct QdrantStore {
    client: reqwest::Client,
    base: String,
    collection: String,
    metric: Metric,
}

impl QdrantStore {
    pub fn new(config: &VectorConfig) -> Result<Self, MemoryError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;

        Ok(Self {
            client,
            base: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            metric: Metric::parse(&config.metric).unwrap_or_default(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base, self.collection)
    }

    /// Points count of the collection, or None if it does not exist.
    async fn points_count(&self) -> Result<Option<u64>, MemoryError> {
        let resp = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let body = expect_success(resp, "get collection").await?;
        let count = body
            .pointer("/result/points_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(Some(count))
    }

    async fn ensure_collection(&self, dims: usize) -> Result<(), MemoryError> {
        if self.points_count().await?.is_some() {
            return Ok(());
        }

        let distance = match self.metric {
            Metric::Cosine => "Cosine",
            Metric::L2 => "Euclid",
        };
        let resp = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": dims, "distance": distance }
            }))
            .send()
            .await
            .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;
        expect_success(resp, "create collection").await?;
        Ok(())
    }
}

/// Map a chunk id to a Qdrant-legal numeric point id.
pub fn point_id(chunk_id: &str) -> u64 {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn chunk_payload(chunk: &Chunk) -> Value {
    json!({
        "id": chunk.id,
        "content": chunk.content,
        "source": chunk.source,
        "section_title": chunk.section_title,
        "content_hash": chunk.content_hash,
    })
}

fn payload_str(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// A chunk rebuilt from a Qdrant payload. Date, project, and kind are left
/// empty for the search layer to re-derive from the source path.
fn chunk_from_payload(payload: &Value) -> Chunk {
    Chunk {
        id: payload_str(payload, "id"),
        content: payload_str(payload, "content"),
        source: payload_str(payload, "source"),
        section_title: payload_str(payload, "section_title"),
        date: String::new(),
        project: String::new(),
        kind: String::new(),
        content_hash: payload_str(payload, "content_hash"),
    }
}

async fn expect_success(resp: reqwest::Response, what: &str) -> Result<Value, MemoryError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(MemoryError::BackendFailure(format!(
            "Qdrant {} failed ({}): {}",
            what, status, body
        )));
    }
    resp.json()
        .await
        .map_err(|e| MemoryError::BackendFailure(e.to_string()))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn is_initialized(&self) -> Result<bool, MemoryError> {
        Ok(self.points_count().await?.unwrap_or(0) > 0)
    }

    async fn contains_hash(&self, hash: &str) -> Result<bool, MemoryError> {
        if self.points_count().await?.is_none() {
            return Ok(false);
        }

        let resp = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({
                "filter": {
                    "must": [{ "key": "content_hash", "match": { "value": hash } }]
                },
                "exact": true
            }))
            .send()
            .await
            .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;

        let body = expect_success(resp, "count points").await?;
        let count = body
            .pointer("/result/count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(count > 0)
    }

    async fn content_hashes(&self) -> Result<HashSet<String>, MemoryError> {
        let mut hashes = HashSet::new();
        if self.points_count().await?.is_none() {
            return Ok(hashes);
        }

        let mut offset: Option<Value> = None;
        loop {
            let mut request = json!({
                "limit": SCROLL_PAGE,
                "with_payload": ["content_hash"],
                "with_vector": false
            });
            if let Some(off) = &offset {
                request["offset"] = off.clone();
            }

            let resp = self
                .client
                .post(format!("{}/points/scroll", self.collection_url()))
                .json(&request)
                .send()
                .await
                .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;
            let body = expect_success(resp, "scroll points").await?;

            if let Some(points) = body.pointer("/result/points").and_then(|v| v.as_array()) {
                for point in points {
                    if let Some(hash) = point
                        .pointer("/payload/content_hash")
                        .and_then(|v| v.as_str())
                    {
                        hashes.insert(hash.to_string());
                    }
                }
            }

            match body.pointer("/result/next_page_offset") {
                Some(off) if !off.is_null() => offset = Some(off.clone()),
                _ => break,
            }
        }

        Ok(hashes)
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), MemoryError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        self.ensure_collection(first.embedding.len()).await?;

        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": point_id(&record.chunk.id),
                    "vector": record.embedding,
                    "payload": chunk_payload(&record.chunk),
                })
            })
            .collect();

        let resp = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;
        expect_success(resp, "upsert points").await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        let resp = self
            .client
            .delete(self.collection_url())
            .send()
            .await
            .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        expect_success(resp, "delete collection").await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        metric: Metric,
    ) -> Result<Vec<(VectorRecord, f32)>, MemoryError> {
        let resp = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true
            }))
            .send()
            .await
            .map_err(|e| MemoryError::BackendFailure(e.to_string()))?;
        let body = expect_success(resp, "search points").await?;

        let hits = body
            .get("result")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in &hits {
            let score = hit.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
            // Cosine collections report similarity, Euclid collections
            // report the distance itself.
            let d = match metric {
                Metric::Cosine => 1.0 - score,
                Metric::L2 => score,
            };

            let empty = json!({});
            let payload = hit.get("payload").unwrap_or(&empty);
            results.push((
                VectorRecord {
                    chunk: chunk_from_payload(payload),
                    embedding: Vec::new(),
                },
                d,
            ));
        }

        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }
}
