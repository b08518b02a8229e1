//! Embedded vector store backed by a single SQLite file.
//!
//! Embeddings are stored as little-endian f32 blobs alongside full chunk
//! metadata, and search is a brute-force scan. At personal-memory scale
//! (hundreds to low thousands of chunks) the scan is faster than any
//! index would pay for itself.

use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::config::VectorConfig;
use crate::error::MemoryError;
use crate::models::{Chunk, VectorRecord};
use crate::store::{blob_to_vec, distance, vec_to_blob, Metric, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (creating if needed) the vector database under the configured
    /// index directory.
    pub async fn open(config: &VectorConfig) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(&config.path)?;
        let db_path = config.path.join("vectors.sqlite");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(|e| MemoryError::BackendFailure(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source TEXT NOT NULL,
                section_title TEXT NOT NULL,
                date TEXT NOT NULL,
                project TEXT NOT NULL,
                kind TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(content_hash)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn is_initialized(&self) -> Result<bool, MemoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn contains_hash(&self, hash: &str) -> Result<bool, MemoryError> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chunks WHERE content_hash = ?)")
                .bind(hash)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }

    async fn content_hashes(&self) -> Result<HashSet<String>, MemoryError> {
        let hashes: Vec<String> = sqlx::query_scalar("SELECT content_hash FROM chunks")
            .fetch_all(&self.pool)
            .await?;
        Ok(hashes.into_iter().collect())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), MemoryError> {
        for record in records {
            let chunk = &record.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, content, source, section_title, date, project, kind, content_hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    source = excluded.source,
                    section_title = excluded.section_title,
                    date = excluded.date,
                    project = excluded.project,
                    kind = excluded.kind,
                    content_hash = excluded.content_hash,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&chunk.section_title)
            .bind(&chunk.date)
            .bind(&chunk.project)
            .bind(&chunk.kind)
            .bind(&chunk.content_hash)
            .bind(vec_to_blob(&record.embedding))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        metric: Metric,
    ) -> Result<Vec<(VectorRecord, f32)>, MemoryError> {
        let rows = sqlx::query(
            "SELECT id, content, source, section_title, date, project, kind, content_hash, embedding FROM chunks",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(VectorRecord, f32)> = Vec::with_capacity(rows.len());

        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_vec(&blob);
            let d = distance(vector, &embedding, metric);

            let chunk = Chunk {
                id: row.get("id"),
                content: row.get("content"),
                source: row.get("source"),
                section_title: row.get("section_title"),
                date: row.get("date"),
                project: row.get("project"),
                kind: row.get("kind"),
                content_hash: row.get("content_hash"),
            };

            scored.push((VectorRecord { chunk, embedding }, d));
        }

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorConfig;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> VectorConfig {
        let mut config = VectorConfig::default();
        config.path = dir.path().join("vectors");
        config
    }

    fn record(id: &str, hash: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk: Chunk {
                id: id.to_string(),
                content: format!("content of {}", id),
                source: "sessions/2026-03-01-demo.md".to_string(),
                section_title: "Accomplished".to_string(),
                date: "2026-03-01".to_string(),
                project: "demo".to_string(),
                kind: "session".to_string(),
                content_hash: hash.to_string(),
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&test_config(&dir)).await.unwrap();
        assert!(!store.is_initialized().await.unwrap());
        assert!(store.content_hashes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_and_contains_hash() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&test_config(&dir)).await.unwrap();

        store
            .upsert(&[record("a:0:h1", "h1", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert!(store.is_initialized().await.unwrap());
        assert!(store.contains_hash("h1").await.unwrap());
        assert!(!store.contains_hash("h2").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_same_id_replaces() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&test_config(&dir)).await.unwrap();

        store
            .upsert(&[record("a:0:h1", "h1", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(&[record("a:0:h1", "h2", vec![0.0, 1.0])])
            .await
            .unwrap();

        let hashes = store.content_hashes().await.unwrap();
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains("h2"));
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&test_config(&dir)).await.unwrap();

        store
            .upsert(&[record("a:0:h1", "h1", vec![1.0, 0.0])])
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(!store.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&test_config(&dir)).await.unwrap();

        store
            .upsert(&[
                record("near:0:h1", "h1", vec![1.0, 0.0]),
                record("far:0:h2", "h2", vec![-1.0, 0.0]),
                record("mid:0:h3", "h3", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 2, Metric::Cosine).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.chunk.id, "near:0:h1");
        assert_eq!(results[1].0.chunk.id, "mid:0:h3");
        assert!(results[0].1 < results[1].1);
    }

    #[tokio::test]
    async fn test_search_roundtrips_embedding() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&test_config(&dir)).await.unwrap();

        store
            .upsert(&[record("a:0:h1", "h1", vec![0.25, -0.5, 0.75])])
            .await
            .unwrap();

        let results = store
            .search(&[0.25, -0.5, 0.75], 1, Metric::L2)
            .await
            .unwrap();
        assert_eq!(results[0].0.embedding, vec![0.25, -0.5, 0.75]);
        assert!(results[0].1.abs() < 1e-6);
    }
}
