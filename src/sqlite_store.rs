//! SQLite-backed [`VectorStore`] implementation.
//!
//! One row per content hash in `embedding_cache`; vectors are stored as
//! little-endian `f32` BLOBs. Each save is a single upsert statement, so a
//! concurrent reader sees the old row or the new one, never a mix.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::EmbeddingRecord;
use crate::store::{ModelVersionStats, VectorStore};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn load(&self, content_hash: &str) -> Result<Option<EmbeddingRecord>> {
        let row = sqlx::query(
            "SELECT content_hash, model_version, vector FROM embedding_cache WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let blob: Vec<u8> = row.get("vector");
            EmbeddingRecord {
                content_hash: row.get("content_hash"),
                model_version: row.get("model_version"),
                vector: blob_to_vec(&blob).unwrap_or_default(),
            }
        }))
    }

    async fn save(&self, record: &EmbeddingRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO embedding_cache (content_hash, model_version, dims, vector, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO UPDATE SET
                model_version = excluded.model_version,
                dims = excluded.dims,
                vector = excluded.vector,
                created_at = excluded.created_at
            "#,
        )
        .bind(&record.content_hash)
        .bind(&record.model_version)
        .bind(record.vector.len() as i64)
        .bind(vec_to_blob(&record.vector))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM embedding_cache")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<ModelVersionStats>> {
        let rows = sqlx::query(
            r#"
            SELECT model_version, COUNT(*) AS records, MAX(dims) AS dims
            FROM embedding_cache
            GROUP BY model_version
            ORDER BY model_version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ModelVersionStats {
                model_version: row.get("model_version"),
                records: row.get("records"),
                dims: row.get("dims"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn temp_store(tmp: &TempDir) -> SqliteVectorStore {
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("cache.sqlite");
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        SqliteVectorStore::new(pool)
    }

    #[tokio::test]
    async fn round_trips_records() {
        let tmp = TempDir::new().unwrap();
        let store = temp_store(&tmp).await;

        let record = EmbeddingRecord {
            content_hash: "abc".to_string(),
            vector: vec![0.25, -0.5, 1.0],
            model_version: "hash:feature-hash-v1:3".to_string(),
        };
        store.save(&record).await.unwrap();
        assert_eq!(store.load("abc").await.unwrap(), Some(record));
        assert_eq!(store.load("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_blob_loads_as_empty_vector() {
        let tmp = TempDir::new().unwrap();
        let store = temp_store(&tmp).await;

        sqlx::query(
            "INSERT INTO embedding_cache (content_hash, model_version, dims, vector, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind("bad")
        .bind("hash:feature-hash-v1:3")
        .bind(3i64)
        .bind(vec![1u8, 2, 3, 4, 5])
        .bind(0i64)
        .execute(store.pool())
        .await
        .unwrap();

        let loaded = store.load("bad").await.unwrap().unwrap();
        assert!(loaded.vector.is_empty());
    }

    #[tokio::test]
    async fn clear_and_stats() {
        let tmp = TempDir::new().unwrap();
        let store = temp_store(&tmp).await;
        for (hash, model) in [("a", "m1"), ("b", "m1"), ("c", "m2")] {
            store
                .save(&EmbeddingRecord {
                    content_hash: hash.to_string(),
                    vector: vec![1.0, 0.0],
                    model_version: model.to_string(),
                })
                .await
                .unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].records, 2);
        assert_eq!(stats[0].dims, 2);

        store.clear().await.unwrap();
        assert!(store.stats().await.unwrap().is_empty());
    }
}
