//! Persistence abstraction for the embedding cache.
//!
//! The [`VectorStore`] trait is the only thing the cache needs from a
//! backend: load a record by content hash, save one, clear everything.
//! Two implementations ship with the crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`memory::InMemoryVectorStore`] | tests, one-shot runs |
//! | [`SqliteVectorStore`](crate::sqlite_store::SqliteVectorStore) | the CLI, persisted across runs |
//!
//! Implementations must be `Send + Sync`; a save must be atomic per record
//! so readers never observe a partially written vector.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::EmbeddingRecord;

/// Record count for one model version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelVersionStats {
    pub model_version: String,
    pub records: i64,
    pub dims: i64,
}

/// Abstract storage backend for [`EmbeddingRecord`]s, keyed by content hash.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Fetch the record stored under `content_hash`, if any.
    ///
    /// A record whose bytes cannot be decoded is returned as
    /// `Ok(Some(..))` with an empty vector; the cache rejects it as corrupt.
    async fn load(&self, content_hash: &str) -> Result<Option<EmbeddingRecord>>;

    /// Insert or replace a record.
    async fn save(&self, record: &EmbeddingRecord) -> Result<()>;

    /// Delete every record.
    async fn clear(&self) -> Result<()>;

    /// Record counts grouped by model version.
    async fn stats(&self) -> Result<Vec<ModelVersionStats>>;
}
