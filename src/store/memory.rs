//! In-memory [`VectorStore`] implementation for tests and one-shot runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Records are replaced
//! whole, so a reader sees either the old record or the new one.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::EmbeddingRecord;

use super::{ModelVersionStats, VectorStore};

/// In-memory store; contents vanish with the process.
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, EmbeddingRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn load(&self, content_hash: &str) -> Result<Option<EmbeddingRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(content_hash).cloned())
    }

    async fn save(&self, record: &EmbeddingRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.content_hash.clone(), record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<ModelVersionStats>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut grouped: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for r in records.values() {
            let entry = grouped.entry(r.model_version.as_str()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = r.vector.len() as i64;
        }
        Ok(grouped
            .into_iter()
            .map(|(model_version, (records, dims))| ModelVersionStats {
                model_version: model_version.to_string(),
                records,
                dims,
            })
            .collect())
    }
}
