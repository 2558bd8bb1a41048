//! Content-addressed embedding cache with single-flight computation.
//!
//! Every text is keyed by `sha256(normalize(text) ‖ 0x00 ‖ model_version)`.
//! Lookups go memory → [`VectorStore`] → provider, and the first tier that
//! has a valid vector wins.
//!
//! # Memory tier
//!
//! A bounded `moka` cache. Its `try_get_with` is single-flight: concurrent
//! callers for the same uncomputed key await the one initialization in
//! progress, so the provider is invoked at most once per
//! `(text, model_version)`. A failed initialization stores nothing and the
//! next caller retries. Entries evicted for capacity are served from the
//! store on the next lookup.
//!
//! # Warming
//!
//! [`EmbeddingCache::warm`] resolves memory and store hits first, then sends
//! the remaining texts to the provider in batches of `batch_size`, with at
//! most `concurrency` batches in flight. Every text of a batch is still
//! registered under its own key, so a concurrent
//! [`EmbeddingCache::get_or_compute`] for the same text joins the batch.
//!
//! # Corruption
//!
//! Persisted records are shape-checked on read (model version, dimension,
//! finite values). A record that fails is logged, counted, and recomputed;
//! it never reaches a caller.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::models::EmbeddingRecord;
use crate::store::VectorStore;

/// Shared, immutable vector handed out by the cache.
pub type Vector = Arc<[f32]>;

/// Default bound on vectors held in memory.
pub const DEFAULT_MEMORY_CAPACITY: u64 = 10_000;

type Shared = Result<Vector, Arc<RetrievalError>>;

/// Collapse whitespace runs and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache key for `text` under `model_version`.
pub fn content_hash(text: &str, model_version: &str) -> String {
    hash_normalized(&normalize_text(text), model_version)
}

fn hash_normalized(normalized: &str, model_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0u8]);
    hasher.update(model_version.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Counters since construction (or the last [`EmbeddingCache::reset`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub store_hits: u64,
    /// Provider round-trips; a batch counts once.
    pub provider_calls: u64,
    pub corrupt_records: u64,
    /// Approximate; eviction is applied lazily.
    pub memory_entries: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
    provider_calls: AtomicU64,
    corrupt_records: AtomicU64,
}

impl Counters {
    fn clear(&self) {
        for c in [
            &self.memory_hits,
            &self.store_hits,
            &self.provider_calls,
            &self.corrupt_records,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// Texts sent to the provider together; the first key to initialize runs
/// the call and the rest read their slot.
struct Batch {
    items: Vec<(String, String)>,
    vectors: OnceCell<Vec<Shared>>,
}

/// Embedding cache bound to one provider (and therefore one model version).
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    model_version: String,
    memory: Cache<String, Vector>,
    counters: Counters,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self::with_capacity(provider, store, DEFAULT_MEMORY_CAPACITY)
    }

    /// Hold at most `capacity` vectors in memory.
    pub fn with_capacity(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        capacity: u64,
    ) -> Self {
        let model_version = provider.model_version();
        Self {
            provider,
            store,
            model_version,
            memory: Cache::builder().max_capacity(capacity.max(1)).build(),
            counters: Counters::default(),
        }
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            provider_calls: c.provider_calls.load(Ordering::Relaxed),
            corrupt_records: c.corrupt_records.load(Ordering::Relaxed),
            memory_entries: self.memory.entry_count(),
        }
    }

    /// Whether `text` currently has a vector in memory.
    pub fn contains(&self, text: &str) -> bool {
        self.key(text)
            .is_some_and(|(hash, _)| self.memory.contains_key(&hash))
    }

    /// Return the vector for `text`, computing it at most once.
    ///
    /// # Errors
    ///
    /// - [`RetrievalError::EmptyQuery`] when `text` is blank.
    /// - [`RetrievalError::ProviderUnavailable`] when the provider fails or
    ///   returns a malformed vector.
    pub async fn get_or_compute(&self, text: &str) -> Result<Vector, RetrievalError> {
        let (hash, normalized) = match self.key(text) {
            Some(key) => key,
            None => return Err(RetrievalError::EmptyQuery),
        };

        if let Some(v) = self.memory.get(&hash).await {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(v);
        }

        self.memory
            .try_get_with(hash.clone(), self.load_or_compute(&hash, &normalized))
            .await
            .map_err(unshare)
    }

    /// Fill the cache for many texts. Misses go to the provider in batches
    /// of `batch_size` with at most `concurrency` calls in flight. Results
    /// are returned in input order.
    pub async fn warm(
        self: &Arc<Self>,
        texts: Vec<String>,
        concurrency: usize,
        batch_size: usize,
    ) -> Vec<Result<Vector, RetrievalError>> {
        let keys: Vec<Option<(String, String)>> = texts.iter().map(|t| self.key(t)).collect();

        let mut resolved: HashMap<String, Shared> = HashMap::new();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for (hash, normalized) in keys.iter().flatten() {
            if !seen.insert(hash.as_str()) || self.memory.contains_key(hash) {
                continue;
            }
            match self.load_stored(hash).await {
                Some(v) => {
                    self.memory.insert(hash.clone(), Arc::clone(&v)).await;
                    resolved.insert(hash.clone(), Ok(v));
                }
                None => pending.push((hash.clone(), normalized.clone())),
            }
        }

        if !pending.is_empty() {
            debug!(
                texts = texts.len(),
                misses = pending.len(),
                batch_size,
                "warming embedding cache"
            );
        }
        resolved.extend(self.compute_batches(pending, concurrency, batch_size).await);

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let result = match key {
                None => Err(RetrievalError::EmptyQuery),
                Some((hash, normalized)) => match resolved.get(&hash) {
                    Some(Ok(v)) => Ok(Arc::clone(v)),
                    Some(Err(e)) => Err(duplicate(e)),
                    None => self.get_or_compute(&normalized).await,
                },
            };
            results.push(result);
        }
        results
    }

    /// Forget every vector, in memory and in the store.
    pub async fn reset(&self) -> Result<(), RetrievalError> {
        self.memory.invalidate_all();
        self.store.clear().await?;
        self.counters.clear();
        debug!(model_version = %self.model_version, "embedding cache reset");
        Ok(())
    }

    fn key(&self, text: &str) -> Option<(String, String)> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return None;
        }
        Some((hash_normalized(&normalized, &self.model_version), normalized))
    }

    async fn compute_batches(
        self: &Arc<Self>,
        pending: Vec<(String, String)>,
        concurrency: usize,
        batch_size: usize,
    ) -> HashMap<String, Shared> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut set = JoinSet::new();

        for chunk in pending.chunks(batch_size.max(1)) {
            let batch = Arc::new(Batch {
                items: chunk.to_vec(),
                vectors: OnceCell::new(),
            });
            for slot in 0..batch.items.len() {
                let cache = Arc::clone(self);
                let batch = Arc::clone(&batch);
                let semaphore = Arc::clone(&semaphore);
                set.spawn(async move {
                    let hash = batch.items[slot].0.clone();
                    let init = async {
                        let vectors = batch
                            .vectors
                            .get_or_init(|| cache.embed_batch(&batch.items, &semaphore))
                            .await;
                        vectors[slot].clone().map_err(|e| duplicate(&e))
                    };
                    let result = cache.memory.try_get_with(hash.clone(), init).await;
                    (hash, result)
                });
            }
        }

        let mut out = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((hash, result)) => {
                    out.insert(hash, result);
                }
                Err(e) => warn!(error = %e, "embedding task failed to join"),
            }
        }
        out
    }

    /// One provider call for `items`, under a concurrency permit. The
    /// returned slots line up with `items`.
    async fn embed_batch(&self, items: &[(String, String)], semaphore: &Semaphore) -> Vec<Shared> {
        let fail = |e: RetrievalError| -> Vec<Shared> {
            let e = Arc::new(e);
            items.iter().map(|_| Err(Arc::clone(&e))).collect()
        };
        let texts: Vec<String> = items.iter().map(|(_, text)| text.clone()).collect();

        let embedded = {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(e) => return fail(RetrievalError::ProviderUnavailable(e.to_string())),
            };
            self.counters.provider_calls.fetch_add(1, Ordering::Relaxed);
            debug!(batch = texts.len(), "computing embeddings");
            self.provider.embed(&texts).await
        };

        let vectors = match embedded {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                return fail(RetrievalError::ProviderUnavailable(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )))
            }
            Err(e) => return fail(e),
        };

        let mut out = Vec::with_capacity(items.len());
        for ((hash, _), vector) in items.iter().zip(vectors) {
            out.push(self.persist(hash, vector).await.map_err(Arc::new));
        }
        out
    }

    async fn load_or_compute(&self, hash: &str, normalized: &str) -> Result<Vector, RetrievalError> {
        if let Some(v) = self.load_stored(hash).await {
            return Ok(v);
        }
        self.counters.provider_calls.fetch_add(1, Ordering::Relaxed);
        debug!(content_hash = hash, "computing embedding");
        let vector = embed_one(self.provider.as_ref(), normalized).await?;
        self.persist(hash, vector).await
    }

    /// A valid persisted vector, if any. Read failures count as misses.
    async fn load_stored(&self, hash: &str) -> Option<Vector> {
        match self.store.load(hash).await {
            Ok(Some(record)) => match self.check(&record) {
                Ok(()) => {
                    self.counters.store_hits.fetch_add(1, Ordering::Relaxed);
                    Some(record.vector.into())
                }
                Err(e) => {
                    self.counters.corrupt_records.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "discarding cached embedding");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "embedding store read failed, recomputing");
                None
            }
        }
    }

    /// Validate a fresh provider vector and write it through to the store.
    async fn persist(&self, hash: &str, vector: Vec<f32>) -> Result<Vector, RetrievalError> {
        let record = EmbeddingRecord {
            content_hash: hash.to_string(),
            vector,
            model_version: self.model_version.clone(),
        };
        if let Err(e) = self.check(&record) {
            return Err(RetrievalError::ProviderUnavailable(format!(
                "provider returned a malformed vector: {}",
                e
            )));
        }

        if let Err(e) = self.store.save(&record).await {
            warn!(error = %e, content_hash = hash, "failed to persist embedding");
        }
        Ok(record.vector.into())
    }

    fn check(&self, record: &EmbeddingRecord) -> Result<(), RetrievalError> {
        let corrupt = |reason: String| RetrievalError::CacheCorruption {
            content_hash: record.content_hash.clone(),
            reason,
        };
        if record.model_version != self.model_version {
            return Err(corrupt(format!(
                "model version {} does not match {}",
                record.model_version, self.model_version
            )));
        }
        if record.vector.is_empty() {
            return Err(corrupt("empty vector".to_string()));
        }
        let dims = self.provider.dims();
        if dims > 0 && record.vector.len() != dims {
            return Err(corrupt(format!(
                "dimension {} does not match {}",
                record.vector.len(),
                dims
            )));
        }
        if record.vector.iter().any(|v| !v.is_finite()) {
            return Err(corrupt("non-finite component".to_string()));
        }
        Ok(())
    }
}

/// Errors shared between waiters are re-raised per caller.
fn duplicate(e: &RetrievalError) -> RetrievalError {
    match e {
        RetrievalError::EmptyQuery => RetrievalError::EmptyQuery,
        RetrievalError::ProviderUnavailable(reason) => {
            RetrievalError::ProviderUnavailable(reason.clone())
        }
        other => RetrievalError::ProviderUnavailable(other.to_string()),
    }
}

fn unshare(e: Arc<RetrievalError>) -> RetrievalError {
    Arc::try_unwrap(e).unwrap_or_else(|shared| duplicate(&shared))
}
