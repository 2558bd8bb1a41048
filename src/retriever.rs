//! The retrieval engine.
//!
//! [`Retriever`] ties the pieces together for one change request:
//!
//! ```text
//! corpus snapshot ─▶ fingerprint check ─▶ (rebuild + swap if stale)
//!                                             │
//! query text ─▶ extract_terms ─▶ keyword hits ┤
//!           └─▶ embeddings (cache, timeout) ─▶ semantic scores
//!                                             │
//!                  priority weights ─▶ fuse_and_select ─▶ RetrievalOutcome
//! ```
//!
//! Degradable conditions (provider down or slow, unknown priority tier,
//! empty query, stale index) never fail the call. They are logged and,
//! where the caller should know, reported as [`RetrievalNote`]s.
//! Only corpus and store failures propagate as errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::corpus::{CorpusSnapshot, CorpusStore, DirectoryCorpus};
use crate::db;
use crate::embedding::create_provider;
use crate::error::RetrievalError;
use crate::fusion::{fuse_and_select, Candidate, FusionWeights};
use crate::index::{IndexHandle, IndexSnapshot};
use crate::keywords::extract_terms;
use crate::migrate;
use crate::models::{ChangeRequestQuery, RetrievalNote, RetrievalOutcome, TestCaseDocument};
use crate::priority::PriorityWeights;
use crate::semantic::semantic_score;
use crate::sqlite_store::SqliteVectorStore;

/// Engine knobs, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub weights: FusionWeights,
    pub min_threshold: f64,
    pub top_k: usize,
    pub priority_weights: PriorityWeights,
    /// Budget for all embedding work in one retrieval.
    pub provider_timeout: Duration,
    pub concurrency: usize,
    pub batch_size: usize,
    pub warm_on_rebuild: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

impl RetrievalSettings {
    pub fn from_config(config: &Config) -> Self {
        let r = &config.retrieval;
        Self {
            weights: FusionWeights::from_config(r),
            min_threshold: r.min_threshold,
            top_k: r.top_k,
            priority_weights: r.priority_weights,
            provider_timeout: Duration::from_secs(config.embedding.timeout_secs),
            concurrency: config.embedding.concurrency,
            batch_size: config.embedding.batch_size,
            warm_on_rebuild: r.warm_on_rebuild,
        }
    }
}

/// What a rebuild produced.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub documents: usize,
    pub terms: usize,
    /// False when the index already matched the snapshot.
    pub rebuilt: bool,
    /// Documents whose embedding is cached after the rebuild.
    pub embedded: usize,
    pub embed_failures: usize,
}

pub struct Retriever {
    settings: RetrievalSettings,
    cache: Arc<EmbeddingCache>,
    corpus: Arc<dyn CorpusStore>,
    index: IndexHandle,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl Retriever {
    pub fn new(
        settings: RetrievalSettings,
        cache: Arc<EmbeddingCache>,
        corpus: Arc<dyn CorpusStore>,
    ) -> Self {
        Self {
            settings,
            cache,
            corpus,
            index: IndexHandle::default(),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// SQLite-backed cache, configured provider, directory corpus.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteVectorStore::new(pool));
        let provider = create_provider(&config.embedding)?;
        let cache = Arc::new(EmbeddingCache::with_capacity(
            provider,
            store,
            config.embedding.memory_capacity,
        ));
        let corpus = Arc::new(DirectoryCorpus::new(&config.corpus)?);
        Ok(Self::new(RetrievalSettings::from_config(config), cache, corpus))
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn corpus(&self) -> &Arc<dyn CorpusStore> {
        &self.corpus
    }

    /// The index currently in effect.
    pub fn index(&self) -> Arc<IndexSnapshot> {
        self.index.load()
    }

    /// Rank the corpus against `query`, returning at most `top_k` matches.
    pub async fn retrieve(
        &self,
        query: &ChangeRequestQuery,
        top_k: usize,
    ) -> Result<RetrievalOutcome> {
        let terms = extract_terms(&query.text);
        if terms.is_empty() {
            debug!("query has no searchable terms");
            return Ok(RetrievalOutcome {
                matches: Vec::new(),
                notes: vec![RetrievalNote::EmptyQuery],
            });
        }

        let snapshot = self.corpus.snapshot().await?;
        let index = self.ensure_current(snapshot).await?;
        let mut notes = Vec::new();

        let keyword: HashMap<String, f64> = index
            .keywords
            .match_terms(&terms)
            .into_iter()
            .map(|h| (h.test_case_id, h.score))
            .collect();

        let weights = self.settings.weights;
        let mut degraded = false;
        let semantic = if weights.semantic > 0.0 {
            match self.semantic_scores(&query.text, &index.documents).await {
                Ok(scores) => scores,
                Err(e) if !e.is_degradable() => return Err(e.into()),
                Err(e) => {
                    warn!(
                        error = %e,
                        "semantic signal unavailable, ranking on keyword and priority only"
                    );
                    notes.push(RetrievalNote::SemanticDegraded {
                        reason: e.to_string(),
                    });
                    degraded = true;
                    vec![0.0; index.documents.len()]
                }
            }
        } else {
            vec![0.0; index.documents.len()]
        };

        let mut candidates = Vec::with_capacity(index.documents.len());
        for (doc, semantic_score) in index.documents.iter().zip(semantic) {
            let priority_weight = match self.settings.priority_weights.weight_for(doc) {
                Ok(w) => w,
                Err(e) => {
                    warn!(error = %e, "excluding test case from ranking");
                    notes.push(RetrievalNote::InvalidPriority {
                        test_case_id: doc.id.clone(),
                        value: doc.priority.clone(),
                    });
                    continue;
                }
            };
            candidates.push(Candidate {
                test_case_id: doc.id.clone(),
                title: doc.title.clone(),
                keyword_score: keyword.get(&doc.id).copied().unwrap_or(0.0),
                semantic_score,
                priority_weight,
            });
        }

        let matches = fuse_and_select(
            candidates,
            &weights,
            self.settings.min_threshold,
            top_k,
            degraded,
        );
        debug!(
            change_type = %query.change_type,
            terms = terms.len(),
            keyword_hits = keyword.len(),
            matches = matches.len(),
            degraded,
            "retrieval complete"
        );
        Ok(RetrievalOutcome { matches, notes })
    }

    /// Build the index for `snapshot` and swap it in. Idempotent: a
    /// snapshot matching the current fingerprint leaves the index as is.
    /// With `warm_on_rebuild`, every document's embedding is filled into
    /// the cache; failures there are logged, not returned.
    pub async fn rebuild_index(&self, snapshot: CorpusSnapshot) -> Result<IndexSummary> {
        let (index, rebuilt) = self.install(snapshot).await;

        let mut embedded = 0;
        let mut embed_failures = 0;
        if self.settings.warm_on_rebuild && self.settings.weights.semantic > 0.0 {
            let texts: Vec<String> = index.documents.iter().map(|d| d.search_text()).collect();
            let results = tokio::time::timeout(
                self.settings.provider_timeout,
                self.cache
                    .warm(texts.clone(), self.settings.concurrency, self.settings.batch_size),
            )
            .await;
            match results {
                Ok(results) => {
                    for result in results {
                        match result {
                            Ok(_) => embedded += 1,
                            Err(e) => {
                                embed_failures += 1;
                                debug!(error = %e, "warm failed for document");
                            }
                        }
                    }
                    if embed_failures > 0 {
                        warn!(
                            failures = embed_failures,
                            "some documents could not be embedded, semantic ranking will degrade"
                        );
                    }
                }
                Err(_) => {
                    // Batches that finished before the deadline are kept.
                    embedded = texts.iter().filter(|t| self.cache.contains(t)).count();
                    embed_failures = texts.len() - embedded;
                    warn!(
                        timeout_secs = self.settings.provider_timeout.as_secs(),
                        embedded,
                        remaining = embed_failures,
                        "cache warm timed out"
                    );
                }
            }
        }

        Ok(IndexSummary {
            fingerprint: index.fingerprint.to_string(),
            built_at: index.built_at,
            documents: index.documents.len(),
            terms: index.keywords.term_count(),
            rebuilt,
            embedded,
            embed_failures,
        })
    }

    /// Snapshot the configured corpus and rebuild from it.
    pub async fn refresh(&self) -> Result<IndexSummary> {
        let snapshot = self
            .corpus
            .snapshot()
            .await
            .with_context(|| format!("failed to read {} corpus", self.corpus.name()))?;
        self.rebuild_index(snapshot).await
    }

    /// Drop every cached embedding, in memory and on disk.
    pub async fn reset_cache(&self) -> Result<()> {
        self.cache.reset().await?;
        info!(model_version = %self.cache.model_version(), "embedding cache cleared");
        Ok(())
    }

    async fn ensure_current(&self, snapshot: CorpusSnapshot) -> Result<Arc<IndexSnapshot>> {
        let current = self.index.load();
        if current.fingerprint == snapshot.fingerprint {
            return Ok(current);
        }
        let stale = RetrievalError::IndexStale {
            built: current.fingerprint.short().to_string(),
            current: snapshot.fingerprint.short().to_string(),
        };
        debug!(reason = %stale, "rebuilding keyword index");
        Ok(self.install(snapshot).await.0)
    }

    /// Swap in an index for `snapshot` unless one is already current.
    /// Rebuilds are serialized so concurrent retrievals build once.
    async fn install(&self, snapshot: CorpusSnapshot) -> (Arc<IndexSnapshot>, bool) {
        let _guard = self.rebuild_lock.lock().await;
        let current = self.index.load();
        if current.fingerprint == snapshot.fingerprint {
            return (current, false);
        }

        let built = IndexSnapshot::build(snapshot.documents);
        info!(
            documents = built.documents.len(),
            terms = built.keywords.term_count(),
            fingerprint = built.fingerprint.short(),
            "keyword index built"
        );
        self.index.swap(built);
        (self.index.load(), true)
    }

    /// Cosine-based score per document, aligned with `documents`.
    ///
    /// All embedding work shares one timeout. Any provider failure fails
    /// the whole signal so ranking never mixes semantic and non-semantic
    /// documents.
    async fn semantic_scores(
        &self,
        query_text: &str,
        documents: &[TestCaseDocument],
    ) -> Result<Vec<f64>, RetrievalError> {
        let work = async {
            let query = self.cache.get_or_compute(query_text).await?;
            let texts: Vec<String> = documents.iter().map(|d| d.search_text()).collect();
            let vectors = self
                .cache
                .warm(texts, self.settings.concurrency, self.settings.batch_size)
                .await;

            vectors
                .into_iter()
                .map(|v| match v {
                    Ok(v) => Ok(semantic_score(&query, &v)),
                    // Nothing to embed; the document has no text.
                    Err(RetrievalError::EmptyQuery) => Ok(0.0),
                    Err(e) => Err(e),
                })
                .collect::<Result<Vec<f64>, RetrievalError>>()
        };

        tokio::time::timeout(self.settings.provider_timeout, work)
            .await
            .map_err(|_| {
                RetrievalError::ProviderUnavailable(format!(
                    "timed out after {}s",
                    self.settings.provider_timeout.as_secs_f64()
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::InMemoryCorpus;
    use crate::embedding::{DisabledProvider, EmbeddingProvider, HashProvider};
    use crate::models::ChangeType;
    use crate::store::memory::InMemoryVectorStore;
    use crate::store::VectorStore;

    fn docs() -> Vec<TestCaseDocument> {
        vec![
            TestCaseDocument::new("A", "Push token refresh", "High")
                .with_step("Rotate the push token", "New token is stored"),
            TestCaseDocument::new("B", "Booking cancellation window", "Medium")
                .with_step("Cancel inside the window", "Refund issued"),
            TestCaseDocument::new("C", "Invoice export", "Low")
                .with_step("Export invoices", "Spreadsheet downloaded"),
        ]
    }

    fn retriever(provider: Arc<dyn EmbeddingProvider>, corpus: Arc<InMemoryCorpus>) -> Retriever {
        let cache = Arc::new(EmbeddingCache::new(
            provider,
            Arc::new(InMemoryVectorStore::new()),
        ));
        Retriever::new(RetrievalSettings::default(), cache, corpus)
    }

    fn query(text: &str) -> ChangeRequestQuery {
        ChangeRequestQuery::new(text, ChangeType::FeatureUpdate)
    }

    #[tokio::test]
    async fn index_follows_corpus_edits() {
        let corpus = Arc::new(InMemoryCorpus::with_documents(docs()));
        let r = retriever(Arc::new(HashProvider::new(64)), corpus.clone());

        r.retrieve(&query("push token"), 5).await.unwrap();
        let first = r.index();
        assert_eq!(first.documents.len(), 3);

        r.retrieve(&query("push token"), 5).await.unwrap();
        assert!(Arc::ptr_eq(&first, &r.index()));

        corpus.remove("C");
        r.retrieve(&query("push token"), 5).await.unwrap();
        assert_eq!(r.index().documents.len(), 2);
    }

    #[tokio::test]
    async fn rebuild_is_idempotent_and_warms() {
        let corpus = Arc::new(InMemoryCorpus::with_documents(docs()));
        let r = retriever(Arc::new(HashProvider::new(64)), corpus.clone());

        let first = r.refresh().await.unwrap();
        assert!(first.rebuilt);
        assert_eq!(first.documents, 3);
        assert_eq!(first.embedded, 3);
        let calls = r.cache().stats().provider_calls;

        let second = r.refresh().await.unwrap();
        assert!(!second.rebuilt);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(r.cache().stats().provider_calls, calls);
    }

    #[tokio::test]
    async fn disabled_provider_degrades_with_note() {
        let corpus = Arc::new(InMemoryCorpus::with_documents(docs()));
        let r = retriever(Arc::new(DisabledProvider), corpus);

        let out = r.retrieve(&query("push notification token refresh"), 5).await.unwrap();
        assert!(out.is_degraded());
        assert_eq!(out.matches[0].test_case_id, "A");
        assert!(out.matches.iter().all(|m| m.semantic_score == 0.0));
    }

    #[tokio::test]
    async fn invalid_priority_is_excluded_and_noted() {
        let mut all = docs();
        all.push(TestCaseDocument::new("D", "Push token audit", "blocker"));
        let corpus = Arc::new(InMemoryCorpus::with_documents(all));
        let r = retriever(Arc::new(HashProvider::new(64)), corpus);

        let out = r.retrieve(&query("push token"), 10).await.unwrap();
        assert!(out.matches.iter().all(|m| m.test_case_id != "D"));
        assert!(out.notes.contains(&RetrievalNote::InvalidPriority {
            test_case_id: "D".to_string(),
            value: "blocker".to_string(),
        }));
    }

    #[tokio::test]
    async fn stopword_only_query_is_empty() {
        let corpus = Arc::new(InMemoryCorpus::with_documents(docs()));
        let r = retriever(Arc::new(HashProvider::new(64)), corpus);

        let out = r.retrieve(&query("the and of"), 5).await.unwrap();
        assert!(out.matches.is_empty());
        assert_eq!(out.notes, vec![RetrievalNote::EmptyQuery]);
        assert_eq!(r.cache().stats().provider_calls, 0);
    }

    /// Embeds instantly, except texts mentioning invoices, which never return.
    struct StuckOnInvoices(HashProvider);

    #[async_trait::async_trait]
    impl EmbeddingProvider for StuckOnInvoices {
        fn kind(&self) -> &str {
            "stuck"
        }
        fn model_name(&self) -> &str {
            "stuck"
        }
        fn dims(&self) -> usize {
            self.0.dims()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            if texts.iter().any(|t| t.to_lowercase().contains("invoice")) {
                std::future::pending::<()>().await;
            }
            self.0.embed(texts).await
        }
    }

    struct UnreadableCorpus;

    #[async_trait::async_trait]
    impl CorpusStore for UnreadableCorpus {
        fn name(&self) -> &str {
            "unreadable"
        }
        async fn snapshot(&self) -> Result<CorpusSnapshot> {
            anyhow::bail!("corpus root does not exist")
        }
    }

    #[tokio::test]
    async fn warm_timeout_counts_completed_documents() {
        let corpus = Arc::new(InMemoryCorpus::with_documents(docs()));
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(StuckOnInvoices(HashProvider::new(64))),
            Arc::new(InMemoryVectorStore::new()),
        ));
        let settings = RetrievalSettings {
            provider_timeout: Duration::from_millis(200),
            batch_size: 1,
            ..RetrievalSettings::default()
        };
        let r = Retriever::new(settings, cache, corpus);

        let summary = r.refresh().await.unwrap();
        assert_eq!(summary.documents, 3);
        assert_eq!(summary.embedded, 2);
        assert_eq!(summary.embed_failures, 1);
    }

    #[tokio::test]
    async fn empty_query_does_not_read_the_corpus() {
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(HashProvider::new(64)),
            Arc::new(InMemoryVectorStore::new()),
        ));
        let r = Retriever::new(RetrievalSettings::default(), cache, Arc::new(UnreadableCorpus));

        let out = r.retrieve(&query(""), 5).await.unwrap();
        assert!(out.matches.is_empty());
        assert_eq!(out.notes, vec![RetrievalNote::EmptyQuery]);

        assert!(r.retrieve(&query("push token"), 5).await.is_err());
    }

    #[tokio::test]
    async fn reset_cache_clears_vectors() {
        let corpus = Arc::new(InMemoryCorpus::with_documents(docs()));
        let r = retriever(Arc::new(HashProvider::new(64)), corpus);
        r.refresh().await.unwrap();
        r.reset_cache().await.unwrap();
        assert_eq!(r.cache().stats().provider_calls, 0);
        assert!(r.cache().store().stats().await.unwrap().is_empty());
    }
}
