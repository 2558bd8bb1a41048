//! Keyword index over a corpus snapshot.
//!
//! The index maps each normalized term to its postings (document and term
//! frequency). It is immutable once built; [`IndexHandle`] publishes a new
//! snapshot by swapping an `Arc`, so readers always hold a complete index.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::keywords::term_frequencies;
use crate::models::TestCaseDocument;

/// Digest identifying one exact corpus state.
///
/// SHA-256 over the `(id, content digest)` pairs sorted by id, so any
/// addition, edit, or removal produces a different value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CorpusFingerprint(String);

impl CorpusFingerprint {
    pub fn of(documents: &[TestCaseDocument]) -> Self {
        let mut pairs: Vec<(&str, String)> = documents
            .iter()
            .map(|d| (d.id.as_str(), d.content_digest()))
            .collect();
        pairs.sort();

        let mut hasher = Sha256::new();
        for (id, digest) in pairs {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
            hasher.update([b'\n']);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for CorpusFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: usize,
    tf: u32,
}

/// Public view of one term's postings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordIndexEntry {
    pub term: String,
    /// `(test case id, term frequency)` sorted by id.
    pub postings: Vec<(String, u32)>,
}

/// A document that shares at least one term with the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordHit {
    pub test_case_id: String,
    /// IDF-weighted fraction of query terms present, in `[0, 1]`.
    pub score: f64,
}

/// Inverted index from term to postings.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    doc_ids: Vec<String>,
    postings: HashMap<String, Vec<Posting>>,
}

impl KeywordIndex {
    pub fn build(documents: &[TestCaseDocument]) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_ids = Vec::with_capacity(documents.len());

        for (doc, document) in documents.iter().enumerate() {
            doc_ids.push(document.id.clone());
            for (term, tf) in term_frequencies(&document.search_text()) {
                postings.entry(term).or_default().push(Posting { doc, tf });
            }
        }

        Self { doc_ids, postings }
    }

    pub fn document_count(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    /// Smoothed inverse document frequency: `ln((N + 1) / (df + 1)) + 1`.
    ///
    /// Always ≥ 1, including for terms absent from the corpus, so query
    /// terms nobody uses still count against coverage.
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.doc_ids.len() as f64;
        let df = self.document_frequency(term) as f64;
        ((n + 1.0) / (df + 1.0)).ln() + 1.0
    }

    pub fn entry(&self, term: &str) -> Option<KeywordIndexEntry> {
        let postings = self.postings.get(term)?;
        let mut out: Vec<(String, u32)> = postings
            .iter()
            .map(|p| (self.doc_ids[p.doc].clone(), p.tf))
            .collect();
        out.sort();
        Some(KeywordIndexEntry {
            term: term.to_string(),
            postings: out,
        })
    }

    /// Score every document sharing a term with `query_terms`.
    ///
    /// `score = Σ idf(matched terms) / Σ idf(query terms)`. Documents with no
    /// shared term are omitted. Output is sorted by score descending, then id.
    pub fn match_terms(&self, query_terms: &BTreeSet<String>) -> Vec<KeywordHit> {
        if query_terms.is_empty() {
            return Vec::new();
        }

        let total: f64 = query_terms.iter().map(|t| self.idf(t)).sum();
        let mut matched: HashMap<usize, f64> = HashMap::new();
        for term in query_terms {
            if let Some(postings) = self.postings.get(term) {
                let idf = self.idf(term);
                for p in postings {
                    *matched.entry(p.doc).or_insert(0.0) += idf;
                }
            }
        }

        let mut hits: Vec<KeywordHit> = matched
            .into_iter()
            .map(|(doc, sum)| KeywordHit {
                test_case_id: self.doc_ids[doc].clone(),
                score: (sum / total).clamp(0.0, 1.0),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.test_case_id.cmp(&b.test_case_id))
        });
        hits
    }
}

/// Everything derived from one corpus state.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub fingerprint: CorpusFingerprint,
    pub documents: Vec<TestCaseDocument>,
    pub keywords: KeywordIndex,
    pub built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    pub fn build(documents: Vec<TestCaseDocument>) -> Self {
        let fingerprint = CorpusFingerprint::of(&documents);
        let keywords = KeywordIndex::build(&documents);
        Self {
            fingerprint,
            documents,
            keywords,
            built_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::build(Vec::new())
    }
}

/// Shared, atomically replaceable index.
pub struct IndexHandle {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl IndexHandle {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot in effect right now. Holding it does not block swaps.
    pub fn load(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Publish `snapshot`, returning the one it replaced.
    pub fn swap(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let next = Arc::new(snapshot);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new(IndexSnapshot::empty())
    }
}
