//! Error taxonomy for the retrieval engine.
//!
//! Most of these conditions are recovered inside [`Retriever::retrieve`](crate::retriever::Retriever::retrieve)
//! and only show up as [`RetrievalNote`](crate::models::RetrievalNote)s or log lines.
//! They are still typed so callers of the lower-level building blocks
//! (cache, priority table, index) can match on them.

use thiserror::Error;

/// Errors raised by the embedding provider and the engine building blocks.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The embedding backend is unreachable, disabled, timed out, or errored.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A test case carries a priority tier outside the configured table.
    #[error("invalid priority {value:?} on test case {test_case_id}")]
    InvalidPriority {
        /// Offending test case.
        test_case_id: String,
        /// Raw priority value as found in the document.
        value: String,
    },

    /// The query normalizes to no terms.
    #[error("query text contains no searchable terms")]
    EmptyQuery,

    /// The built index no longer matches the corpus fingerprint.
    #[error("keyword index is stale (built for {built}, corpus is {current})")]
    IndexStale {
        /// Fingerprint the index was built from.
        built: String,
        /// Fingerprint of the current corpus snapshot.
        current: String,
    },

    /// A persisted vector failed its shape check.
    #[error("corrupt cache record {content_hash}: {reason}")]
    CacheCorruption {
        /// Key of the rejected record.
        content_hash: String,
        /// What the check found.
        reason: String,
    },

    /// Persistence layer failure (SQLite, filesystem).
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl RetrievalError {
    /// True for conditions the engine recovers from without failing the call.
    pub fn is_degradable(&self) -> bool {
        !matches!(self, RetrievalError::Store(_))
    }
}
