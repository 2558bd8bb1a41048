//! Deterministic feature-hashing embeddings.
//!
//! Each normalized term is hashed (SHA-256) into one of `dims` buckets with
//! a sign bit, weighted by `1 + ln(tf)`, and the result is L2-normalized.
//! Texts that share vocabulary land close together, which is enough for
//! offline use and for tests that need a stable, model-free backend.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::keywords::term_frequencies;

pub(crate) const DEFAULT_DIMS: usize = 256;

/// Model-free provider producing bag-of-terms vectors.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    /// Synchronous embedding of a single text.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for (term, tf) in term_frequencies(text) {
            let digest = Sha256::digest(term.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 + (tf as f32).ln());
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn kind(&self) -> &str {
        "hash"
    }
    fn model_name(&self) -> &str {
        "feature-hash-v1"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
