//! Cosine similarity mapped onto `[0, 1]`.
//!
//! The transform is `(cos + 1) / 2`, clamped. It is monotonic in cosine, so
//! the semantic ordering of documents is exactly the model's ordering, and
//! orthogonal vectors land at 0.5. Fusion weights are calibrated against
//! this scale.

use crate::embedding::cosine_similarity;

/// Similarity in `[0, 1]` between a query vector and a document vector.
///
/// Mismatched lengths and zero vectors score as orthogonal (0.5).
pub fn semantic_score(query: &[f32], document: &[f32]) -> f64 {
    rescale(cosine_similarity(query, document) as f64)
}

/// `(cos + 1) / 2`, clamped to `[0, 1]`.
pub fn rescale(cosine: f64) -> f64 {
    if !cosine.is_finite() {
        return 0.5;
    }
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = [0.6f32, 0.8];
        assert!((semantic_score(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_score_zero() {
        assert!(semantic_score(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_and_degenerate_vectors_score_half() {
        assert!((semantic_score(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-6);
        assert!((semantic_score(&[0.0, 0.0], &[1.0, 0.0]) - 0.5).abs() < 1e-6);
        assert!((semantic_score(&[1.0], &[1.0, 0.0]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rescale_is_monotonic() {
        let xs = [-1.0, -0.3, 0.0, 0.2, 0.9, 1.0];
        let ys: Vec<f64> = xs.iter().map(|x| rescale(*x)).collect();
        assert!(ys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(rescale(f64::NAN), 0.5);
    }
}
