//! Score fusion and top-k selection.
//!
//! `combined = w_k·keyword + w_s·semantic + w_p·priority`. Candidates below
//! the threshold are dropped, the rest are put in a total order (combined
//! desc, priority desc, id asc) and ranked 1..=n. Pure; no I/O.

use std::cmp::Ordering;

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::models::ScoredMatch;

/// Signal weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionWeights {
    pub keyword: f64,
    pub semantic: f64,
    pub priority: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            keyword: 0.4,
            semantic: 0.4,
            priority: 0.2,
        }
    }
}

impl FusionWeights {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            keyword: config.keyword_weight,
            semantic: config.semantic_weight,
            priority: config.priority_weight,
        }
    }

    pub fn total(&self) -> f64 {
        self.keyword + self.semantic + self.priority
    }

    /// Weights for keyword + priority only, rescaled to the same total.
    ///
    /// With `W = w_k + w_s + w_p`: `w_k' = w_k·W/(w_k+w_p)`,
    /// `w_p' = w_p·W/(w_k+w_p)`, `w_s' = 0`. If keyword and priority both
    /// weigh zero there is nothing to redistribute onto and all weights are 0.
    pub fn degraded(&self) -> Self {
        let remaining = self.keyword + self.priority;
        if remaining <= 0.0 {
            return Self {
                keyword: 0.0,
                semantic: 0.0,
                priority: 0.0,
            };
        }
        let scale = self.total() / remaining;
        Self {
            keyword: self.keyword * scale,
            semantic: 0.0,
            priority: self.priority * scale,
        }
    }

    pub fn combine(&self, keyword: f64, semantic: f64, priority: f64) -> f64 {
        self.keyword * keyword + self.semantic * semantic + self.priority * priority
    }
}

/// One document's three signals, ready for fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub test_case_id: String,
    pub title: String,
    /// 0 when the keyword matcher did not emit the document.
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub priority_weight: f64,
}

/// Fuse, filter, order, truncate and rank.
///
/// When `degraded` is set the semantic component is zeroed and the
/// weights come from [`FusionWeights::degraded`].
pub fn fuse_and_select(
    candidates: Vec<Candidate>,
    weights: &FusionWeights,
    min_threshold: f64,
    top_k: usize,
    degraded: bool,
) -> Vec<ScoredMatch> {
    let weights = if degraded {
        weights.degraded()
    } else {
        *weights
    };

    let mut scored: Vec<ScoredMatch> = candidates
        .into_iter()
        .filter_map(|c| {
            let semantic_score = if degraded { 0.0 } else { c.semantic_score };
            let combined_score =
                weights.combine(c.keyword_score, semantic_score, c.priority_weight);
            (combined_score >= min_threshold).then(|| ScoredMatch {
                test_case_id: c.test_case_id,
                title: c.title,
                keyword_score: c.keyword_score,
                semantic_score,
                priority_weight: c.priority_weight,
                combined_score,
                rank: 0,
            })
        })
        .collect();

    scored.sort_by(ranking_order);
    scored.truncate(top_k);
    for (i, m) in scored.iter_mut().enumerate() {
        m.rank = i + 1;
    }
    scored
}

fn ranking_order(a: &ScoredMatch, b: &ScoredMatch) -> Ordering {
    b.combined_score
        .total_cmp(&a.combined_score)
        .then_with(|| b.priority_weight.total_cmp(&a.priority_weight))
        .then_with(|| a.test_case_id.cmp(&b.test_case_id))
}
