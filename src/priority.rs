//! Priority tier → numeric boost.

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::error::RetrievalError;
use crate::models::{Priority, TestCaseDocument};

/// Weight per priority tier. Defaults: 1.0 / 0.8 / 0.6 / 0.4.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            critical: 1.0,
            high: 0.8,
            medium: 0.6,
            low: 0.4,
        }
    }
}

impl PriorityWeights {
    pub fn weight(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }

    /// Look up the weight for a document's raw priority string.
    pub fn weight_for(&self, doc: &TestCaseDocument) -> Result<f64, RetrievalError> {
        Ok(self.weight(doc.parsed_priority()?))
    }

    pub fn validate(&self) -> Result<()> {
        for p in Priority::ALL {
            let w = self.weight(p);
            if !(0.0..=1.0).contains(&w) {
                bail!("retrieval.priority_weights.{} must be in [0.0, 1.0]", p);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let w = PriorityWeights::default();
        assert_eq!(w.weight(Priority::Critical), 1.0);
        assert_eq!(w.weight(Priority::High), 0.8);
        assert_eq!(w.weight(Priority::Medium), 0.6);
        assert_eq!(w.weight(Priority::Low), 0.4);
    }

    #[test]
    fn weight_for_document() {
        let w = PriorityWeights::default();
        let doc = TestCaseDocument::new("TC-1", "Login", "P2 - High");
        assert_eq!(w.weight_for(&doc).unwrap(), 0.8);
    }

    #[test]
    fn unknown_tier_is_an_error_not_a_default() {
        let w = PriorityWeights::default();
        let doc = TestCaseDocument::new("TC-2", "Login", "blocker");
        assert!(matches!(
            w.weight_for(&doc),
            Err(RetrievalError::InvalidPriority { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_override() {
        let w = PriorityWeights {
            critical: 1.5,
            ..Default::default()
        };
        assert!(w.validate().is_err());
    }
}
