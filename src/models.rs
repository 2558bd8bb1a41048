//! Core data models used throughout the retriever.
//!
//! These types represent the test cases, queries, and ranked results that
//! flow through the retrieval pipeline.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::RetrievalError;

/// Priority tier of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a tier name (`"High"`) or a `P1`..`P4` code (`"P2 - High"`).
///
/// The code takes precedence when both are present, so `"P1 - Low"` is
/// `Critical`.
impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let head = trimmed
            .split(|c: char| c.is_whitespace() || c == '-' || c == ':')
            .find(|p| !p.is_empty())
            .unwrap_or("")
            .to_ascii_lowercase();

        match head.as_str() {
            "p1" | "critical" => Ok(Priority::Critical),
            "p2" | "high" => Ok(Priority::High),
            "p3" | "medium" => Ok(Priority::Medium),
            "p4" | "low" => Ok(Priority::Low),
            _ => Err(format!("unrecognized priority: {:?}", trimmed)),
        }
    }
}

/// One step of a test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestStep {
    pub step_text: String,
    pub step_expected: String,
}

impl<'de> Deserialize<'de> for TestStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawStep {
            Text(String),
            Full {
                step_text: String,
                #[serde(default)]
                step_expected: String,
            },
        }

        Ok(match RawStep::deserialize(deserializer)? {
            RawStep::Text(step_text) => TestStep {
                step_text,
                step_expected: String::new(),
            },
            RawStep::Full {
                step_text,
                step_expected,
            } => TestStep {
                step_text,
                step_expected,
            },
        })
    }
}

/// A structured test case as stored in the corpus.
///
/// `priority` is kept verbatim so an unknown tier can be reported against
/// the specific document at scoring time instead of failing the load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseDocument {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "text_or_lines")]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default, deserialize_with = "text_or_lines")]
    pub preconditions: String,
    #[serde(default)]
    pub steps: Vec<TestStep>,
    #[serde(default, deserialize_with = "text_or_lines")]
    pub expected_result: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Test cases without a priority are treated as P2.
fn default_priority() -> String {
    "P2 - High".to_string()
}

fn text_or_lines<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrLines {
        Text(String),
        Lines(Vec<String>),
    }

    Ok(match Option::<TextOrLines>::deserialize(deserializer)? {
        Some(TextOrLines::Text(t)) => t,
        Some(TextOrLines::Lines(lines)) => lines.join("\n"),
        None => String::new(),
    })
}

impl TestCaseDocument {
    /// Convenience constructor used by embedders and tests.
    pub fn new(id: &str, title: &str, priority: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            priority: priority.to_string(),
            preconditions: String::new(),
            steps: Vec::new(),
            expected_result: String::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_step(mut self, step_text: &str, step_expected: &str) -> Self {
        self.steps.push(TestStep {
            step_text: step_text.to_string(),
            step_expected: step_expected.to_string(),
        });
        self
    }

    pub fn with_preconditions(mut self, preconditions: &str) -> Self {
        self.preconditions = preconditions.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Parse the stored priority string.
    pub fn parsed_priority(&self) -> Result<Priority, RetrievalError> {
        self.priority
            .parse()
            .map_err(|_| RetrievalError::InvalidPriority {
                test_case_id: self.id.clone(),
                value: self.priority.clone(),
            })
    }

    /// Text that is indexed and embedded: title, description,
    /// preconditions, steps, expected result, tags.
    pub fn search_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.title.as_str()];
        for field in [&self.description, &self.preconditions] {
            if !field.is_empty() {
                parts.push(field);
            }
        }
        for step in &self.steps {
            parts.push(&step.step_text);
            if !step.step_expected.is_empty() {
                parts.push(&step.step_expected);
            }
        }
        if !self.expected_result.is_empty() {
            parts.push(&self.expected_result);
        }
        for tag in &self.tags {
            parts.push(tag);
        }
        parts.join("\n")
    }

    /// Digest over every field; any edit changes it.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.priority.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.search_text().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Fill in a missing id with a stable digest of the title.
    pub fn ensure_id(&mut self) {
        if self.id.trim().is_empty() {
            let mut hasher = Sha256::new();
            hasher.update(self.title.as_bytes());
            let digest = format!("{:x}", hasher.finalize());
            self.id = format!("TC-{}", &digest[..12]);
        }
    }
}

/// Kind of change a request describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    BugFix,
    FeatureUpdate,
    NewFeature,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::BugFix => "bug_fix",
            ChangeType::FeatureUpdate => "feature_update",
            ChangeType::NewFeature => "new_feature",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "bug_fix" | "bugfix" => Ok(ChangeType::BugFix),
            "feature_update" => Ok(ChangeType::FeatureUpdate),
            "new_feature" => Ok(ChangeType::NewFeature),
            other => Err(format!(
                "unknown change type '{}'. Use bug_fix, feature_update, or new_feature.",
                other
            )),
        }
    }
}

/// An incoming change request reduced to its searchable text.
#[derive(Debug, Clone)]
pub struct ChangeRequestQuery {
    pub text: String,
    pub change_type: ChangeType,
}

impl ChangeRequestQuery {
    pub fn new(text: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            text: text.into(),
            change_type,
        }
    }

    /// Concatenate title, description, and acceptance criteria.
    pub fn from_parts(
        title: &str,
        description: &str,
        acceptance_criteria: &[String],
        change_type: ChangeType,
    ) -> Self {
        let mut parts = vec![title.trim(), description.trim()];
        parts.extend(acceptance_criteria.iter().map(|c| c.trim()));
        let text = parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Self { text, change_type }
    }
}

/// A cached embedding keyed by content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub content_hash: String,
    pub vector: Vec<f32>,
    pub model_version: String,
}

/// A ranked retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub test_case_id: String,
    pub title: String,
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub priority_weight: f64,
    pub combined_score: f64,
    /// 1-based, dense.
    pub rank: usize,
}

/// A condition the engine recovered from while serving a retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalNote {
    /// Semantic similarity was not used; scores are keyword + priority only.
    SemanticDegraded { reason: String },
    /// The query had no searchable terms.
    EmptyQuery,
    /// A test case was excluded because its priority is unknown.
    InvalidPriority { test_case_id: String, value: String },
}

/// Everything `retrieve` hands back: the ranking plus disclosures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalOutcome {
    pub matches: Vec<ScoredMatch>,
    pub notes: Vec<RetrievalNote>,
}

impl RetrievalOutcome {
    pub fn is_degraded(&self) -> bool {
        self.notes
            .iter()
            .any(|n| matches!(n, RetrievalNote::SemanticDegraded { .. }))
    }
}
