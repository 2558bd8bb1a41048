//! TOML configuration.
//!
//! Every engine knob is read from one file and handed to the engine as a
//! value; nothing is process-global, so tests can run several
//! differently-configured retrievers side by side.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::ChangeType;
use crate::priority::PriorityWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".cache/tcr.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_corpus_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_corpus_root() -> PathBuf {
    PathBuf::from("test_cases")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_priority_weight")]
    pub priority_weight: f64,
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Warm the embedding cache for every document on index rebuild.
    #[serde(default = "default_warm_on_rebuild")]
    pub warm_on_rebuild: bool,
    #[serde(default)]
    pub priority_weights: PriorityWeights,
    /// Per change type `top_k`, keyed by `bug_fix` / `feature_update` / `new_feature`.
    #[serde(default)]
    pub top_k_by_change_type: BTreeMap<String, usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_keyword_weight(),
            semantic_weight: default_semantic_weight(),
            priority_weight: default_priority_weight(),
            min_threshold: default_min_threshold(),
            top_k: default_top_k(),
            warm_on_rebuild: default_warm_on_rebuild(),
            priority_weights: PriorityWeights::default(),
            top_k_by_change_type: BTreeMap::new(),
        }
    }
}

fn default_keyword_weight() -> f64 {
    0.4
}
fn default_semantic_weight() -> f64 {
    0.4
}
fn default_priority_weight() -> f64 {
    0.2
}
fn default_min_threshold() -> f64 {
    0.1
}
fn default_top_k() -> usize {
    5
}
fn default_warm_on_rebuild() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on in-flight provider calls while warming the cache.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Texts sent per provider call while warming the cache.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Vectors kept in memory; older entries fall back to the store.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}
fn default_batch_size() -> usize {
    64
}
fn default_memory_capacity() -> u64 {
    10_000
}

impl RetrievalConfig {
    /// `top_k` for a change type, falling back to the global value.
    pub fn top_k_for(&self, change_type: ChangeType) -> usize {
        self.top_k_by_change_type
            .get(change_type.as_str())
            .copied()
            .unwrap_or(self.top_k)
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Defaults everywhere; semantic signal disabled.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig::default(),
            corpus: CorpusConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        for (name, w) in [
            ("keyword_weight", r.keyword_weight),
            ("semantic_weight", r.semantic_weight),
            ("priority_weight", r.priority_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                bail!("retrieval.{} must be a non-negative number", name);
            }
        }
        if r.keyword_weight + r.semantic_weight + r.priority_weight <= 0.0 {
            bail!("retrieval weights must not all be zero");
        }
        if !(0.0..=1.0).contains(&r.min_threshold) {
            bail!("retrieval.min_threshold must be in [0.0, 1.0]");
        }
        if r.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        for (key, k) in &r.top_k_by_change_type {
            key.parse::<ChangeType>()
                .map_err(|e| anyhow::anyhow!("retrieval.top_k_by_change_type: {}", e))?;
            if *k < 1 {
                bail!("retrieval.top_k_by_change_type.{} must be >= 1", key);
            }
        }
        r.priority_weights.validate()?;

        let e = &self.embedding;
        if e.concurrency < 1 {
            bail!("embedding.concurrency must be >= 1");
        }
        if e.batch_size < 1 {
            bail!("embedding.batch_size must be >= 1");
        }
        if e.memory_capacity < 1 {
            bail!("embedding.memory_capacity must be >= 1");
        }
        if e.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be >= 1");
        }
        match e.provider.as_str() {
            "disabled" | "hash" | "local" => {}
            "openai" | "ollama" => {
                if e.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        e.provider
                    );
                }
                if e.dims.is_none() || e.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        e.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
                other
            ),
        }
        if e.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
