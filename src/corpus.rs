//! Corpus stores: where test cases come from.
//!
//! The engine polls a [`CorpusStore`] for a full snapshot on every
//! retrieval and compares its fingerprint against the built index.
//! Two stores ship here:
//!
//! - [`DirectoryCorpus`] walks a directory of JSON files (one test case or
//!   an array of test cases per file), filtered by include/exclude globs.
//! - [`InMemoryCorpus`] holds documents in memory for embedders and tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::index::CorpusFingerprint;
use crate::models::TestCaseDocument;

/// One consistent view of the corpus: documents sorted by id, ids unique.
#[derive(Debug, Clone)]
pub struct CorpusSnapshot {
    pub documents: Vec<TestCaseDocument>,
    pub fingerprint: CorpusFingerprint,
}

impl CorpusSnapshot {
    /// Sort by id and drop duplicate ids (the first occurrence wins).
    pub fn new(documents: Vec<TestCaseDocument>) -> Self {
        let mut by_id: BTreeMap<String, TestCaseDocument> = BTreeMap::new();
        for doc in documents {
            if by_id.contains_key(&doc.id) {
                warn!(test_case_id = %doc.id, "duplicate test case id, keeping first");
                continue;
            }
            by_id.insert(doc.id.clone(), doc);
        }
        let documents: Vec<TestCaseDocument> = by_id.into_values().collect();
        let fingerprint = CorpusFingerprint::of(&documents);
        Self {
            documents,
            fingerprint,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Source of test-case documents.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// The complete current corpus.
    async fn snapshot(&self) -> Result<CorpusSnapshot>;
}

// ═══════════════════════════════════════════════════════════════════════
// Directory
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(untagged)]
enum CaseFile {
    Many(Vec<TestCaseDocument>),
    One(Box<TestCaseDocument>),
}

/// JSON test cases under a directory.
#[derive(Clone)]
pub struct DirectoryCorpus {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl DirectoryCorpus {
    pub fn new(config: &CorpusConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    fn scan(&self) -> Result<Vec<TestCaseDocument>> {
        if !self.root.exists() {
            bail!("corpus root does not exist: {}", self.root.display());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(self.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }
            files.push(path.to_path_buf());
        }
        files.sort();

        let mut documents = Vec::new();
        for path in files {
            match load_file(&path) {
                Ok(mut docs) => {
                    for doc in &mut docs {
                        doc.ensure_id();
                    }
                    debug!(path = %path.display(), count = docs.len(), "loaded test cases");
                    documents.extend(docs);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = format!("{:#}", e), "skipping test case file")
                }
            }
        }
        Ok(documents)
    }
}

fn load_file(path: &Path) -> Result<Vec<TestCaseDocument>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: CaseFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(match parsed {
        CaseFile::Many(docs) => docs,
        CaseFile::One(doc) => vec![*doc],
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob {:?}", pattern))?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl CorpusStore for DirectoryCorpus {
    fn name(&self) -> &str {
        "directory"
    }

    async fn snapshot(&self) -> Result<CorpusSnapshot> {
        let scanner = self.clone();
        let documents = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .context("corpus scan task failed")??;
        Ok(CorpusSnapshot::new(documents))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════════════════

/// Mutable in-process corpus.
#[derive(Default)]
pub struct InMemoryCorpus {
    documents: RwLock<BTreeMap<String, TestCaseDocument>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: impl IntoIterator<Item = TestCaseDocument>) -> Self {
        let corpus = Self::new();
        for doc in documents {
            corpus.upsert(doc);
        }
        corpus
    }

    /// Insert or replace by id.
    pub fn upsert(&self, mut document: TestCaseDocument) {
        document.ensure_id();
        let mut docs = self
            .documents
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        docs.insert(document.id.clone(), document);
    }

    pub fn remove(&self, id: &str) -> Option<TestCaseDocument> {
        let mut docs = self
            .documents
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        docs.remove(id)
    }
}

#[async_trait]
impl CorpusStore for InMemoryCorpus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn snapshot(&self) -> Result<CorpusSnapshot> {
        let docs = self
            .documents
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(CorpusSnapshot::new(docs.values().cloned().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    fn config(root: &Path) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            ..CorpusConfig::default()
        }
    }

    #[tokio::test]
    async fn loads_single_and_array_files() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "a.json",
            r#"{"id": "TC-1", "title": "Login", "priority": "High",
                "steps": [{"step_text": "Open app", "step_expected": "Login shown"}]}"#,
        );
        write(
            tmp.path(),
            "nested/b.json",
            r#"[{"id": "TC-3", "title": "Logout"}, {"id": "TC-2", "title": "Signup"}]"#,
        );
        write(tmp.path(), "notes.txt", "not a test case");

        let corpus = DirectoryCorpus::new(&config(tmp.path())).unwrap();
        let snap = corpus.snapshot().await.unwrap();
        let ids: Vec<&str> = snap.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["TC-1", "TC-2", "TC-3"]);
    }

    #[tokio::test]
    async fn bad_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "good.json", r#"{"id": "TC-1", "title": "Login"}"#);
        write(tmp.path(), "bad.json", "{ not json");

        let corpus = DirectoryCorpus::new(&config(tmp.path())).unwrap();
        assert_eq!(corpus.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_id_is_derived_from_title() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.json", r#"{"title": "Reset password"}"#);

        let corpus = DirectoryCorpus::new(&config(tmp.path())).unwrap();
        let first = corpus.snapshot().await.unwrap();
        let second = corpus.snapshot().await.unwrap();
        assert!(first.documents[0].id.starts_with("TC-"));
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[tokio::test]
    async fn description_fields_reach_the_index() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "regression.json",
            r#"{
                "id": "TC-40",
                "title": "Mobile regression",
                "description": "Verify push token rotation after relogin",
                "priority": "P2 - High",
                "preconditions": ["User has the app installed"],
                "steps": ["Open app"],
                "expected_result": "Notifications keep arriving",
                "tags": ["mobile"],
                "created_by": "qa"
            }"#,
        );

        let corpus = DirectoryCorpus::new(&config(tmp.path())).unwrap();
        let snap = corpus.snapshot().await.unwrap();
        let index = crate::index::KeywordIndex::build(&snap.documents);
        let hits = index.match_terms(&crate::keywords::extract_terms("push token rotation"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].test_case_id, "TC-40");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exclude_globs_apply() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "keep.json", r#"{"id": "TC-1", "title": "Keep"}"#);
        write(tmp.path(), "drafts/skip.json", r#"{"id": "TC-2", "title": "Skip"}"#);

        let mut cfg = config(tmp.path());
        cfg.exclude_globs = vec!["drafts/**".to_string()];
        let corpus = DirectoryCorpus::new(&cfg).unwrap();
        assert_eq!(corpus.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let corpus = DirectoryCorpus::new(&config(&tmp.path().join("nope"))).unwrap();
        assert!(corpus.snapshot().await.is_err());
    }

    #[tokio::test]
    async fn in_memory_edits_change_fingerprint() {
        let corpus = InMemoryCorpus::with_documents(vec![
            TestCaseDocument::new("A", "Push token", "High"),
            TestCaseDocument::new("B", "Cancellation window", "Medium"),
        ]);
        let before = corpus.snapshot().await.unwrap().fingerprint;

        corpus.upsert(TestCaseDocument::new("B", "Cancellation window v2", "Medium"));
        let edited = corpus.snapshot().await.unwrap().fingerprint;
        assert_ne!(before, edited);

        corpus.remove("B");
        let snap = corpus.snapshot().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_ne!(snap.fingerprint, edited);
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let snap = CorpusSnapshot::new(vec![
            TestCaseDocument::new("A", "first", "High"),
            TestCaseDocument::new("A", "second", "High"),
        ]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.documents[0].title, "first");
    }
}
