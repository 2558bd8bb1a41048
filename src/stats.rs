//! Embedding cache statistics and reset.
//!
//! Backs `tcr cache stats` and `tcr cache reset`. Stats report what the
//! SQLite cache holds per model version and flag records left behind by a
//! model the current configuration no longer uses.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate;
use crate::retriever::Retriever;
use crate::sqlite_store::SqliteVectorStore;
use crate::store::{ModelVersionStats, VectorStore};

/// Snapshot of the persistent cache.
#[derive(Debug, Serialize)]
pub struct CacheReport {
    pub database: String,
    pub size_bytes: u64,
    pub current_model_version: String,
    pub total_records: i64,
    /// Records that the configured model will never read.
    pub stale_records: i64,
    pub by_model_version: Vec<ModelVersionStats>,
}

pub async fn collect_cache_report(config: &Config) -> Result<CacheReport> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteVectorStore::new(pool.clone());
    let by_model_version = store.stats().await?;
    pool.close().await;

    let current_model_version = create_provider(&config.embedding)?.model_version();
    let total_records = by_model_version.iter().map(|s| s.records).sum();
    let stale_records = by_model_version
        .iter()
        .filter(|s| s.model_version != current_model_version)
        .map(|s| s.records)
        .sum();
    let size_bytes = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(CacheReport {
        database: config.db.path.display().to_string(),
        size_bytes,
        current_model_version,
        total_records,
        stale_records,
        by_model_version,
    })
}

/// Print the cache report.
pub async fn run_cache_stats(config: &Config, json: bool) -> Result<()> {
    let report = collect_cache_report(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Embedding cache");
    println!("===============");
    println!();
    println!("  Database:    {}", report.database);
    println!("  Size:        {}", format_bytes(report.size_bytes));
    println!("  Model:       {}", report.current_model_version);
    println!("  Records:     {}", report.total_records);
    println!("  Stale:       {}", report.stale_records);

    if !report.by_model_version.is_empty() {
        println!();
        println!("  {:<48} {:>8} {:>6}", "MODEL VERSION", "RECORDS", "DIMS");
        println!("  {}", "-".repeat(64));
        for s in &report.by_model_version {
            let marker = if s.model_version == report.current_model_version {
                " *"
            } else {
                ""
            };
            println!(
                "  {:<48} {:>8} {:>6}{}",
                s.model_version, s.records, s.dims, marker
            );
        }
    }
    println!();
    Ok(())
}

/// Clear every cached embedding.
pub async fn run_cache_reset(config: &Config) -> Result<()> {
    let before = collect_cache_report(config).await?.total_records;
    let retriever = Retriever::from_config(config).await?;
    retriever.reset_cache().await?;

    println!("cache reset");
    println!("  records removed: {}", before);
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddingRecord;
    use tempfile::TempDir;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[tokio::test]
    async fn report_flags_other_model_versions() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("cache.sqlite");
        config.embedding.provider = "hash".to_string();
        config.embedding.dims = Some(4);

        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        let store = SqliteVectorStore::new(pool.clone());
        for (hash, version) in [
            ("h1", "hash:feature-hash-v1:4"),
            ("h2", "hash:feature-hash-v1:4"),
            ("h3", "openai:old-model:4"),
        ] {
            store
                .save(&EmbeddingRecord {
                    content_hash: hash.to_string(),
                    vector: vec![0.5; 4],
                    model_version: version.to_string(),
                })
                .await
                .unwrap();
        }
        pool.close().await;

        let report = collect_cache_report(&config).await.unwrap();
        assert_eq!(report.current_model_version, "hash:feature-hash-v1:4");
        assert_eq!(report.total_records, 3);
        assert_eq!(report.stale_records, 1);
    }
}
