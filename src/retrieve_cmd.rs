//! `tcr index` and `tcr retrieve`.

use anyhow::Result;

use crate::config::Config;
use crate::models::{ChangeRequestQuery, ChangeType, RetrievalNote, RetrievalOutcome};
use crate::retriever::Retriever;

/// Rebuild the keyword index from the configured corpus and warm the cache.
pub async fn run_index(config: &Config, json: bool) -> Result<()> {
    let retriever = Retriever::from_config(config).await?;
    let summary = retriever.refresh().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("index");
    println!("  corpus: {}", config.corpus.root.display());
    println!("  documents: {}", summary.documents);
    println!("  terms: {}", summary.terms);
    println!("  fingerprint: {}", &summary.fingerprint[..12]);
    println!("  built: {}", summary.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if config.embedding.is_enabled() {
        println!("  embedded: {}", summary.embedded);
        println!("  failed: {}", summary.embed_failures);
    } else {
        println!("  embeddings: disabled");
    }
    Ok(())
}

/// Rank the corpus against `text` and print the result.
pub async fn run_retrieve(
    config: &Config,
    text: &str,
    change_type: ChangeType,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let retriever = Retriever::from_config(config).await?;
    let top_k = top_k.unwrap_or_else(|| config.retrieval.top_k_for(change_type));
    let query = ChangeRequestQuery::new(text, change_type);
    let outcome = retriever.retrieve(&query, top_k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &RetrievalOutcome) {
    for note in &outcome.notes {
        println!("note: {}", describe(note));
    }
    if !outcome.notes.is_empty() {
        println!();
    }

    if outcome.matches.is_empty() {
        println!("No results.");
        return;
    }

    for m in &outcome.matches {
        println!("{}. [{:.2}] {} / {}", m.rank, m.combined_score, m.test_case_id, m.title);
        println!(
            "    keyword: {:.2}  semantic: {:.2}  priority: {:.2}",
            m.keyword_score, m.semantic_score, m.priority_weight
        );
        println!();
    }
}

fn describe(note: &RetrievalNote) -> String {
    match note {
        RetrievalNote::SemanticDegraded { reason } => {
            format!("semantic signal unavailable ({}), ranked on keyword + priority", reason)
        }
        RetrievalNote::EmptyQuery => "query has no searchable terms".to_string(),
        RetrievalNote::InvalidPriority {
            test_case_id,
            value,
        } => format!("{} excluded: unknown priority {:?}", test_case_id, value),
    }
}
