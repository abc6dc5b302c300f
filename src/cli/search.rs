use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::engine::MemoryEngine;
use crate::memory::search::SearchOptions;

/// Run a hybrid search from the terminal.
pub async fn search(engine: &MemoryEngine, query: &str, limit: usize) -> Result<()> {
    let options = SearchOptions::default().top_k(limit);
    let hits = engine.search(query, &options, &CancellationToken::new()).await?;

    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let preview: String = hit.memory.content.chars().take(120).collect();
        let ellipsis = if hit.memory.content.chars().count() > 120 { "..." } else { "" };
        println!(
            "  {}. [{}/{}] {} (score: {:.4}, {:?})",
            i + 1,
            hit.memory.tier,
            hit.memory.category,
            hit.memory.title,
            hit.score,
            hit.source,
        );
        println!("     {preview}{ellipsis}");
        println!("     id: {}", hit.memory.id);
        println!();
    }
    Ok(())
}

/// Print the assembled context block, for a query or for a fresh session.
pub async fn context(engine: &MemoryEngine, query: Option<&str>) -> Result<()> {
    let built = match query {
        Some(q) => engine.build_context(q, &CancellationToken::new()).await?,
        None => engine.build_new_session_context()?,
    };
    println!("{}", built.text);
    eprintln!(
        "-- {} of {} tokens used across {} section(s)",
        built.tokens_used,
        built.budget.total,
        built.sections.len()
    );
    for warning in &built.warnings {
        eprintln!("-- warning: {warning}");
    }
    Ok(())
}
