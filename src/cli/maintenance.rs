//! CLI maintenance commands: `maintain`, `sync` and `check`.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::engine::MemoryEngine;

/// Run one full lifecycle pass in the foreground.
pub async fn maintain(engine: &MemoryEngine) -> Result<()> {
    println!("Running maintenance...");
    let report = engine.maintain(&CancellationToken::new()).await;

    println!("  Expired short-term:    {}", report.expired);
    println!("  Archived long-term:    {}", report.archived);
    println!("  Promoted:              {}", report.promoted.len());
    for (from, to) in &report.promoted {
        println!("    {from} -> {to}");
    }
    if let Some(sync) = &report.sync {
        println!(
            "  Index sync:            {} created, {} updated, {} deleted",
            sync.created, sync.updated, sync.deleted
        );
    }
    println!("  Embedded:              {}", report.embedded);
    print_errors(&report.errors);
    println!("Maintenance complete in {} ms.", report.duration_ms);
    Ok(())
}

pub fn sync(engine: &MemoryEngine, reindex: bool) -> Result<()> {
    let report = if reindex {
        println!("Rebuilding index from documents...");
        engine.reindex()?
    } else {
        println!("Syncing index with documents...");
        engine.sync()?
    };
    println!("  Created:   {}", report.created);
    println!("  Updated:   {}", report.updated);
    println!("  Deleted:   {}", report.deleted);
    println!("  Unchanged: {}", report.skipped);
    print_errors(&report.errors);
    Ok(())
}

/// Read-only consistency audit. Exits non-zero when drift is found.
pub fn check(engine: &MemoryEngine) -> Result<()> {
    let report = engine.check()?;

    println!("Consistency Report");
    println!("==================");
    println!("Orphaned files:        {}", report.orphaned_files.len());
    for path in &report.orphaned_files {
        println!("  {}", path.display());
    }
    println!("Orphaned index rows:   {}", report.orphaned_index.len());
    for id in &report.orphaned_index {
        println!("  {id}");
    }
    println!("Hash mismatches:       {}", report.hash_mismatches.len());
    for id in &report.hash_mismatches {
        println!("  {id}");
    }
    print_errors(&report.errors);

    if report.is_consistent() {
        println!("\nStatus: OK");
        Ok(())
    } else {
        println!("\nRun `strata sync` to repair.");
        anyhow::bail!("index and documents disagree")
    }
}

fn print_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    println!("  Errors ({}):", errors.len());
    for e in errors {
        println!("    {e}");
    }
}
