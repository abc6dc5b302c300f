use anyhow::Result;

use crate::engine::MemoryEngine;

/// Display memory statistics in the terminal.
pub fn stats(engine: &MemoryEngine, json: bool) -> Result<()> {
    let response = engine.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    let layout = engine.roots().layout()?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    print!("{}", crate::memory::stats::render(&response, &layout));
    Ok(())
}
