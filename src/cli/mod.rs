//! Admin subcommands for the `strata` binary.

pub mod maintenance;
pub mod search;
pub mod stats;

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::StrataConfig;
use crate::engine::{EngineOptions, MemoryEngine};

/// Open the engine for a one-shot command: startup sync, no background task.
pub async fn open_engine(config: StrataConfig, project: Option<PathBuf>) -> Result<MemoryEngine> {
    let project_root = match project {
        Some(dir) => {
            let dir = std::fs::canonicalize(&dir)
                .with_context(|| format!("project directory not found: {}", dir.display()))?;
            Some(crate::storage::detect_project_root(&dir, &config.storage.project_markers))
        }
        None => None,
    };
    let engine = MemoryEngine::initialize(
        config,
        EngineOptions {
            project_root,
            background: false,
            ..EngineOptions::default()
        },
    )
    .await
    .context("failed to open memory roots")?;
    Ok(engine)
}
