use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use super::core::CoreMemory;
use super::roots::Roots;
use super::session::{session_files, SessionManager};
use super::types::{Scope, Tier};
use crate::embedding::gateway::EmbeddingGateway;
use crate::error::Result;
use crate::storage::StorageLayout;

/// Response from memory_stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Active records per tier, summed over every open root.
    pub by_tier: BTreeMap<String, usize>,
    pub roots: Vec<RootStats>,
    pub session_files: usize,
    pub core_tokens: usize,
    pub core_limit_tokens: usize,
    pub core_usage_ratio: f64,
    pub session_tokens: usize,
    pub session_usage_ratio: f64,
    pub pending_embeddings: usize,
}

#[derive(Debug, Serialize)]
pub struct RootStats {
    pub scope: Scope,
    pub active_by_tier: BTreeMap<String, usize>,
    pub index_rows: usize,
    pub vector_rows: usize,
    pub fts: bool,
    pub index_size_bytes: u64,
    pub vector_size_bytes: u64,
}

/// Compute a statistics snapshot across the global and (if set) project roots.
///
/// Counts come from the metadata index; session transcripts are not indexed,
/// so they are counted from disk.
pub fn memory_stats(
    roots: &Roots,
    core: &CoreMemory,
    session: &SessionManager,
    gateway: Option<&EmbeddingGateway>,
    core_limit_tokens: usize,
) -> Result<StatsResponse> {
    let layout = roots.layout()?;
    let mut by_tier: BTreeMap<String, usize> =
        Tier::ALL.iter().map(|t| (t.as_str().to_string(), 0)).collect();
    let mut root_stats = Vec::new();
    let mut session_count = 0;

    for (scope, stores) in roots.all_stores()? {
        let mut active_by_tier = BTreeMap::new();
        for (tier, count) in stores.index.count_by_tier()? {
            *by_tier.entry(tier.as_str().to_string()).or_insert(0) += count;
            active_by_tier.insert(tier.as_str().to_string(), count);
        }
        session_count += session_files(&layout.sessions_dir(scope)?).len();
        root_stats.push(RootStats {
            scope,
            active_by_tier,
            index_rows: stores.index.count()?,
            vector_rows: stores.vectors.count()?,
            fts: stores.index.has_fts(),
            index_size_bytes: file_size(&layout.index_db_path(scope)?),
            vector_size_bytes: file_size(&layout.vector_db_path(scope)?),
        });
    }
    *by_tier.entry(Tier::Session.as_str().to_string()).or_insert(0) += session_count;

    let core_tokens = core.total_tokens()?;
    let session_tokens = session.current()?.map(|s| s.token_count).unwrap_or(0);

    Ok(StatsResponse {
        by_tier,
        roots: root_stats,
        session_files: session_count,
        core_tokens,
        core_limit_tokens,
        core_usage_ratio: ratio(core_tokens, core_limit_tokens),
        session_tokens,
        session_usage_ratio: session.usage_ratio()?,
        pending_embeddings: gateway.map(EmbeddingGateway::pending).unwrap_or(0),
    })
}

/// In-memory stores have no file; report zero.
fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn ratio(used: usize, limit: usize) -> f64 {
    if limit == 0 {
        0.0
    } else {
        used as f64 / limit as f64
    }
}

/// Human-readable stats block for the admin binary.
pub fn render(stats: &StatsResponse, layout: &StorageLayout) -> String {
    let mut out = String::new();
    out.push_str(&format!("global root: {}\n", layout.global_root().display()));
    if let Some(project) = layout.project_data_root() {
        out.push_str(&format!("project root: {}\n", project.display()));
    }
    out.push_str("\nactive memories\n");
    for (tier, count) in &stats.by_tier {
        out.push_str(&format!("  {tier:<12}{count}\n"));
    }
    for root in &stats.roots {
        out.push_str(&format!(
            "\n{} index: {} rows ({} bytes, fts {}), vectors: {} rows ({} bytes)\n",
            root.scope.as_str(),
            root.index_rows,
            root.index_size_bytes,
            if root.fts { "on" } else { "off" },
            root.vector_rows,
            root.vector_size_bytes,
        ));
    }
    out.push_str(&format!(
        "\ncore tokens: {}/{} ({:.0}%)\nsession tokens: {} ({:.0}%)\npending embeddings: {}\n",
        stats.core_tokens,
        stats.core_limit_tokens,
        stats.core_usage_ratio * 100.0,
        stats.session_tokens,
        stats.session_usage_ratio * 100.0,
        stats.pending_embeddings,
    ));
    out
}
