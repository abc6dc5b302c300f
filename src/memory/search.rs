use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::roots::{Roots, ScopeStores};
use super::tier::overlay_access;
use super::types::{Memory, Scope, Tier};
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::{ErrorKind, Result};
use crate::index::{keywords, IndexFilter, IndexRow};
use crate::storage::FileStore;

// ── Public types ──────────────────────────────────────────────────────────────

/// Retrieval knobs for one query.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Empty means every indexed tier.
    pub tiers: Vec<Tier>,
    pub scope: Option<Scope>,
    /// Floor on the pre-weighting score; the configured minimum when unset.
    pub min_score: Option<f64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            tiers: Vec::new(),
            scope: None,
            min_score: None,
        }
    }
}

impl SearchOptions {
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn tiers(mut self, tiers: Vec<Tier>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn scope(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }
}

/// Which search produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Vector,
    Keyword,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub memory: Memory,
    /// Final score after recency, importance and access weighting.
    pub score: f64,
    /// Best raw similarity across sources.
    pub base_score: f64,
    pub source: HitSource,
}

struct Candidate {
    scope: Scope,
    row: IndexRow,
    keyword: bool,
    vector: Option<f64>,
    /// Document already read while gathering candidates.
    loaded: Option<Memory>,
}

// ── Retriever ─────────────────────────────────────────────────────────────────

pub struct Retriever {
    roots: Arc<Roots>,
    gateway: Option<Arc<EmbeddingGateway>>,
    config: RetrievalConfig,
    files: FileStore,
}

impl Retriever {
    pub fn new(roots: Arc<Roots>, gateway: Option<Arc<EmbeddingGateway>>, config: RetrievalConfig) -> Self {
        Self {
            roots,
            gateway,
            config,
            files: FileStore::new(),
        }
    }

    /// Hybrid search: keyword + vector → merge by id → filter → weight → rank → track.
    pub async fn search(&self, query: &str, options: &SearchOptions, cancel: &CancellationToken) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || options.top_k == 0 {
            return Ok(Vec::new());
        }
        let terms = keywords(query);
        let now = Utc::now();

        // 1. Query embedding. Failure degrades to keyword-only.
        let query_vector = match &self.gateway {
            Some(gateway) => match gateway.embed_query(query, cancel).await {
                Ok(v) => Some(v),
                Err(e) if e.kind == ErrorKind::Cancelled => return Err(e),
                Err(e) => {
                    warn!(error = %e, "query embedding failed, keyword search only");
                    None
                }
            },
            None => None,
        };

        // 2. Fan out to every in-scope root and merge by id.
        let filter = IndexFilter {
            tier: match options.tiers.as_slice() {
                [only] => Some(*only),
                _ => None,
            },
            ..IndexFilter::default().active()
        };
        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        for (scope, stores) in self.roots.all_stores()? {
            if options.scope.is_some_and(|s| s != scope) {
                continue;
            }
            self.keyword_candidates(query, &terms, &filter, scope, &stores, &mut candidates)?;
            if let Some(qv) = &query_vector {
                self.vector_candidates(qv, scope, &stores, &mut candidates)?;
            }
        }
        debug!(query, candidates = candidates.len(), "retrieval candidates gathered");

        // 3. Filter, hydrate, score.
        let floor = options.min_score.unwrap_or(self.config.min_similarity);
        let mut hits = Vec::new();
        for candidate in candidates.into_values() {
            if !self.admits(&candidate.row, candidate.scope, options, now) {
                continue;
            }
            let loaded = match candidate.loaded {
                Some(m) => Ok(m),
                None => self.files.load_memory(&candidate.row.file_path),
            };
            let mut memory = match loaded {
                Ok(m) => m,
                Err(e) => {
                    warn!(id = %candidate.row.id, error = %e, "skipping unreadable search hit");
                    continue;
                }
            };
            overlay_access(&mut memory, &candidate.row);
            if !memory.is_active(now) || options.scope.is_some_and(|s| memory.scope != s) {
                continue;
            }

            let keyword = candidate
                .keyword
                .then(|| keyword_score(&memory, query, &terms))
                .filter(|s| *s > 0.0);
            let (base, source) = match (keyword, candidate.vector) {
                (Some(k), Some(v)) => (k.max(v), HitSource::Hybrid),
                (Some(k), None) => (k, HitSource::Keyword),
                (None, Some(v)) => (v, HitSource::Vector),
                (None, None) => continue,
            };
            if base < floor {
                continue;
            }
            let score = weighted_score(base, &memory, now, self.config.half_life_days);
            hits.push(SearchHit {
                memory,
                score,
                base_score: base,
                source,
            });
        }

        // 4. Rank and truncate.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(options.top_k);

        // 5. Access tracking.
        for hit in &mut hits {
            let bumped = self
                .roots
                .stores(hit.memory.scope)
                .and_then(|stores| stores.index.record_access(&hit.memory.id, now));
            match bumped {
                Ok(()) => {
                    hit.memory.access_count += 1;
                    hit.memory.accessed_at = Some(now);
                }
                Err(e) => warn!(id = %hit.memory.id, error = %e, "failed to record access"),
            }
        }
        Ok(hits)
    }

    /// Bare memories for the top `top_k` hits.
    pub async fn quick_search(&self, query: &str, top_k: usize, cancel: &CancellationToken) -> Result<Vec<Memory>> {
        let options = SearchOptions::default().top_k(top_k);
        Ok(self
            .search(query, &options, cancel)
            .await?
            .into_iter()
            .map(|hit| hit.memory)
            .collect())
    }

    fn keyword_candidates(
        &self,
        query: &str,
        terms: &[String],
        filter: &IndexFilter,
        scope: Scope,
        stores: &ScopeStores,
        out: &mut HashMap<String, Candidate>,
    ) -> Result<()> {
        let limit = self.config.keyword_top_k;
        let mut rows: Vec<(IndexRow, Option<Memory>)> = stores
            .index
            .search(query, filter, limit)?
            .into_iter()
            .map(|row| (row, None))
            .collect();
        // Bodies are not indexed. Score the remaining rows on content and fill
        // the per-source limit with the best of them.
        if rows.len() < limit && !terms.is_empty() {
            let mut scored = Vec::new();
            for row in stores.index.query(filter)? {
                if rows.iter().any(|(r, _)| r.id == row.id) {
                    continue;
                }
                let memory = match self.files.load_memory(&row.file_path) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(id = %row.id, error = %e, "skipping unreadable document");
                        continue;
                    }
                };
                let score = keyword_score(&memory, query, terms);
                if score > 0.0 {
                    scored.push((score, row, memory));
                }
            }
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored.truncate(limit - rows.len());
            rows.extend(scored.into_iter().map(|(_, row, memory)| (row, Some(memory))));
        }
        for (row, loaded) in rows {
            out.entry(row.id.clone())
                .and_modify(|c| c.keyword = true)
                .or_insert(Candidate {
                    scope,
                    row,
                    keyword: true,
                    vector: None,
                    loaded,
                });
        }
        Ok(())
    }

    fn vector_candidates(
        &self,
        query_vector: &[f32],
        scope: Scope,
        stores: &ScopeStores,
        out: &mut HashMap<String, Candidate>,
    ) -> Result<()> {
        let hits = stores.vectors.search(
            query_vector,
            self.config.vector_top_k,
            self.config.min_similarity as f32,
        )?;
        for (id, similarity) in hits {
            let similarity = f64::from(similarity);
            if let Some(existing) = out.get_mut(&id) {
                existing.vector = Some(existing.vector.map_or(similarity, |v| v.max(similarity)));
                continue;
            }
            match stores.index.get(&id)? {
                Some(row) => {
                    out.insert(
                        id,
                        Candidate {
                            scope,
                            row,
                            keyword: false,
                            vector: Some(similarity),
                            loaded: None,
                        },
                    );
                }
                None => debug!(id = %id, "vector without index row"),
            }
        }
        Ok(())
    }

    fn admits(&self, row: &IndexRow, scope: Scope, options: &SearchOptions, now: DateTime<Utc>) -> bool {
        if !row.is_active(now) || row.tier == Tier::Session {
            return false;
        }
        if !options.tiers.is_empty() && !options.tiers.contains(&row.tier) {
            return false;
        }
        options.scope.is_none_or(|s| s == scope && row.scope == s)
    }
}

// ── Scoring ───────────────────────────────────────────────────────────────────

/// Weighted keyword relevance in `[0, 1]`: whole-query title and content
/// substring, tag hits and the fraction of terms found anywhere.
pub fn keyword_score(memory: &Memory, query: &str, terms: &[String]) -> f64 {
    let query = query.to_lowercase();
    let title = memory.title.to_lowercase();
    let content = memory.content.to_lowercase();
    let tags: Vec<String> = memory.tags.iter().map(|t| t.to_lowercase()).collect();

    let mut score = 0.0;
    if !query.is_empty() && title.contains(&query) {
        score += 0.3;
    }
    if !query.is_empty() && content.contains(&query) {
        score += 0.2;
    }
    if terms.iter().any(|t| tags.contains(t)) {
        score += 0.2;
    }
    if !terms.is_empty() {
        let found = terms
            .iter()
            .filter(|t| title.contains(t.as_str()) || content.contains(t.as_str()) || tags.contains(t))
            .count();
        score += 0.5 * found as f64 / terms.len() as f64;
    }
    score.min(1.0)
}

/// `base` × recency × importance × access boost.
///
/// Recency halves every `half_life_days` since the memory was last touched and
/// only ever removes up to half the score. Importance maps 1..=5 onto
/// 0.8..=1.0. Access adds `0.1 · ln(1 + count)`.
pub fn weighted_score(base: f64, memory: &Memory, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let last = memory.accessed_at.map_or(memory.updated_at, |a| a.max(memory.updated_at));
    let age_days = (now - last).num_seconds().max(0) as f64 / 86_400.0;
    let decay = if half_life_days > 0.0 {
        (-std::f64::consts::LN_2 * age_days / half_life_days).exp()
    } else {
        1.0
    };
    let importance = 0.8 + 0.05 * (f64::from(memory.importance.clamp(1, 5)) - 1.0);
    let access = 1.0 + 0.1 * (1.0 + f64::from(memory.access_count)).ln();
    base * (0.5 + 0.5 * decay) * importance * access
}
