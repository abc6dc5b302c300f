//! Long-term tier: project facts, knowledge and decisions.
//!
//! The only tier with embeddings. Creating or editing a record asks the
//! embedding gateway for a vector and stores it in the record's scope; a
//! failed call leaves the record in the gateway's offline queue and the next
//! [`LongTermMemory::embed_pending`] pass picks it up.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::roots::Roots;
use super::tier::{bullet, render_section, MemoryPatch, NewMemory, Section, TierManager, TierStore};
use super::types::{Category, Memory, Scope, Status, Tier};
use crate::embedding::{EmbedItem, EmbedOutcome, EmbeddingGateway};
use crate::error::{Error, Result};

/// Outcome of [`LongTermMemory::archive_inactive`].
#[derive(Debug, Default, Serialize)]
pub struct ArchiveReport {
    pub archived: Vec<String>,
    pub errors: Vec<String>,
}

/// Outcome of [`LongTermMemory::embed_pending`].
#[derive(Debug, Default, Serialize)]
pub struct EmbedReport {
    pub stored: usize,
    pub cached: usize,
    pub queued: usize,
    pub errors: Vec<String>,
}

pub struct LongTermMemory {
    store: TierStore,
    gateway: Option<Arc<EmbeddingGateway>>,
}

/// Text embedded for a memory.
pub fn embed_text(memory: &Memory) -> String {
    if memory.title.is_empty() {
        memory.content.clone()
    } else {
        format!("{}\n{}", memory.title, memory.content)
    }
}

pub fn embed_item(memory: &Memory) -> EmbedItem {
    EmbedItem {
        id: memory.id.clone(),
        scope: memory.scope,
        text: embed_text(memory),
        content_hash: memory.content_hash.clone(),
    }
}

impl LongTermMemory {
    pub fn new(roots: Arc<Roots>, gateway: Option<Arc<EmbeddingGateway>>) -> Self {
        Self {
            store: TierStore::new(Tier::LongTerm, roots),
            gateway,
        }
    }

    pub fn gateway(&self) -> Option<&Arc<EmbeddingGateway>> {
        self.gateway.as_ref()
    }

    /// Create the record, then embed it. Embedding trouble never fails the add:
    /// the record is on disk and its vector is queued.
    pub async fn add(&self, new: NewMemory, cancel: &CancellationToken) -> Result<Memory> {
        let memory = self.store.create(new)?;
        self.embed_one(&memory, cancel).await;
        Ok(memory)
    }

    pub async fn add_project(&self, title: &str, content: &str, cancel: &CancellationToken) -> Result<Memory> {
        self.add(
            NewMemory::new(Category::Project, title, content).scope(self.store.roots().default_scope()),
            cancel,
        )
        .await
    }

    pub async fn add_knowledge(
        &self,
        title: &str,
        content: &str,
        tags: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Memory> {
        self.add(NewMemory::new(Category::Knowledge, title, content).tags(tags), cancel)
            .await
    }

    pub async fn add_decision(
        &self,
        title: &str,
        content: &str,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> Result<Memory> {
        self.add(
            NewMemory::new(Category::Decision, title, content).scope(scope).importance(4),
            cancel,
        )
        .await
    }

    /// Update and re-embed when the content changed.
    pub async fn update_and_embed(&self, id: &str, patch: MemoryPatch, cancel: &CancellationToken) -> Result<Memory> {
        let before = self.store.find_by_id(id)?;
        let after = self.store.update(id, patch)?;
        if after.content_hash != before.content_hash || after.title != before.title {
            if let Some(gateway) = &self.gateway {
                gateway.invalidate(id);
            }
            self.embed_one(&after, cancel).await;
        }
        Ok(after)
    }

    async fn embed_one(&self, memory: &Memory, cancel: &CancellationToken) {
        let Some(gateway) = &self.gateway else {
            return;
        };
        match gateway.embed_items(vec![embed_item(memory)], cancel).await {
            Ok(outcome) => {
                let report = self.store_vectors(outcome);
                for e in report.errors {
                    warn!(id = %memory.id, error = %e, "vector store failed");
                }
            }
            Err(e) => warn!(id = %memory.id, error = %e, "embedding deferred to offline queue"),
        }
    }

    /// Write embedded vectors into their scope's vector store.
    pub fn store_vectors(&self, outcome: EmbedOutcome) -> EmbedReport {
        let mut report = EmbedReport {
            cached: outcome.cached,
            queued: outcome.queued.len(),
            errors: outcome.errors,
            ..EmbedReport::default()
        };
        for (item, vector) in outcome.embedded {
            let result = self
                .store
                .roots()
                .stores(item.scope)
                .and_then(|stores| stores.vectors.upsert(&item.id, &vector));
            match result {
                Ok(()) => report.stored += 1,
                Err(e) => report.errors.push(format!("{}: {e}", item.id)),
            }
        }
        report
    }

    /// Link two long-term memories in both directions.
    pub fn link(&self, a: &str, b: &str) -> Result<()> {
        if a == b {
            return Err(Error::invalid("link_memories", "cannot link a memory to itself"));
        }
        let mut left = self.store.find_by_id(a)?;
        let mut right = self.store.find_by_id(b)?;
        if !left.related.iter().any(|r| r == b) {
            left.related.push(b.to_string());
            self.store.save(&mut left)?;
        }
        if !right.related.iter().any(|r| r == a) {
            right.related.push(a.to_string());
            self.store.save(&mut right)?;
        }
        debug!(a, b, "memories linked");
        Ok(())
    }

    /// Remove the link in both directions. Missing links are ignored.
    pub fn unlink(&self, a: &str, b: &str) -> Result<()> {
        for (id, other) in [(a, b), (b, a)] {
            let mut memory = self.store.find_by_id(id)?;
            let before = memory.related.len();
            memory.related.retain(|r| r != other);
            if memory.related.len() != before {
                self.store.save(&mut memory)?;
            }
        }
        Ok(())
    }

    /// Resolvable related memories. Dangling ids are skipped.
    pub fn related(&self, id: &str) -> Result<Vec<Memory>> {
        let memory = self.store.find_by_id(id)?;
        let mut out = Vec::new();
        for rel in &memory.related {
            match self.store.find_by_id(rel) {
                Ok(m) => out.push(m),
                Err(e) if e.is_not_found() => debug!(id, related = %rel, "dangling relation"),
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Active records not accessed (or, if never accessed, not created) in `days`.
    pub fn inactive(&self, days: i64) -> Result<Vec<Memory>> {
        let cutoff = Utc::now() - Duration::days(days);
        Ok(self
            .store
            .load_active()?
            .into_iter()
            .filter(|m| m.accessed_at.unwrap_or(m.created_at) < cutoff)
            .collect())
    }

    pub fn archive_inactive(&self, days: i64) -> Result<ArchiveReport> {
        let mut report = ArchiveReport::default();
        for mut memory in self.inactive(days)? {
            match self.store.archive_memory(&mut memory, Status::Archived) {
                Ok(()) => report.archived.push(memory.id),
                Err(e) => {
                    warn!(id = %memory.id, error = %e, "failed to archive inactive memory");
                    report.errors.push(format!("{}: {e}", memory.id));
                }
            }
        }
        if !report.archived.is_empty() {
            info!(count = report.archived.len(), days, "archived inactive long-term memories");
        }
        Ok(report)
    }

    pub fn high_importance(&self, min: u8) -> Result<Vec<Memory>> {
        Ok(self
            .store
            .load_active()?
            .into_iter()
            .filter(|m| m.importance >= min)
            .collect())
    }

    /// Queue re-embedding for records edited outside this manager.
    pub fn requeue(&self, ids: &[String]) -> Result<usize> {
        let Some(gateway) = &self.gateway else {
            return Ok(0);
        };
        let mut queued = 0;
        for id in ids {
            let memory = match self.store.find_by_id(id) {
                Ok(memory) => memory,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            gateway.invalidate(id);
            gateway.enqueue(embed_item(&memory))?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Embed active records that have no vector yet, then retry the offline
    /// queue. Without a gateway this is a no-op.
    pub async fn embed_pending(&self, cancel: &CancellationToken) -> Result<EmbedReport> {
        let Some(gateway) = &self.gateway else {
            return Ok(EmbedReport::default());
        };
        let queued: HashSet<String> = gateway.pending_ids().into_iter().collect();
        let mut missing = Vec::new();
        for memory in self.store.load_active()? {
            if queued.contains(&memory.id) {
                continue;
            }
            let stores = self.store.roots().stores(memory.scope)?;
            if stores.vectors.get(&memory.id)?.is_none() {
                missing.push(embed_item(&memory));
            }
        }

        let mut report = EmbedReport::default();
        if !missing.is_empty() {
            debug!(count = missing.len(), "embedding memories without vectors");
            let first = self.store_vectors(gateway.embed_items(missing, cancel).await?);
            merge(&mut report, first);
        }
        let drained = self.store_vectors(gateway.drain_queue(cancel).await?);
        merge(&mut report, drained);
        report.queued = gateway.pending();
        Ok(report)
    }
}

fn merge(into: &mut EmbedReport, from: EmbedReport) {
    into.stored += from.stored;
    into.cached += from.cached;
    into.errors.extend(from.errors);
}

impl TierManager for LongTermMemory {
    fn store(&self) -> &TierStore {
        &self.store
    }

    /// When the title or content changes, the stale vector row is deleted and
    /// the record queued so the next embedding pass stores a fresh one.
    fn update(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        let before = embed_text(&self.store.find_by_id(id)?);
        let memory = self.store.update(id, patch)?;
        if embed_text(&memory) != before {
            self.store.roots().stores(memory.scope)?.vectors.delete(id)?;
            if let Some(gateway) = &self.gateway {
                gateway.invalidate(id);
                gateway.enqueue(embed_item(&memory))?;
            }
        }
        Ok(memory)
    }

    fn delete(&self, id: &str) -> Result<Memory> {
        let memory = self.store.delete(id)?;
        if let Some(gateway) = &self.gateway {
            gateway.invalidate(id);
        }
        Ok(memory)
    }

    fn build_context(&self, max_tokens: usize) -> Result<Section> {
        let active = self.store.load_active()?;
        Ok(render_section("Long-Term Memory", &active, max_tokens, bullet))
    }
}
