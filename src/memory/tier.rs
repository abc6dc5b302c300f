//! File-plus-index CRUD shared by the core, short-term and long-term managers.
//!
//! Writes go to the document first, then to the index. An index failure after
//! a successful file write is logged, not returned: the row is derived data and
//! the next sync recreates it. Access statistics are tracked in the index and
//! overlaid onto documents when they are loaded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::roots::Roots;
use super::types::{estimate_tokens, Category, Memory, Scope, Status, Tier};
use crate::error::{Error, Result};
use crate::index::{IndexFilter, IndexRow};
use crate::storage::{content_hash, FileStore};

/// Input for creating a memory.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub category: Category,
    pub scope: Scope,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub related: Vec<String>,
    pub importance: u8,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(category: Category, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            category,
            scope: Scope::Global,
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            related: Vec::new(),
            importance: 3,
            expires_at: None,
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn importance(mut self, importance: u8) -> Self {
        self.importance = importance;
        self
    }

    pub fn expires_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = at;
        self
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub related: Option<Vec<String>>,
    pub importance: Option<u8>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

pub struct TierStore {
    tier: Tier,
    roots: Arc<Roots>,
    files: FileStore,
}

impl TierStore {
    pub fn new(tier: Tier, roots: Arc<Roots>) -> Self {
        Self {
            tier,
            roots,
            files: FileStore::new(),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn roots(&self) -> &Arc<Roots> {
        &self.roots
    }

    /// Core memories always live in the global root.
    fn scopes(&self) -> Result<Vec<Scope>> {
        if self.tier == Tier::Core {
            Ok(vec![Scope::Global])
        } else {
            self.roots.scopes()
        }
    }

    pub fn create(&self, new: NewMemory) -> Result<Memory> {
        if new.category.tier() != self.tier {
            return Err(Error::invalid(
                "create_memory",
                format!("category {} does not belong to tier {}", new.category, self.tier),
            ));
        }
        let content = new.content.trim_end().to_string();
        if content.trim().is_empty() {
            return Err(Error::invalid("create_memory", "content is empty"));
        }

        let scope = if self.tier == Tier::Core { Scope::Global } else { new.scope };
        let layout = self.roots.layout()?;
        let dir = layout.dir_for(new.category, scope)?;
        let now = Utc::now();
        let id = Uuid::now_v7().to_string();

        let mut path = dir.join(layout.file_name(now, new.category.as_str(), &new.title, &id));
        if path.exists() {
            path = dir.join(layout.unique_file_name(now, new.category.as_str(), &new.title, &id));
        }

        let memory = Memory {
            id,
            tier: self.tier,
            scope,
            category: new.category,
            title: new.title.trim().to_string(),
            content_hash: content_hash(&content),
            content,
            tags: new.tags,
            related: new.related,
            project_path: match scope {
                Scope::Project => self.roots.project_path(),
                Scope::Global => None,
            },
            status: Status::Active,
            importance: new.importance.clamp(1, 5),
            access_count: 0,
            expires_at: new.expires_at.filter(|_| self.tier == Tier::ShortTerm),
            created_at: now,
            updated_at: now,
            accessed_at: None,
            file_path: path,
        };

        self.files.create_memory(&memory)?;
        self.index_row(&memory);
        debug!(id = %memory.id, tier = %self.tier, category = %memory.category, "memory created");
        Ok(memory)
    }

    /// Persist an edited memory: recompute the hash, bump `updated_at`, rewrite
    /// the document and refresh the index row.
    pub fn save(&self, memory: &mut Memory) -> Result<()> {
        memory.content = memory.content.trim_end().to_string();
        memory.content_hash = content_hash(&memory.content);
        memory.updated_at = Utc::now();
        self.files.update_memory(memory)?;
        self.index_row(memory);
        Ok(())
    }

    pub fn update(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        let mut memory = self.find_by_id(id)?;
        if let Some(title) = patch.title {
            memory.title = title;
        }
        if let Some(content) = patch.content {
            if content.trim().is_empty() {
                return Err(Error::invalid("update_memory", "content is empty"));
            }
            memory.content = content;
        }
        if let Some(tags) = patch.tags {
            memory.tags = tags;
        }
        if let Some(related) = patch.related {
            memory.related = related;
        }
        if let Some(importance) = patch.importance {
            memory.importance = importance.clamp(1, 5);
        }
        if let Some(expires_at) = patch.expires_at {
            memory.expires_at = expires_at.filter(|_| self.tier == Tier::ShortTerm);
        }
        self.save(&mut memory)?;
        Ok(memory)
    }

    /// Remove the document, its index row and its vector.
    pub fn delete(&self, id: &str) -> Result<Memory> {
        let memory = self.find_by_id(id)?;
        match self.files.delete(&memory.file_path) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let stores = self.roots.stores(memory.scope)?;
        stores.index.delete(&memory.id)?;
        stores.vectors.delete(&memory.id)?;
        debug!(id = %memory.id, "memory deleted");
        Ok(memory)
    }

    /// Flip status and move the document under `archive/<YYYY-MM>/<tier>/`.
    pub fn archive(&self, id: &str, status: Status) -> Result<Memory> {
        let mut memory = self.find_by_id(id)?;
        self.archive_memory(&mut memory, status)?;
        Ok(memory)
    }

    pub fn archive_memory(&self, memory: &mut Memory, status: Status) -> Result<()> {
        let layout = self.roots.layout()?;
        let dir = layout.archive_dir(memory.scope, self.tier, Utc::now())?;
        self.files.archive_memory(memory, &dir, status)?;
        self.index_row(memory);
        debug!(id = %memory.id, status = %status, path = %memory.file_path.display(), "memory archived");
        Ok(())
    }

    pub fn find_by_id(&self, id: &str) -> Result<Memory> {
        if let Some((_, _, row)) = self.roots.locate(id)? {
            if row.tier == self.tier {
                match self.hydrate(&row) {
                    Ok(memory) => return Ok(memory),
                    Err(e) if e.is_not_found() => {
                        debug!(id, "indexed document missing, scanning files");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.load_all()?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::not_found("find_memory", format!("no {} memory with id {id}", self.tier)))
    }

    /// First active memory whose title matches case-insensitively.
    pub fn find_by_title(&self, title: &str) -> Result<Option<Memory>> {
        let wanted = title.trim().to_lowercase();
        Ok(self
            .load_active()?
            .into_iter()
            .find(|m| m.title.to_lowercase() == wanted))
    }

    /// Every decodable document of this tier in every active scope.
    pub fn load_all(&self) -> Result<Vec<Memory>> {
        let layout = self.roots.layout()?;
        let mut out = Vec::new();
        for scope in self.scopes()? {
            let stores = self.roots.stores(scope)?;
            for category in Category::for_tier(self.tier) {
                for mut memory in self.files.list_memories(&layout.dir_for(*category, scope)?)? {
                    if let Ok(Some(row)) = stores.index.get(&memory.id) {
                        overlay_access(&mut memory, &row);
                    }
                    out.push(memory);
                }
            }
        }
        Ok(out)
    }

    /// Active, unexpired memories, most important first, then most recent.
    pub fn load_active(&self) -> Result<Vec<Memory>> {
        let now = Utc::now();
        let mut active: Vec<Memory> = self.load_all()?.into_iter().filter(|m| m.is_active(now)).collect();
        sort_by_importance(&mut active);
        Ok(active)
    }

    /// Active memories via the index (cheaper than a directory scan).
    pub fn query_active(&self, filter: IndexFilter) -> Result<Vec<Memory>> {
        let now = Utc::now();
        let filter = IndexFilter {
            tier: Some(self.tier),
            status: Some(Status::Active),
            ..filter
        };
        let mut out = Vec::new();
        for scope in self.scopes()? {
            let stores = self.roots.stores(scope)?;
            for row in stores.index.query(&filter)? {
                if row.is_expired(now) {
                    continue;
                }
                match self.hydrate(&row) {
                    Ok(memory) => out.push(memory),
                    Err(e) => warn!(id = %row.id, error = %e, "skipping unreadable indexed memory"),
                }
            }
        }
        Ok(out)
    }

    /// Record one access in the index.
    pub fn touch(&self, id: &str) -> Result<()> {
        let (_, stores, _) = self
            .roots
            .locate(id)?
            .ok_or_else(|| Error::not_found("touch_memory", format!("no index row for {id}")))?;
        stores.index.record_access(id, Utc::now())
    }

    /// Load the document behind an index row, with the row's access stats.
    pub fn hydrate(&self, row: &IndexRow) -> Result<Memory> {
        let mut memory = self.files.load_memory(&row.file_path)?;
        overlay_access(&mut memory, row);
        Ok(memory)
    }

    fn index_row(&self, memory: &Memory) {
        let result = self
            .roots
            .stores(memory.scope)
            .and_then(|stores| {
                let mut row = IndexRow::from_memory(memory);
                if let Ok(Some(existing)) = stores.index.get(&memory.id) {
                    row.access_count = row.access_count.max(existing.access_count);
                    row.accessed_at = row.accessed_at.max(existing.accessed_at);
                }
                stores.index.upsert(&row)
            });
        if let Err(e) = result {
            warn!(id = %memory.id, error = %e, "index update failed; next sync will repair it");
        }
    }
}

/// Shared surface of the core, short-term and long-term managers.
pub trait TierManager {
    fn store(&self) -> &TierStore;

    /// Render this tier's section, omitting whole entries past `max_tokens`.
    fn build_context(&self, max_tokens: usize) -> Result<Section>;

    fn update(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        self.store().update(id, patch)
    }

    fn delete(&self, id: &str) -> Result<Memory> {
        self.store().delete(id)
    }

    fn archive(&self, id: &str) -> Result<Memory> {
        self.store().archive(id, Status::Archived)
    }

    fn find_by_id(&self, id: &str) -> Result<Memory> {
        self.store().find_by_id(id)
    }

    fn find_by_title(&self, title: &str) -> Result<Option<Memory>> {
        self.store().find_by_title(title)
    }

    fn load_all(&self) -> Result<Vec<Memory>> {
        self.store().load_all()
    }

    fn load_active(&self) -> Result<Vec<Memory>> {
        self.store().load_active()
    }
}

/// The index is authoritative for access statistics.
pub fn overlay_access(memory: &mut Memory, row: &IndexRow) {
    memory.access_count = memory.access_count.max(row.access_count);
    memory.accessed_at = memory.accessed_at.max(row.accessed_at);
}

pub fn sort_by_importance(memories: &mut [Memory]) {
    memories.sort_by(|a, b| {
        b.importance
            .cmp(&a.importance)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
}

/// A rendered context section and what went into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    pub text: String,
    pub tokens: usize,
    pub ids: Vec<String>,
}

/// Render `heading` followed by one entry per memory, stopping at the first
/// entry that would push the running estimate past `max_tokens`. Entries are
/// never cut mid-way. Empty when nothing fits.
pub fn render_section<F>(heading: &str, memories: &[Memory], max_tokens: usize, format: F) -> Section
where
    F: Fn(&Memory) -> String,
{
    let header = format!("## {heading}\n\n");
    let mut used = estimate_tokens(&header);
    let mut body = String::new();
    let mut ids = Vec::new();
    for memory in memories {
        let entry = format!("{}\n", format(memory));
        let cost = estimate_tokens(&entry);
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        body.push_str(&entry);
        ids.push(memory.id.clone());
    }
    if ids.is_empty() {
        return Section::default();
    }
    Section {
        text: format!("{header}{body}"),
        tokens: used,
        ids,
    }
}

/// `- **title**: content` with tags appended when present.
pub fn bullet(memory: &Memory) -> String {
    let mut line = if memory.title.is_empty() {
        format!("- {}", memory.content)
    } else {
        format!("- **{}**: {}", memory.title, memory.content)
    };
    if !memory.tags.is_empty() {
        line.push_str(&format!(" _[{}]_", memory.tags.join(", ")));
    }
    line
}
