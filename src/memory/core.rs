//! Core tier: durable preferences, rules and the persona. Always global.

use std::sync::Arc;

use tracing::debug;

use super::roots::Roots;
use super::tier::{bullet, render_section, MemoryPatch, NewMemory, Section, TierManager, TierStore};
use super::types::{Category, Memory, Tier};
use crate::error::Result;

pub struct CoreMemory {
    store: TierStore,
}

impl CoreMemory {
    pub fn new(roots: Arc<Roots>) -> Self {
        Self {
            store: TierStore::new(Tier::Core, roots),
        }
    }

    pub fn add(&self, new: NewMemory) -> Result<Memory> {
        self.store.create(new)
    }

    pub fn add_preference(&self, title: &str, content: &str, tags: Vec<String>) -> Result<Memory> {
        self.add(NewMemory::new(Category::Preference, title, content).tags(tags).importance(4))
    }

    pub fn add_rule(&self, title: &str, content: &str, tags: Vec<String>) -> Result<Memory> {
        self.add(NewMemory::new(Category::Rule, title, content).tags(tags).importance(5))
    }

    /// Replace the single persona entry, creating it on first use. Extra
    /// persona documents left by external edits are archived.
    pub fn set_persona(&self, content: &str) -> Result<Memory> {
        let mut personas: Vec<Memory> = self
            .store
            .load_active()?
            .into_iter()
            .filter(|m| m.category == Category::Persona)
            .collect();
        personas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let mut iter = personas.into_iter();
        let persona = match iter.next() {
            Some(existing) => self.store.update(
                &existing.id,
                MemoryPatch {
                    content: Some(content.to_string()),
                    ..MemoryPatch::default()
                },
            )?,
            None => self.add(NewMemory::new(Category::Persona, "Persona", content).importance(5))?,
        };
        for stale in iter {
            debug!(id = %stale.id, "archiving superseded persona");
            TierManager::archive(self, &stale.id)?;
        }
        Ok(persona)
    }

    pub fn persona(&self) -> Result<Option<Memory>> {
        Ok(self
            .store
            .load_active()?
            .into_iter()
            .find(|m| m.category == Category::Persona))
    }

    pub fn preferences(&self) -> Result<Vec<Memory>> {
        self.of_category(Category::Preference)
    }

    pub fn rules(&self) -> Result<Vec<Memory>> {
        self.of_category(Category::Rule)
    }

    fn of_category(&self, category: Category) -> Result<Vec<Memory>> {
        Ok(self
            .store
            .load_active()?
            .into_iter()
            .filter(|m| m.category == category)
            .collect())
    }

    /// Estimated tokens of every active core memory.
    pub fn total_tokens(&self) -> Result<usize> {
        Ok(self.store.load_active()?.iter().map(Memory::estimated_tokens).sum())
    }
}

impl TierManager for CoreMemory {
    fn store(&self) -> &TierStore {
        &self.store
    }

    /// Persona first, then rules, then preferences.
    fn build_context(&self, max_tokens: usize) -> Result<Section> {
        let active = self.store.load_active()?;
        let mut ordered: Vec<Memory> = Vec::with_capacity(active.len());
        for category in [Category::Persona, Category::Rule, Category::Preference] {
            ordered.extend(active.iter().filter(|m| m.category == category).cloned());
        }
        Ok(render_section("Core Memory", &ordered, max_tokens, |m| match m.category {
            Category::Persona => format!("- **Persona**: {}", m.content),
            _ => bullet(m),
        }))
    }
}
