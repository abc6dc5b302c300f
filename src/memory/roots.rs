//! The global root and the (optional) active project root, each with its own
//! metadata index and vector store.
//!
//! Stores are opened once per root and shared by every component through
//! `Arc`s. Switching projects keeps already-opened project stores around so
//! switching back does not reopen files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use crate::error::{Error, ErrorKind, Result};
use crate::index::{IndexRow, InMemoryIndex, MetadataIndex, SqliteIndex};
use crate::memory::types::Scope;
use crate::storage::StorageLayout;
use crate::vector::{InMemoryVectorIndex, SqliteVectorIndex, VectorIndex};

/// Index and vector store for one root.
#[derive(Clone)]
pub struct ScopeStores {
    pub index: Arc<dyn MetadataIndex>,
    pub vectors: Arc<dyn VectorIndex>,
}

/// Which implementation backs newly opened roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// `index.db` and `vectors.db` inside each root.
    Sqlite,
    /// Process-local stores; nothing but the documents survives a restart.
    InMemory,
}

struct RootState {
    layout: StorageLayout,
    global: ScopeStores,
    project: Option<ScopeStores>,
    opened: HashMap<PathBuf, ScopeStores>,
}

pub struct Roots {
    backend: StoreBackend,
    dimension: usize,
    state: RwLock<RootState>,
}

impl Roots {
    /// Open the global root (creating its directories) with no active project.
    pub fn open(layout: StorageLayout, backend: StoreBackend, dimension: usize) -> Result<Self> {
        layout.ensure_dirs(Scope::Global)?;
        let global = open_stores(backend, &layout, Scope::Global, dimension)?;
        Ok(Self {
            backend,
            dimension,
            state: RwLock::new(RootState {
                layout,
                global,
                project: None,
                opened: HashMap::new(),
            }),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RootState>> {
        self.state
            .read()
            .map_err(|_| Error::new(ErrorKind::Operation, "roots", "lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RootState>> {
        self.state
            .write()
            .map_err(|_| Error::new(ErrorKind::Operation, "roots", "lock poisoned"))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Snapshot of the current layout.
    pub fn layout(&self) -> Result<StorageLayout> {
        Ok(self.read()?.layout.clone())
    }

    /// Switch the active project (or clear it with `None`).
    pub fn set_project(&self, project_root: Option<PathBuf>) -> Result<()> {
        let mut state = self.write()?;
        let layout = state.layout.with_project(project_root.clone());
        let project = match &project_root {
            Some(root) => {
                layout.ensure_dirs(Scope::Project)?;
                let stores = match state.opened.get(root).cloned() {
                    Some(stores) => stores,
                    None => {
                        let stores = open_stores(self.backend, &layout, Scope::Project, self.dimension)?;
                        state.opened.insert(root.clone(), stores.clone());
                        stores
                    }
                };
                Some(stores)
            }
            None => None,
        };
        state.layout = layout;
        state.project = project;
        info!(
            project = %project_root.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "none".into()),
            "active project switched"
        );
        Ok(())
    }

    pub fn project_root(&self) -> Result<Option<PathBuf>> {
        Ok(self.read()?.layout.project_root().map(Path::to_path_buf))
    }

    /// Project root as recorded on project-scoped memories.
    pub fn project_path(&self) -> Option<String> {
        self.read()
            .ok()
            .and_then(|s| s.layout.project_root().map(|p| p.to_string_lossy().into_owned()))
    }

    /// Scopes that currently have a root: global, plus project when one is active.
    pub fn scopes(&self) -> Result<Vec<Scope>> {
        Ok(self.read()?.layout.scopes())
    }

    /// Project scope while a project is active, global otherwise.
    pub fn default_scope(&self) -> Scope {
        match self.read() {
            Ok(state) if state.project.is_some() => Scope::Project,
            _ => Scope::Global,
        }
    }

    pub fn stores(&self, scope: Scope) -> Result<ScopeStores> {
        let state = self.read()?;
        match scope {
            Scope::Global => Ok(state.global.clone()),
            Scope::Project => state
                .project
                .clone()
                .ok_or_else(|| Error::invalid("roots_stores", "no active project for project scope")),
        }
    }

    /// Every active scope with its stores.
    pub fn all_stores(&self) -> Result<Vec<(Scope, ScopeStores)>> {
        let state = self.read()?;
        let mut out = vec![(Scope::Global, state.global.clone())];
        if let Some(project) = &state.project {
            out.push((Scope::Project, project.clone()));
        }
        Ok(out)
    }

    /// Find the index row for `id` in any active scope.
    pub fn locate(&self, id: &str) -> Result<Option<(Scope, ScopeStores, IndexRow)>> {
        for (scope, stores) in self.all_stores()? {
            if let Some(row) = stores.index.get(id)? {
                return Ok(Some((scope, stores, row)));
            }
        }
        Ok(None)
    }
}

fn open_stores(backend: StoreBackend, layout: &StorageLayout, scope: Scope, dimension: usize) -> Result<ScopeStores> {
    match backend {
        StoreBackend::Sqlite => Ok(ScopeStores {
            index: Arc::new(SqliteIndex::open(layout.index_db_path(scope)?)?),
            vectors: Arc::new(SqliteVectorIndex::open(layout.vector_db_path(scope)?, dimension)?),
        }),
        StoreBackend::InMemory => Ok(ScopeStores {
            index: Arc::new(InMemoryIndex::new()),
            vectors: Arc::new(InMemoryVectorIndex::new(dimension)),
        }),
    }
}
