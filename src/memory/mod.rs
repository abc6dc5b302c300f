//! The four memory tiers and the services built on top of them.

pub mod context;
pub mod core;
pub mod long_term;
pub mod maintenance;
pub mod roots;
pub mod search;
pub mod session;
pub mod short_term;
pub mod stats;
pub mod sync;
pub mod tier;
pub mod trim;
pub mod types;

pub use context::{BuiltContext, ContextBudget, ContextBuilder};
pub use maintenance::{Lifecycle, LifecycleHandle, MaintenanceReport};
pub use roots::{Roots, StoreBackend};
pub use search::{Retriever, SearchHit, SearchOptions};
pub use sync::{ConsistencyReport, SyncReport, Syncer};
pub use tier::{MemoryPatch, NewMemory, TierManager};
pub use types::{Category, Memory, Role, Scope, Session, SessionMessage, Status, Tier};
