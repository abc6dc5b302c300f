//! The façade: one entry point wiring storage, tiers, retrieval, context
//! assembly, trimming and the lifecycle task together.
//!
//! Construct with [`MemoryEngine::initialize`] inside a tokio runtime and call
//! [`MemoryEngine::shutdown`] before dropping it so the background task stops
//! cleanly.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{Classification, Classifier};
use crate::completion::Summarizer;
use crate::config::StrataConfig;
use crate::embedding::{EmbeddingGateway, EmbeddingProvider, HashEmbedding};
use crate::error::{Error, ErrorKind, Result};
use crate::memory::context::{BuiltContext, ContextBuilder};
use crate::memory::core::CoreMemory;
use crate::memory::long_term::{EmbedReport, LongTermMemory};
use crate::memory::maintenance::{Lifecycle, LifecycleHandle, MaintenanceReport};
use crate::memory::roots::{Roots, StoreBackend};
use crate::memory::search::{Retriever, SearchHit, SearchOptions};
use crate::memory::session::SessionManager;
use crate::memory::short_term::ShortTermMemory;
use crate::memory::stats::{memory_stats, StatsResponse};
use crate::memory::sync::{ConsistencyReport, SyncReport, Syncer};
use crate::memory::tier::{NewMemory, TierManager};
use crate::memory::trim::{SessionTrimmer, TrimReport};
use crate::memory::types::{Category, Memory, Scope, Session, SessionMessage, Tier, ToolCall};
use crate::storage::{detect_project_root, StorageLayout};
use crate::tools::{ForgetParams, MemoryTool, RecallParams, RememberParams};

/// Collaborators injected at construction. Everything is optional.
pub struct EngineOptions {
    pub backend: StoreBackend,
    /// Replaces the built-in [`HashEmbedding`] when embeddings are enabled.
    pub embedding: Option<Arc<dyn EmbeddingProvider>>,
    /// Without one, trims still evict turns but store no summary.
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub project_root: Option<PathBuf>,
    /// Start the periodic lifecycle task (also gated by `lifecycle.enabled`).
    pub background: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            embedding: None,
            summarizer: None,
            project_root: None,
            background: true,
        }
    }
}

/// Result of classify-and-store.
#[derive(Debug, Serialize)]
pub struct StoreOutcome {
    pub classification: Classification,
    pub memory: Option<Memory>,
}

/// Result of appending a conversation turn.
#[derive(Debug, Serialize)]
pub struct TurnOutcome {
    pub session_tokens: usize,
    pub trim: Option<TrimReport>,
}

pub struct MemoryEngine {
    config: StrataConfig,
    roots: Arc<Roots>,
    classifier: Classifier,
    gateway: Option<Arc<EmbeddingGateway>>,
    core: Arc<CoreMemory>,
    session: Arc<SessionManager>,
    short_term: Arc<ShortTermMemory>,
    long_term: Arc<LongTermMemory>,
    retriever: Arc<Retriever>,
    context: ContextBuilder,
    syncer: Arc<Syncer>,
    lifecycle: Arc<Lifecycle>,
    trimmer: SessionTrimmer,
    background: Mutex<Option<LifecycleHandle>>,
}

impl MemoryEngine {
    /// Build every component without touching the runtime: no startup sync
    /// and no background task.
    pub fn open(config: StrataConfig, options: EngineOptions) -> Result<Self> {
        let layout = StorageLayout::from_config(&config);
        let roots = Arc::new(Roots::open(layout, options.backend, config.embedding.dimension)?);
        if let Some(root) = options.project_root {
            roots.set_project(Some(root))?;
        }

        let gateway = if config.embedding.enabled {
            let provider = options
                .embedding
                .unwrap_or_else(|| Arc::new(HashEmbedding::new(config.embedding.dimension)));
            if provider.dimensions() != config.embedding.dimension {
                return Err(Error::invalid(
                    "initialize",
                    format!(
                        "embedding provider '{}' produces {} dimensions, configuration expects {}",
                        provider.name(),
                        provider.dimensions(),
                        config.embedding.dimension
                    ),
                ));
            }
            info!(provider = provider.name(), dimension = provider.dimensions(), "embedding provider ready");
            Some(Arc::new(EmbeddingGateway::new(provider, &config.embedding)))
        } else {
            info!("embeddings disabled, keyword search only");
            None
        };

        let core = Arc::new(CoreMemory::new(Arc::clone(&roots)));
        let session = Arc::new(SessionManager::new(Arc::clone(&roots), config.session.max_tokens));
        let short_term = Arc::new(ShortTermMemory::new(Arc::clone(&roots), config.short_term.clone()));
        let long_term = Arc::new(LongTermMemory::new(Arc::clone(&roots), gateway.clone()));
        let retriever = Arc::new(Retriever::new(Arc::clone(&roots), gateway.clone(), config.retrieval.clone()));
        let context = ContextBuilder::new(
            Arc::clone(&core),
            Arc::clone(&session),
            Arc::clone(&short_term),
            Arc::clone(&long_term),
            Arc::clone(&retriever),
            config.context.clone(),
            &config.retrieval,
        );
        let syncer = Arc::new(Syncer::new(Arc::clone(&roots)));
        let lifecycle = Arc::new(Lifecycle::new(
            Arc::clone(&short_term),
            Arc::clone(&long_term),
            Arc::clone(&syncer),
            config.long_term.inactive_days,
        ));
        let trimmer = SessionTrimmer::new(
            Arc::clone(&session),
            Arc::clone(&short_term),
            options.summarizer,
            config.session.clone(),
        );

        Ok(Self {
            classifier: Classifier::from_config(&config)?,
            config,
            roots,
            gateway,
            core,
            session,
            short_term,
            long_term,
            retriever,
            context,
            syncer,
            lifecycle,
            trimmer,
            background: Mutex::new(None),
        })
    }

    /// Open, bring the index in line with the documents on disk, then start
    /// the lifecycle task. Must run inside a tokio runtime.
    pub async fn initialize(config: StrataConfig, options: EngineOptions) -> Result<Self> {
        let background = options.background;
        let engine = Self::open(config, options)?;
        let report = engine.sync()?;
        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            errors = report.errors.len(),
            "startup sync finished"
        );
        if background && engine.config.lifecycle.enabled {
            engine.start_background()?;
        }
        Ok(engine)
    }

    /// Spawn the lifecycle task unless one is already running.
    pub fn start_background(&self) -> Result<()> {
        let mut slot = self.background_slot()?;
        if slot.is_some() {
            return Ok(());
        }
        let interval = Duration::from_secs(self.config.lifecycle.interval_secs.max(1));
        *slot = Some(Arc::clone(&self.lifecycle).spawn(interval));
        Ok(())
    }

    pub fn is_background_running(&self) -> bool {
        self.background_slot()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the lifecycle task and wait for it. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        let handle = self.background_slot()?.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        if let Some(gateway) = &self.gateway {
            let pending = gateway.pending();
            if pending > 0 {
                warn!(pending, "shutting down with embeddings still queued");
            }
        }
        info!("memory engine shut down");
        Ok(())
    }

    fn background_slot(&self) -> Result<std::sync::MutexGuard<'_, Option<LifecycleHandle>>> {
        self.background
            .lock()
            .map_err(|_| Error::new(ErrorKind::Operation, "lifecycle", "lock poisoned"))
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn roots(&self) -> &Arc<Roots> {
        &self.roots
    }

    pub fn core(&self) -> &CoreMemory {
        &self.core
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn short_term(&self) -> &ShortTermMemory {
        &self.short_term
    }

    pub fn long_term(&self) -> &LongTermMemory {
        &self.long_term
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    // ── Project ──────────────────────────────────────────────────────────────

    /// Switch the active project root, or clear it with `None`.
    pub fn set_project(&self, root: Option<PathBuf>) -> Result<()> {
        self.roots.set_project(root)?;
        let report = self.syncer.sync_all()?;
        if let Err(e) = self.long_term.requeue(&report.changed) {
            warn!(error = %e, "failed to queue changed memories for embedding");
        }
        Ok(())
    }

    /// Walk up from `start` to the nearest project marker and make it active.
    pub fn detect_project(&self, start: &Path) -> Result<PathBuf> {
        let root = detect_project_root(start, &self.config.storage.project_markers);
        self.set_project(Some(root.clone()))?;
        Ok(root)
    }

    pub fn project_root(&self) -> Result<Option<PathBuf>> {
        self.roots.project_root()
    }

    /// Project requests fall back to global while no project is active.
    fn effective_scope(&self, requested: Scope) -> Scope {
        match requested {
            Scope::Project if self.roots.default_scope() == Scope::Global => Scope::Global,
            other => other,
        }
    }

    // ── Storing ──────────────────────────────────────────────────────────────

    /// Classify free text and store it where the classifier recommends.
    pub async fn remember(&self, text: &str, cancel: &CancellationToken) -> Result<StoreOutcome> {
        let classification = self.classifier.classify(text);
        if !classification.should_store {
            debug!(reason = %classification.reason, "input not stored");
            return Ok(StoreOutcome {
                classification,
                memory: None,
            });
        }
        let new = NewMemory::new(classification.category, classification.title.clone(), text.trim())
            .scope(classification.scope)
            .tags(classification.tags.clone());
        let new = match classification.ttl {
            Some(ttl) => new.expires_at(Some(chrono::Utc::now() + ttl)),
            None => new,
        };
        let memory = self.add(new, cancel).await?;
        info!(
            id = %memory.id,
            tier = %memory.tier,
            category = %memory.category,
            confidence = classification.confidence,
            "input classified and stored"
        );
        Ok(StoreOutcome {
            classification,
            memory: Some(memory),
        })
    }

    /// Store a record in the tier its category belongs to.
    pub async fn add(&self, new: NewMemory, cancel: &CancellationToken) -> Result<Memory> {
        let new = NewMemory {
            scope: self.effective_scope(new.scope),
            ..new
        };
        match new.category.tier() {
            Tier::Core => self.core.add(new),
            Tier::ShortTerm => self.short_term.add(new),
            Tier::LongTerm => self.long_term.add(new, cancel).await,
            Tier::Session => Err(Error::invalid(
                "add_memory",
                "session transcripts are written with append_turn",
            )),
        }
    }

    fn manager(&self, tier: Tier) -> Result<&dyn TierManager> {
        match tier {
            Tier::Core => Ok(self.core.as_ref()),
            Tier::ShortTerm => Ok(self.short_term.as_ref()),
            Tier::LongTerm => Ok(self.long_term.as_ref()),
            Tier::Session => Err(Error::invalid("memory_tier", "sessions are not memory records")),
        }
    }

    fn tier_of(&self, id: &str) -> Result<Tier> {
        match self.roots.locate(id)? {
            Some((_, _, row)) => Ok(row.tier),
            None => Err(Error::not_found("locate_memory", format!("memory {id}"))),
        }
    }

    pub fn get(&self, id: &str) -> Result<Memory> {
        self.manager(self.tier_of(id)?)?.find_by_id(id)
    }

    /// Active records of one tier.
    pub fn list(&self, tier: Tier) -> Result<Vec<Memory>> {
        self.manager(tier)?.load_active()
    }

    /// Delete a memory's document, index row and vector.
    pub fn delete(&self, id: &str) -> Result<Memory> {
        let memory = self.manager(self.tier_of(id)?)?.delete(id)?;
        info!(id, tier = %memory.tier, "memory deleted");
        Ok(memory)
    }

    pub fn archive(&self, id: &str) -> Result<Memory> {
        self.manager(self.tier_of(id)?)?.archive(id)
    }

    /// Move a short-term record into long-term knowledge now.
    pub async fn promote(&self, id: &str, cancel: &CancellationToken) -> Result<Memory> {
        let memory = self.short_term.find_by_id(id)?;
        self.lifecycle.promote(&memory, cancel).await
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Append a turn to the current session, trimming when it crosses the
    /// high-water mark.
    pub async fn append_turn(&self, message: SessionMessage, cancel: &CancellationToken) -> Result<TurnOutcome> {
        let tokens = self.session.append_message(message)?;
        let trim = self.trimmer.trim_if_needed(cancel).await?;
        let session_tokens = match &trim {
            Some(report) => report.tokens_after,
            None => tokens,
        };
        Ok(TurnOutcome { session_tokens, trim })
    }

    pub fn create_session(&self, title: Option<&str>) -> Result<Session> {
        self.session.create(title)
    }

    pub fn restore_session(&self, id: &str) -> Result<Session> {
        self.session.restore(id)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.session.list()
    }

    pub fn current_session(&self) -> Result<Option<Session>> {
        self.session.current()
    }

    /// Archive the current session; the next turn starts a new one.
    pub fn end_session(&self) -> Result<Option<Session>> {
        self.session.clear()
    }

    pub async fn trim_session(&self, cancel: &CancellationToken) -> Result<TrimReport> {
        self.trimmer.trim(cancel).await
    }

    // ── Retrieval and context ────────────────────────────────────────────────

    pub async fn search(&self, query: &str, options: &SearchOptions, cancel: &CancellationToken) -> Result<Vec<SearchHit>> {
        self.retriever.search(query, options, cancel).await
    }

    /// Search restricted to one tier.
    pub async fn search_tier(
        &self,
        tier: Tier,
        query: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        self.manager(tier)?;
        let options = SearchOptions::default().top_k(top_k).tiers(vec![tier]);
        self.retriever.search(query, &options, cancel).await
    }

    pub async fn build_context(&self, query: &str, cancel: &CancellationToken) -> Result<BuiltContext> {
        self.context.build_for_query(query, cancel).await
    }

    pub fn build_new_session_context(&self) -> Result<BuiltContext> {
        self.context.build_for_new_session()
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Run one lifecycle pass in the foreground.
    pub async fn maintain(&self, cancel: &CancellationToken) -> MaintenanceReport {
        self.lifecycle.run_once(cancel).await
    }

    pub fn sync(&self) -> Result<SyncReport> {
        let report = self.syncer.sync_all()?;
        if let Err(e) = self.long_term.requeue(&report.changed) {
            warn!(error = %e, "failed to queue changed memories for embedding");
        }
        Ok(report)
    }

    /// Rebuild every index row from the documents and queue long-term records
    /// for re-embedding.
    pub fn reindex(&self) -> Result<SyncReport> {
        let report = self.syncer.reindex()?;
        if let Err(e) = self.long_term.requeue(&report.changed) {
            warn!(error = %e, "failed to queue reindexed memories for embedding");
        }
        Ok(report)
    }

    pub fn check(&self) -> Result<ConsistencyReport> {
        self.syncer.check_consistency()
    }

    /// Embed whatever is queued or missing a vector.
    pub async fn embed_pending(&self, cancel: &CancellationToken) -> Result<EmbedReport> {
        self.long_term.embed_pending(cancel).await
    }

    pub fn stats(&self) -> Result<StatsResponse> {
        memory_stats(
            &self.roots,
            &self.core,
            &self.session,
            self.gateway.as_deref(),
            self.config.context.core_limit_tokens,
        )
    }

    // ── Tools ────────────────────────────────────────────────────────────────

    /// Execute a tool call from the completion capability; the result is a
    /// JSON string for the tool message.
    pub async fn dispatch_tool(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<String> {
        let tool = MemoryTool::from_call(call)?;
        debug!(tool = tool.name(), call_id = %call.id, "dispatching memory tool");
        let value = match tool {
            MemoryTool::Remember(params) => self.tool_remember(params, cancel).await?,
            MemoryTool::Recall(params) => self.tool_recall(params, cancel).await?,
            MemoryTool::Forget(params) => self.tool_forget(params)?,
            MemoryTool::MemoryStats(_) => to_json(&self.stats()?)?,
        };
        Ok(value.to_string())
    }

    async fn tool_remember(&self, params: RememberParams, cancel: &CancellationToken) -> Result<serde_json::Value> {
        let content = params.content.trim();
        if content.is_empty() {
            return Err(Error::invalid("remember", "content must not be empty"));
        }
        if params.importance.is_some_and(|i| !(1..=5).contains(&i)) {
            return Err(Error::invalid("remember", "importance must be between 1 and 5"));
        }
        let classification = self.classifier.classify(content);
        let category = match &params.category {
            Some(c) => c.parse::<Category>().map_err(|e| Error::invalid("remember", e))?,
            // An explicit request overrides a "do not store" verdict.
            None if classification.should_store => classification.category,
            None => Category::Knowledge,
        };
        let scope = match &params.scope {
            Some(s) => s.parse::<Scope>().map_err(|e| Error::invalid("remember", e))?,
            None if params.category.is_none() && classification.should_store => classification.scope,
            None => self.roots.default_scope(),
        };
        let title = params
            .title
            .clone()
            .unwrap_or_else(|| self.classifier.title(content));
        let tags = params
            .tags
            .clone()
            .unwrap_or_else(|| classification.tags.clone());
        let mut new = NewMemory::new(category, title, content)
            .scope(scope)
            .tags(tags)
            .importance(params.importance.unwrap_or(3));
        if let Some(ttl) = self.classifier.ttl_for(category) {
            new = new.expires_at(Some(chrono::Utc::now() + ttl));
        }
        let memory = self.add(new, cancel).await?;
        Ok(json!({
            "id": memory.id,
            "tier": memory.tier,
            "category": memory.category,
            "scope": memory.scope,
            "title": memory.title,
            "expires_at": memory.expires_at,
        }))
    }

    async fn tool_recall(&self, params: RecallParams, cancel: &CancellationToken) -> Result<serde_json::Value> {
        let mut options = SearchOptions::default().top_k(params.max_results.unwrap_or(5).clamp(1, 20));
        if let Some(tier) = &params.tier {
            let tier = tier.parse::<Tier>().map_err(|e| Error::invalid("recall", e))?;
            self.manager(tier)?;
            options = options.tiers(vec![tier]);
        }
        if let Some(scope) = &params.scope {
            options = options.scope(Some(scope.parse::<Scope>().map_err(|e| Error::invalid("recall", e))?));
        }
        let hits = self.retriever.search(&params.query, &options, cancel).await?;
        let results: Vec<_> = hits
            .iter()
            .map(|hit| {
                json!({
                    "id": hit.memory.id,
                    "tier": hit.memory.tier,
                    "category": hit.memory.category,
                    "title": hit.memory.title,
                    "content": hit.memory.content,
                    "score": hit.score,
                    "source": hit.source,
                })
            })
            .collect();
        Ok(json!({ "count": results.len(), "results": results }))
    }

    fn tool_forget(&self, params: ForgetParams) -> Result<serde_json::Value> {
        let (memory, status) = if params.archive.unwrap_or(false) {
            let memory = self.archive(&params.id)?;
            let status = memory.status.as_str();
            (memory, status)
        } else {
            (self.delete(&params.id)?, "deleted")
        };
        Ok(json!({ "id": memory.id, "status": status }))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::new(ErrorKind::Operation, "serialize", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Role;

    fn config(dir: &Path) -> StrataConfig {
        let mut config = StrataConfig::with_global_root(dir.join("global"));
        config.embedding.dimension = 64;
        config
    }

    fn engine(dir: &Path) -> MemoryEngine {
        MemoryEngine::open(
            config(dir),
            EngineOptions {
                backend: StoreBackend::InMemory,
                background: false,
                ..EngineOptions::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn remember_routes_by_classification() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let cancel = CancellationToken::new();

        let pref = engine.remember("I always use vim for editing", &cancel).await.unwrap();
        let memory = pref.memory.unwrap();
        assert_eq!((memory.tier, memory.category), (Tier::Core, Category::Preference));

        let question = engine.remember("what editor do I use?", &cancel).await.unwrap();
        assert!(question.memory.is_none());
        assert!(!question.classification.should_store);
    }

    #[tokio::test]
    async fn project_scope_falls_back_to_global_without_project() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let m = engine
            .add(
                NewMemory::new(Category::Task, "ship", "ship the release today").scope(Scope::Project),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(m.scope, Scope::Global);
        assert!(m.expires_at.is_some());
    }

    #[tokio::test]
    async fn delete_and_list_route_through_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let cancel = CancellationToken::new();
        let k = engine
            .add(NewMemory::new(Category::Knowledge, "db", "the service stores data in postgres"), &cancel)
            .await
            .unwrap();
        assert_eq!(engine.list(Tier::LongTerm).unwrap().len(), 1);
        assert_eq!(engine.get(&k.id).unwrap().title, "db");
        engine.delete(&k.id).unwrap();
        assert!(engine.list(Tier::LongTerm).unwrap().is_empty());
        assert!(engine.delete(&k.id).unwrap_err().is_not_found());
        assert!(engine.list(Tier::Session).is_err());
    }

    #[tokio::test]
    async fn dispatch_tool_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let cancel = CancellationToken::new();
        let call = |name: &str, arguments: serde_json::Value| ToolCall {
            id: "c".into(),
            name: name.into(),
            arguments,
        };

        let stored = engine
            .dispatch_tool(
                &call("remember", json!({"content": "The API gateway uses rate limiting per tenant", "category": "knowledge"})),
                &cancel,
            )
            .await
            .unwrap();
        let stored: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(stored["tier"], "long_term");
        let id = stored["id"].as_str().unwrap().to_string();

        let recalled = engine
            .dispatch_tool(&call("recall", json!({"query": "rate limiting"})), &cancel)
            .await
            .unwrap();
        let recalled: serde_json::Value = serde_json::from_str(&recalled).unwrap();
        assert_eq!(recalled["results"][0]["id"], id.as_str());

        let forgot = engine
            .dispatch_tool(&call("forget", json!({"id": id})), &cancel)
            .await
            .unwrap();
        assert!(forgot.contains("deleted"));

        let stats = engine.dispatch_tool(&call("memory_stats", json!({})), &cancel).await.unwrap();
        assert!(stats.contains("by_tier"));

        let bad = engine
            .dispatch_tool(&call("remember", json!({"content": "x", "category": "gossip"})), &cancel)
            .await
            .unwrap_err();
        assert_eq!(bad.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn append_turn_trims_past_high_water() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.session.max_tokens = 60;
        config.session.protected_turns = 1;
        let engine = MemoryEngine::open(
            config,
            EngineOptions {
                backend: StoreBackend::InMemory,
                background: false,
                ..EngineOptions::default()
            },
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let mut trimmed = false;
        for i in 0..6 {
            let outcome = engine
                .append_turn(SessionMessage::new(Role::User, format!("turn {i} {}", "y".repeat(40))), &cancel)
                .await
                .unwrap();
            trimmed |= outcome.trim.is_some();
        }
        assert!(trimmed);
        assert!(engine.session().usage_ratio().unwrap() < 0.85);
    }

    #[tokio::test]
    async fn background_task_starts_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::initialize(
            config(dir.path()),
            EngineOptions {
                backend: StoreBackend::InMemory,
                ..EngineOptions::default()
            },
        )
        .await
        .unwrap();
        assert!(engine.is_background_running());
        engine.shutdown().await.unwrap();
        assert!(!engine.is_background_running());
        engine.shutdown().await.unwrap();
    }
}
