//! Lifecycle management: the one background task the engine runs.
//!
//! Each pass expires short-term records, archives inactive long-term records,
//! promotes frequently used short-term records, resyncs the index and retries
//! pending embeddings. Steps are independent: a failing step is logged and
//! recorded on the report, and the remaining steps still run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::long_term::LongTermMemory;
use super::short_term::ShortTermMemory;
use super::sync::{SyncReport, Syncer};
use super::tier::{NewMemory, TierManager};
use super::types::{Category, Memory};
use crate::error::Result;

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub archived: usize,
    /// `(short-term id, new long-term id)` pairs.
    pub promoted: Vec<(String, String)>,
    pub sync: Option<SyncReport>,
    pub embedded: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

pub struct Lifecycle {
    short_term: Arc<ShortTermMemory>,
    long_term: Arc<LongTermMemory>,
    syncer: Arc<Syncer>,
    inactive_days: i64,
    promotion_threshold: u32,
}

impl Lifecycle {
    pub fn new(
        short_term: Arc<ShortTermMemory>,
        long_term: Arc<LongTermMemory>,
        syncer: Arc<Syncer>,
        inactive_days: i64,
    ) -> Self {
        let promotion_threshold = short_term.promotion_threshold();
        Self {
            short_term,
            long_term,
            syncer,
            inactive_days,
            promotion_threshold,
        }
    }

    /// One full maintenance pass. Never fails as a whole.
    pub async fn run_once(&self, cancel: &CancellationToken) -> MaintenanceReport {
        let started = Instant::now();
        let mut report = MaintenanceReport::default();

        // 1. Expire short-term memories.
        match self.short_term.cleanup_expired() {
            Ok(r) => {
                report.expired = r.expired.len();
                report.errors.extend(r.errors);
            }
            Err(e) => step_failed(&mut report, "expire", &e),
        }

        // 2. Archive inactive long-term memories.
        match self.long_term.archive_inactive(self.inactive_days) {
            Ok(r) => {
                report.archived = r.archived.len();
                report.errors.extend(r.errors);
            }
            Err(e) => step_failed(&mut report, "archive", &e),
        }

        // 3. Promote frequently accessed short-term memories.
        if !self.cancelled(cancel, &mut report) {
            match self.short_term.high_access(self.promotion_threshold) {
                Ok(candidates) => {
                    for memory in candidates {
                        match self.promote(&memory, cancel).await {
                            Ok(promoted) => report.promoted.push((memory.id, promoted.id)),
                            Err(e) => {
                                warn!(id = %memory.id, error = %e, "promotion failed");
                                report.errors.push(format!("promote {}: {e}", memory.id));
                            }
                        }
                    }
                }
                Err(e) => step_failed(&mut report, "promote", &e),
            }
        }

        // 4. Resync the index and queue changed long-term records.
        match self.syncer.sync_all() {
            Ok(sync) => {
                if let Err(e) = self.long_term.requeue(&sync.changed) {
                    step_failed(&mut report, "requeue", &e);
                }
                report.sync = Some(sync);
            }
            Err(e) => step_failed(&mut report, "sync", &e),
        }

        // 5. Embed anything still missing a vector.
        if !self.cancelled(cancel, &mut report) {
            match self.long_term.embed_pending(cancel).await {
                Ok(r) => {
                    report.embedded = r.stored;
                    report.errors.extend(r.errors);
                }
                Err(e) => step_failed(&mut report, "embed", &e),
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            expired = report.expired,
            archived = report.archived,
            promoted = report.promoted.len(),
            embedded = report.embedded,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "maintenance finished"
        );
        report
    }

    /// Copy a short-term memory into long-term knowledge, then delete the
    /// original. The new record is written first so a failure in between
    /// leaves a duplicate rather than a loss.
    pub async fn promote(&self, memory: &Memory, cancel: &CancellationToken) -> Result<Memory> {
        let mut tags = memory.tags.clone();
        if !tags.iter().any(|t| t == "promoted") {
            tags.push("promoted".to_string());
        }
        let promoted = self
            .long_term
            .add(
                NewMemory::new(Category::Knowledge, memory.title.clone(), memory.content.clone())
                    .scope(memory.scope)
                    .tags(tags)
                    .importance(memory.importance.max(3)),
                cancel,
            )
            .await?;
        self.short_term.delete(&memory.id)?;
        debug!(from = %memory.id, to = %promoted.id, "short-term memory promoted");
        Ok(promoted)
    }

    fn cancelled(&self, cancel: &CancellationToken, report: &mut MaintenanceReport) -> bool {
        let cancelled = cancel.is_cancelled();
        if cancelled && !report.errors.iter().any(|e| e == "cancelled") {
            report.errors.push("cancelled".to_string());
        }
        cancelled
    }

    /// Run [`run_once`](Self::run_once) every `interval` until the returned
    /// handle is shut down. The first pass runs immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> LifecycleHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once(&token).await;
                    }
                }
            }
            debug!("lifecycle task stopped");
        });
        info!(interval_secs = interval.as_secs(), "lifecycle task started");
        LifecycleHandle { cancel, join }
    }
}

fn step_failed(report: &mut MaintenanceReport, step: &str, e: &crate::error::Error) {
    error!(step, error = %e, "maintenance step failed");
    report.errors.push(format!("{step}: {e}"));
}

/// Owner of the background lifecycle task.
pub struct LifecycleHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl LifecycleHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the task and wait for it to finish its current pass.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!(error = %e, "lifecycle task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShortTermConfig;
    use crate::memory::roots::{Roots, StoreBackend};
    use crate::memory::types::{Scope, Status};
    use crate::storage::StorageLayout;
    use chrono::Utc;

    struct Fixture {
        dir: tempfile::TempDir,
        short_term: Arc<ShortTermMemory>,
        long_term: Arc<LongTermMemory>,
        lifecycle: Arc<Lifecycle>,
    }

    fn fixture(inactive_days: i64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("g"), ".strata", 40);
        let roots = Arc::new(Roots::open(layout, StoreBackend::Sqlite, 4).unwrap());
        let short_term = Arc::new(ShortTermMemory::new(
            Arc::clone(&roots),
            ShortTermConfig {
                promotion_threshold: 2,
                ..ShortTermConfig::default()
            },
        ));
        let long_term = Arc::new(LongTermMemory::new(Arc::clone(&roots), None));
        let syncer = Arc::new(Syncer::new(roots));
        let lifecycle = Arc::new(Lifecycle::new(
            Arc::clone(&short_term),
            Arc::clone(&long_term),
            syncer,
            inactive_days,
        ));
        Fixture {
            dir,
            short_term,
            long_term,
            lifecycle,
        }
    }

    #[tokio::test]
    async fn pass_expires_promotes_and_syncs() {
        let f = fixture(90);
        let stale = f
            .short_term
            .add(NewMemory::new(Category::Note, "stale", "old note").expires_at(Some(Utc::now() - chrono::Duration::hours(1))))
            .unwrap();
        let hot = f.short_term.add_context("hot", "frequently used context", Scope::Global).unwrap();
        f.short_term.touch(&hot.id).unwrap();
        f.short_term.touch(&hot.id).unwrap();

        let report = f.lifecycle.run_once(&CancellationToken::new()).await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.expired, 1);
        assert_eq!(report.promoted.len(), 1);
        assert_eq!(f.short_term.find_by_id(&stale.id).unwrap().status, Status::Expired);

        assert!(f.short_term.find_by_id(&hot.id).unwrap_err().is_not_found());
        let promoted = f.long_term.find_by_id(&report.promoted[0].1).unwrap();
        assert_eq!(promoted.content, "frequently used context");
        assert_eq!(promoted.category, Category::Knowledge);
        assert!(promoted.tags.contains(&"promoted".to_string()));
        let sync = report.sync.unwrap();
        assert_eq!((sync.created, sync.deleted), (0, 0));
    }

    #[tokio::test]
    async fn inactive_long_term_is_archived() {
        let f = fixture(-1);
        let cancel = CancellationToken::new();
        let m = f
            .long_term
            .add(NewMemory::new(Category::Knowledge, "k", "v"), &cancel)
            .await
            .unwrap();
        let report = f.lifecycle.run_once(&cancel).await;
        assert_eq!(report.archived, 1);
        assert_eq!(f.long_term.find_by_id(&m.id).unwrap().status, Status::Archived);
    }

    #[tokio::test]
    async fn one_failing_step_does_not_block_others() {
        let f = fixture(90);
        f.short_term
            .add(NewMemory::new(Category::Note, "stale", "old").expires_at(Some(Utc::now() - chrono::Duration::hours(1))))
            .unwrap();
        let knowledge_dir = f.dir.path().join("g/long_term/knowledge");
        std::fs::write(knowledge_dir.join("broken.md"), "+++\nnot = = toml\n+++\n\nbody\n").unwrap();
        let report = f.lifecycle.run_once(&CancellationToken::new()).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.sync.unwrap().errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_runs_and_shuts_down() {
        let f = fixture(90);
        let handle = Arc::clone(&f.lifecycle).spawn(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
