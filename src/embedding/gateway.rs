//! Batching, retrying, caching front for an [`EmbeddingProvider`].
//!
//! Items that still fail after every retry are parked in an offline queue
//! instead of being dropped. Nothing here runs on its own schedule: callers
//! invoke [`EmbeddingGateway::drain_queue`] when they want the queue retried.
//! The gateway only produces vectors; callers decide which vector store each
//! item belongs to (an [`EmbedItem`] carries its scope for that purpose).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::memory::types::Scope;

/// One memory waiting for an embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedItem {
    pub id: String,
    pub scope: Scope,
    pub text: String,
    /// Hash of the content the text was built from; cache key alongside `id`.
    pub content_hash: String,
}

/// Result of one [`EmbeddingGateway::embed_items`] or drain pass.
#[derive(Debug, Default)]
pub struct EmbedOutcome {
    /// Items with their vectors, including cache hits.
    pub embedded: Vec<(EmbedItem, Vec<f32>)>,
    /// Ids served from the cache without a provider call.
    pub cached: usize,
    /// Ids parked in the offline queue.
    pub queued: Vec<String>,
    pub errors: Vec<String>,
}

struct CachedVector {
    content_hash: String,
    vector: Vec<f32>,
}

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_attempts: u32,
    retry_base: Duration,
    cache: Mutex<HashMap<String, CachedVector>>,
    queue: Mutex<VecDeque<EmbedItem>>,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
            cache: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimensions()
    }

    /// Blocking single embed for a query: retried, never cached or queued.
    pub async fn embed_query(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let provider = Arc::clone(&self.provider);
        let owned = text.to_string();
        let mut vectors = self
            .with_retry("embed_query", cancel, move || {
                let provider = Arc::clone(&provider);
                let owned = owned.clone();
                async move { provider.embed(&owned).await.map(|v| vec![v]) }
            })
            .await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| Error::upstream("embed_query", "provider returned no vector"))?;
        self.check_dimension("embed_query", &vector)?;
        Ok(vector)
    }

    /// Embed `items` in batches. Cache hits skip the provider; items that keep
    /// failing are queued. A failed batch falls back to per-item calls so one bad
    /// item never sinks its siblings. On cancellation every item not yet embedded
    /// is queued and `Cancelled` is returned.
    pub async fn embed_items(&self, items: Vec<EmbedItem>, cancel: &CancellationToken) -> Result<EmbedOutcome> {
        let mut outcome = EmbedOutcome::default();
        let mut pending = Vec::new();
        {
            let cache = self.cache()?;
            for item in items {
                match cache.get(&item.id) {
                    Some(hit) if hit.content_hash == item.content_hash => {
                        outcome.cached += 1;
                        let vector = hit.vector.clone();
                        outcome.embedded.push((item, vector));
                    }
                    _ => pending.push(item),
                }
            }
        }

        let mut remaining: VecDeque<EmbedItem> = pending.into();
        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                self.park(remaining.drain(..), &mut outcome)?;
                return Err(Error::cancelled("embed_items"));
            }
            let take = self.batch_size.min(remaining.len());
            let batch: Vec<EmbedItem> = remaining.drain(..take).collect();

            match self.embed_batch(&batch, cancel).await {
                Ok(vectors) => {
                    for (item, vector) in batch.into_iter().zip(vectors) {
                        self.accept(item, vector, &mut outcome)?;
                    }
                }
                Err(e) if e.kind == ErrorKind::Cancelled => {
                    self.park(batch.into_iter().chain(remaining.drain(..)), &mut outcome)?;
                    return Err(e);
                }
                Err(e) => {
                    debug!(error = %e, size = batch.len(), "batch embed failed, retrying items one by one");
                    for (pos, item) in batch.iter().enumerate() {
                        match self.embed_single(&item.text, cancel).await {
                            Ok(vector) => self.accept(item.clone(), vector, &mut outcome)?,
                            Err(e) if e.kind == ErrorKind::Cancelled => {
                                let rest = batch[pos..].iter().cloned();
                                self.park(rest.chain(remaining.drain(..)), &mut outcome)?;
                                return Err(e);
                            }
                            Err(e) => {
                                warn!(id = %item.id, error = %e, "embedding failed, queued for retry");
                                outcome.errors.push(format!("{}: {e}", item.id));
                                self.park(std::iter::once(item.clone()), &mut outcome)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Add an item to the offline queue, replacing any older entry for its id.
    pub fn enqueue(&self, item: EmbedItem) -> Result<()> {
        let mut queue = self.queue()?;
        queue.retain(|q| q.id != item.id);
        queue.push_back(item);
        Ok(())
    }

    /// Retry everything in the offline queue. Items that fail again are re-queued.
    pub async fn drain_queue(&self, cancel: &CancellationToken) -> Result<EmbedOutcome> {
        let items: Vec<EmbedItem> = self.queue()?.drain(..).collect();
        if items.is_empty() {
            return Ok(EmbedOutcome::default());
        }
        debug!(count = items.len(), "draining embedding queue");
        self.embed_items(items, cancel).await
    }

    /// Number of queued items.
    pub fn pending(&self) -> usize {
        self.queue().map(|q| q.len()).unwrap_or(0)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.queue()
            .map(|q| q.iter().map(|i| i.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop cached and queued state for `id` (after delete or content change).
    pub fn invalidate(&self, id: &str) {
        if let Ok(mut cache) = self.cache() {
            cache.remove(id);
        }
        if let Ok(mut queue) = self.queue() {
            queue.retain(|q| q.id != id);
        }
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn cache(&self) -> Result<MutexGuard<'_, HashMap<String, CachedVector>>> {
        self.cache
            .lock()
            .map_err(|_| Error::new(ErrorKind::Operation, "embedding_cache", "lock poisoned"))
    }

    fn queue(&self) -> Result<MutexGuard<'_, VecDeque<EmbedItem>>> {
        self.queue
            .lock()
            .map_err(|_| Error::new(ErrorKind::Operation, "embedding_queue", "lock poisoned"))
    }

    fn accept(&self, item: EmbedItem, vector: Vec<f32>, outcome: &mut EmbedOutcome) -> Result<()> {
        if let Err(e) = self.check_dimension("embed_items", &vector) {
            outcome.errors.push(format!("{}: {e}", item.id));
            return self.park(std::iter::once(item), outcome);
        }
        self.cache()?.insert(
            item.id.clone(),
            CachedVector {
                content_hash: item.content_hash.clone(),
                vector: vector.clone(),
            },
        );
        outcome.embedded.push((item, vector));
        Ok(())
    }

    fn park(&self, items: impl Iterator<Item = EmbedItem>, outcome: &mut EmbedOutcome) -> Result<()> {
        for item in items {
            outcome.queued.push(item.id.clone());
            self.enqueue(item)?;
        }
        Ok(())
    }

    fn check_dimension(&self, op: &'static str, vector: &[f32]) -> Result<()> {
        let expected = self.provider.dimensions();
        if vector.len() != expected {
            return Err(Error::upstream(
                op,
                format!("provider returned dimension {}, expected {expected}", vector.len()),
            ));
        }
        Ok(())
    }

    async fn embed_batch(&self, batch: &[EmbedItem], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let provider = Arc::clone(&self.provider);
        let texts: Vec<String> = batch.iter().map(|i| i.text.clone()).collect();
        let expected = texts.len();
        let vectors = self
            .with_retry("embed_batch", cancel, move || {
                let provider = Arc::clone(&provider);
                let texts = texts.clone();
                async move {
                    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                    provider.embed_batch(&refs).await
                }
            })
            .await?;
        if vectors.len() != expected {
            return Err(Error::upstream(
                "embed_batch",
                format!("provider returned {} vectors for {expected} texts", vectors.len()),
            ));
        }
        Ok(vectors)
    }

    async fn embed_single(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let provider = Arc::clone(&self.provider);
        let owned = text.to_string();
        let mut vectors = self
            .with_retry("embed_item", cancel, move || {
                let provider = Arc::clone(&provider);
                let owned = owned.clone();
                async move { provider.embed(&owned).await.map(|v| vec![v]) }
            })
            .await?;
        vectors
            .pop()
            .ok_or_else(|| Error::upstream("embed_item", "provider returned no vector"))
    }

    /// Run `call` up to `max_attempts` times with exponential backoff
    /// (`retry_base * 2^attempt`). Cancellation aborts both the in-flight call
    /// and the backoff sleep.
    async fn with_retry<F, Fut>(&self, op: &'static str, cancel: &CancellationToken, call: F) -> Result<Vec<Vec<f32>>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Vec<f32>>>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled(op)),
                r = call() => r,
            };
            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) if attempt + 1 < self.max_attempts => {
                    let delay = backoff_delay(self.retry_base, attempt);
                    warn!(
                        provider = self.provider.name(),
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after embedding error"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::cancelled(op)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    last_err = Some(e);
                }
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }
        let cause = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(Error::upstream(op, format!("gave up after {} attempts: {cause}", self.max_attempts)))
    }
}

/// `base * 2^attempt`, saturating instead of overflowing for large attempt counts.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call whose text contains "bad"; batch calls fail if any do.
    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for Flaky {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("bad") || n < self.fail_first {
                return Err(Error::upstream("embed", "service unavailable"));
            }
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("bad")) {
                return Err(Error::upstream("embed_batch", "one item rejected"));
            }
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size: 2,
            max_attempts: 2,
            retry_base_ms: 1,
            ..EmbeddingConfig::default()
        }
    }

    fn item(id: &str, text: &str) -> EmbedItem {
        EmbedItem {
            id: id.into(),
            scope: Scope::Global,
            text: text.into(),
            content_hash: format!("hash-{text}"),
        }
    }

    fn gateway(fail_first: usize) -> EmbeddingGateway {
        let provider = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first,
        });
        EmbeddingGateway::new(provider, &config())
    }

    #[tokio::test]
    async fn failing_item_is_queued_without_blocking_siblings() {
        let gw = gateway(0);
        let cancel = CancellationToken::new();
        let out = gw
            .embed_items(vec![item("a", "good one"), item("b", "bad one"), item("c", "fine")], &cancel)
            .await
            .unwrap();
        let ids: Vec<&str> = out.embedded.iter().map(|(i, _)| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(out.queued, vec!["b".to_string()]);
        assert_eq!(gw.pending(), 1);
        assert_eq!(out.errors.len(), 1);
    }

    #[tokio::test]
    async fn retry_recovers_transient_failure() {
        let gw = gateway(1);
        let cancel = CancellationToken::new();
        let v = gw.embed_query("hello", &cancel).await.unwrap();
        assert_eq!(v, vec![5.0, 1.0]);
    }

    #[tokio::test]
    async fn cache_hits_skip_provider_until_hash_changes() {
        let gw = gateway(0);
        let cancel = CancellationToken::new();
        gw.embed_items(vec![item("a", "alpha")], &cancel).await.unwrap();
        let again = gw.embed_items(vec![item("a", "alpha")], &cancel).await.unwrap();
        assert_eq!(again.cached, 1);

        let changed = gw.embed_items(vec![item("a", "alpha beta")], &cancel).await.unwrap();
        assert_eq!(changed.cached, 0);
        assert_eq!(changed.embedded[0].1, vec![10.0, 1.0]);

        gw.invalidate("a");
        let after = gw.embed_items(vec![item("a", "alpha beta")], &cancel).await.unwrap();
        assert_eq!(after.cached, 0);
    }

    #[tokio::test]
    async fn drain_requeues_items_that_fail_again() {
        let gw = gateway(0);
        let cancel = CancellationToken::new();
        gw.enqueue(item("x", "bad input")).unwrap();
        gw.enqueue(item("y", "ok input")).unwrap();
        gw.enqueue(item("y", "ok input")).unwrap();
        assert_eq!(gw.pending(), 2);

        let out = gw.drain_queue(&cancel).await.unwrap();
        assert_eq!(out.embedded.len(), 1);
        assert_eq!(gw.pending_ids(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn cancellation_queues_remaining_items() {
        let gw = gateway(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = gw
            .embed_items(vec![item("a", "one"), item("b", "two")], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(gw.pending(), 2);
        assert!(gw.embed_query("q", &cancel).await.is_err());
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(200);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(1600));
        assert_eq!(backoff_delay(base, 40), base * u32::MAX);
        assert_eq!(backoff_delay(Duration::MAX, 2), Duration::MAX);
    }
}
