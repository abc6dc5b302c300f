//! Session-size guard: summarize and evict old turns past the high-water mark.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::session::SessionManager;
use super::short_term::ShortTermMemory;
use super::tier::{NewMemory, TierManager};
use super::types::Category;
use crate::completion::Summarizer;
use crate::config::SessionConfig;
use crate::error::{Error, Result};

#[derive(Debug, Default, Serialize)]
pub struct TrimReport {
    pub trimmed: bool,
    pub removed_messages: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub summary_created: bool,
    pub summary_id: Option<String>,
    pub summary_error: Option<String>,
}

pub struct SessionTrimmer {
    session: Arc<SessionManager>,
    short_term: Arc<ShortTermMemory>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: SessionConfig,
}

impl SessionTrimmer {
    pub fn new(
        session: Arc<SessionManager>,
        short_term: Arc<ShortTermMemory>,
        summarizer: Option<Arc<dyn Summarizer>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            session,
            short_term,
            summarizer,
            config,
        }
    }

    pub fn needs_trim(&self) -> Result<bool> {
        Ok(self.session.usage_ratio()? >= self.config.high_water_ratio)
    }

    pub async fn trim_if_needed(&self, cancel: &CancellationToken) -> Result<Option<TrimReport>> {
        if !self.needs_trim()? {
            return Ok(None);
        }
        self.trim(cancel).await.map(Some)
    }

    /// Keep the last `protected_turns` messages and replace everything before
    /// them with a short-term context memory summarizing it.
    ///
    /// A failed summary does not stop the trim; it is reported on the result.
    /// Cancellation before the messages are replaced leaves the session as it was.
    pub async fn trim(&self, cancel: &CancellationToken) -> Result<TrimReport> {
        let Some(snapshot) = self.session.current()? else {
            return Ok(TrimReport::default());
        };
        let messages = snapshot.messages;
        let tokens_before: usize = messages.iter().map(|m| m.tokens).sum();
        let protected = self.config.protected_turns;
        if messages.len() <= protected {
            return Ok(TrimReport {
                tokens_before,
                tokens_after: tokens_before,
                ..TrimReport::default()
            });
        }
        let removed = &messages[..messages.len() - protected];

        let summary = match &self.summarizer {
            Some(summarizer) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled("trim_session")),
                result = summarizer.summarize(removed) => result,
            },
            None => Err(Error::invalid("trim_session", "no summarizer configured")),
        };

        let mut report = TrimReport {
            trimmed: true,
            removed_messages: removed.len(),
            tokens_before,
            ..TrimReport::default()
        };
        match summary.and_then(|text| self.store_summary(text)) {
            Ok(id) => {
                report.summary_created = true;
                report.summary_id = Some(id);
            }
            Err(e) => {
                warn!(error = %e, "session summary failed; trimming anyway");
                report.summary_error = Some(e.to_string());
            }
        }

        // Turns appended while the summary was written stay in the tail.
        let session = self.session.drop_oldest(&snapshot.id, removed.len())?;
        report.tokens_after = session.token_count;
        info!(
            session = %session.id,
            removed = report.removed_messages,
            tokens_before,
            tokens_after = report.tokens_after,
            summary = report.summary_created,
            "session trimmed"
        );
        Ok(report)
    }

    fn store_summary(&self, text: String) -> Result<String> {
        let scope = self.short_term.store().roots().default_scope();
        let title = format!("Session summary {}", Utc::now().format("%Y-%m-%d %H:%M"));
        let memory = self.short_term.add_with_ttl(
            NewMemory::new(Category::Context, title, text)
                .scope(scope)
                .tags(vec!["session-summary".to_string()]),
            Duration::hours(self.config.summary_ttl_hours),
        )?;
        Ok(memory.id)
    }
}
