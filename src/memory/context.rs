//! Token-budgeted context assembly across the tiers.
//!
//! The total budget is split by fixed ratios. Every tier section stops at the
//! first whole entry that would overrun its share; nothing is cut mid-entry.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::core::CoreMemory;
use super::long_term::LongTermMemory;
use super::search::{Retriever, SearchOptions};
use super::session::SessionManager;
use super::short_term::ShortTermMemory;
use super::tier::{bullet, render_section, Section, TierManager};
use super::types::{Memory, Tier};
use crate::config::{ContextConfig, RetrievalConfig};
use crate::error::{Error, Result};

/// Per-tier token shares. The five parts always sum to `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextBudget {
    pub total: usize,
    pub core: usize,
    pub session: usize,
    pub short_term: usize,
    pub long_term: usize,
    pub reserved: usize,
}

impl ContextBudget {
    /// Floor each ratio's share; rounding slack goes to `reserved`.
    pub fn from_config(config: &ContextConfig) -> Self {
        let total = config.total_tokens;
        let share = |ratio: f64| ((total as f64) * ratio.clamp(0.0, 1.0) + 1e-9).floor() as usize;
        let core = share(config.core_ratio);
        let session = share(config.session_ratio);
        let short_term = share(config.short_term_ratio);
        let long_term = share(config.long_term_ratio);
        let allotted = core + session + short_term + long_term;
        let (core, session, short_term, long_term) = if allotted > total {
            // Ratios over 1.0: scale the four shares down to fit.
            let scale = total as f64 / allotted as f64;
            let fit = |n: usize| ((n as f64) * scale).floor() as usize;
            (fit(core), fit(session), fit(short_term), fit(long_term))
        } else {
            (core, session, short_term, long_term)
        };
        Self {
            total,
            core,
            session,
            short_term,
            long_term,
            reserved: total - (core + session + short_term + long_term),
        }
    }

    pub fn sum(&self) -> usize {
        self.core + self.session + self.short_term + self.long_term + self.reserved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextWarning {
    SessionHigh { ratio: f64 },
    SessionCritical { ratio: f64 },
    CoreOverLimit { tokens: usize, limit: usize },
}

impl fmt::Display for ContextWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionHigh { ratio } => write!(f, "session at {:.0}% of its token budget", ratio * 100.0),
            Self::SessionCritical { ratio } => {
                write!(f, "session at {:.0}% of its token budget; trim recommended", ratio * 100.0)
            }
            Self::CoreOverLimit { tokens, limit } => {
                write!(f, "core memory uses {tokens} tokens, over its {limit} token limit")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSection {
    pub tier: Tier,
    pub text: String,
    pub tokens: usize,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuiltContext {
    pub text: String,
    pub sections: Vec<ContextSection>,
    pub tokens_used: usize,
    pub budget: ContextBudget,
    pub warnings: Vec<ContextWarning>,
}

pub struct ContextBuilder {
    core: Arc<CoreMemory>,
    session: Arc<SessionManager>,
    short_term: Arc<ShortTermMemory>,
    long_term: Arc<LongTermMemory>,
    retriever: Arc<Retriever>,
    config: ContextConfig,
    retrieval_top_k: usize,
}

impl ContextBuilder {
    pub fn new(
        core: Arc<CoreMemory>,
        session: Arc<SessionManager>,
        short_term: Arc<ShortTermMemory>,
        long_term: Arc<LongTermMemory>,
        retriever: Arc<Retriever>,
        config: ContextConfig,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            core,
            session,
            short_term,
            long_term,
            retriever,
            config,
            retrieval_top_k: retrieval.top_k,
        }
    }

    pub fn budget(&self) -> ContextBudget {
        ContextBudget::from_config(&self.config)
    }

    /// Core memory, recent short-term and high-importance long-term.
    pub fn build_for_new_session(&self) -> Result<BuiltContext> {
        let budget = self.budget();
        let core = self.core.build_context(budget.core)?;
        let short_term = self.short_term.build_context(budget.short_term)?;
        let important = self.long_term.high_importance(self.config.high_importance)?;
        let long_term = render_section("Important Knowledge", &important, budget.long_term, bullet);
        self.assemble(
            budget,
            vec![(Tier::Core, core), (Tier::ShortTerm, short_term), (Tier::LongTerm, long_term)],
        )
    }

    /// Core memory, memories retrieved for `query`, and short-term.
    pub async fn build_for_query(&self, query: &str, cancel: &CancellationToken) -> Result<BuiltContext> {
        if query.trim().is_empty() {
            return Err(Error::invalid("build_context", "query is empty"));
        }
        let budget = self.budget();
        let core = self.core.build_context(budget.core)?;

        let options = SearchOptions::default()
            .top_k(self.retrieval_top_k)
            .tiers(vec![Tier::LongTerm]);
        let hits: Vec<Memory> = self
            .retriever
            .search(query, &options, cancel)
            .await?
            .into_iter()
            .map(|hit| hit.memory)
            .collect();
        let relevant = render_section("Relevant Memories", &hits, budget.long_term, bullet);
        let short_term = self.short_term.build_context(budget.short_term)?;

        self.assemble(
            budget,
            vec![(Tier::Core, core), (Tier::LongTerm, relevant), (Tier::ShortTerm, short_term)],
        )
    }

    /// Session and core thresholds currently crossed.
    pub fn warnings(&self) -> Result<Vec<ContextWarning>> {
        let mut warnings = Vec::new();
        let ratio = self.session.usage_ratio()?;
        if ratio >= self.config.session_critical_ratio {
            warnings.push(ContextWarning::SessionCritical { ratio });
        } else if ratio >= self.config.session_warn_ratio {
            warnings.push(ContextWarning::SessionHigh { ratio });
        }
        let tokens = self.core.total_tokens()?;
        if tokens > self.config.core_limit_tokens {
            warnings.push(ContextWarning::CoreOverLimit {
                tokens,
                limit: self.config.core_limit_tokens,
            });
        }
        Ok(warnings)
    }

    fn assemble(&self, budget: ContextBudget, parts: Vec<(Tier, Section)>) -> Result<BuiltContext> {
        let sections: Vec<ContextSection> = parts
            .into_iter()
            .filter(|(_, s)| !s.text.is_empty())
            .map(|(tier, s)| ContextSection {
                tier,
                text: s.text,
                tokens: s.tokens,
                ids: s.ids,
            })
            .collect();
        let text = sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let tokens_used = sections.iter().map(|s| s.tokens).sum();
        let warnings = self.warnings()?;
        debug!(tokens_used, sections = sections.len(), warnings = warnings.len(), "context built");
        Ok(BuiltContext {
            text,
            sections,
            tokens_used,
            budget,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShortTermConfig;
    use crate::memory::roots::{Roots, StoreBackend};
    use crate::memory::tier::NewMemory;
    use crate::memory::types::{Category, Role, Scope, SessionMessage};
    use crate::storage::StorageLayout;

    #[test]
    fn budget_conserves_total() {
        let configs = [
            ContextConfig::default(),
            ContextConfig {
                total_tokens: 1001,
                ..ContextConfig::default()
            },
            ContextConfig {
                total_tokens: 7,
                core_ratio: 0.33,
                session_ratio: 0.33,
                short_term_ratio: 0.33,
                long_term_ratio: 0.33,
                reserved_ratio: 0.0,
                ..ContextConfig::default()
            },
            ContextConfig {
                total_tokens: 0,
                ..ContextConfig::default()
            },
        ];
        for config in configs {
            let budget = ContextBudget::from_config(&config);
            assert_eq!(budget.sum(), config.total_tokens, "{config:?}");
        }
        let default = ContextBudget::from_config(&ContextConfig::default());
        assert_eq!(
            (default.core, default.session, default.short_term, default.long_term, default.reserved),
            (1200, 2800, 1200, 2000, 800)
        );
    }

    fn builder(config: ContextConfig) -> (tempfile::TempDir, ContextBuilder, Arc<SessionManager>, Arc<CoreMemory>) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("g"), ".strata", 40);
        let roots = Arc::new(Roots::open(layout, StoreBackend::InMemory, 8).unwrap());
        let core = Arc::new(CoreMemory::new(Arc::clone(&roots)));
        let session = Arc::new(SessionManager::new(Arc::clone(&roots), 100));
        let short_term = Arc::new(ShortTermMemory::new(Arc::clone(&roots), ShortTermConfig::default()));
        let long_term = Arc::new(LongTermMemory::new(Arc::clone(&roots), None));
        let retriever = Arc::new(Retriever::new(Arc::clone(&roots), None, RetrievalConfig::default()));
        let builder = ContextBuilder::new(
            Arc::clone(&core),
            Arc::clone(&session),
            short_term,
            long_term,
            retriever,
            config,
            &RetrievalConfig::default(),
        );
        (dir, builder, session, core)
    }

    #[tokio::test]
    async fn new_session_context_has_core_short_and_important() {
        let (_dir, b, _session, core) = builder(ContextConfig::default());
        core.add_preference("Editor", "vim", vec![]).unwrap();
        b.short_term.add_task("Ship", "cut release branch", Scope::Global).unwrap();
        let cancel = CancellationToken::new();
        b.long_term
            .add(NewMemory::new(Category::Decision, "Storage", "sqlite everywhere").importance(5), &cancel)
            .await
            .unwrap();
        b.long_term
            .add(NewMemory::new(Category::Knowledge, "Trivia", "minor detail").importance(1), &cancel)
            .await
            .unwrap();

        let ctx = b.build_for_new_session().unwrap();
        assert!(ctx.text.contains("## Core Memory"));
        assert!(ctx.text.contains("cut release branch"));
        assert!(ctx.text.contains("sqlite everywhere"));
        assert!(!ctx.text.contains("minor detail"));
        assert!(ctx.tokens_used <= ctx.budget.total);
        assert_eq!(ctx.sections.len(), 3);
    }

    #[tokio::test]
    async fn query_context_respects_long_term_share() {
        let config = ContextConfig {
            total_tokens: 200,
            ..ContextConfig::default()
        };
        let (_dir, b, _session, _core) = builder(config);
        let cancel = CancellationToken::new();
        for i in 0..10 {
            b.long_term
                .add(
                    NewMemory::new(Category::Knowledge, format!("Deploy {i}"), "deploy steps ".repeat(5)),
                    &cancel,
                )
                .await
                .unwrap();
        }
        let ctx = b.build_for_query("deploy", &cancel).await.unwrap();
        let relevant = ctx.sections.iter().find(|s| s.tier == Tier::LongTerm).unwrap();
        assert!(relevant.tokens <= ctx.budget.long_term);
        assert!(relevant.ids.len() < 10);
        assert!(b.build_for_query("  ", &cancel).await.is_err());
    }

    #[test]
    fn warnings_fire_at_thresholds() {
        let config = ContextConfig {
            core_limit_tokens: 5,
            ..ContextConfig::default()
        };
        let (_dir, b, session, core) = builder(config);
        assert!(b.warnings().unwrap().is_empty());

        session.append_message(SessionMessage::new(Role::User, "x".repeat(216))).unwrap();
        assert!(matches!(b.warnings().unwrap()[..], [ContextWarning::SessionHigh { .. }]));
        session.append_message(SessionMessage::new(Role::User, "x".repeat(60))).unwrap();
        assert!(matches!(b.warnings().unwrap()[..], [ContextWarning::SessionCritical { .. }]));

        core.add_rule("Long rule", &"r".repeat(60), vec![]).unwrap();
        assert!(b
            .warnings()
            .unwrap()
            .iter()
            .any(|w| matches!(w, ContextWarning::CoreOverLimit { limit: 5, .. })));
    }
}
