//! Pattern-based decision of whether user input is worth remembering, and where.
//!
//! Families are tried in a fixed order (preference, rule, temporal,
//! project-plus-declarative, declarative) and the first match wins. Every family
//! carries English and Chinese phrasings. The classifier holds only compiled
//! patterns, so the same input always yields the same result.

use chrono::Duration;
use regex::Regex;
use serde::Serialize;

use crate::config::{ClassifierConfig, ShortTermConfig};
use crate::error::{Error, Result};
use crate::memory::types::{Category, Scope, Tier};

/// Technology keywords recognised as tags.
const TECH_KEYWORDS: &[&str] = &[
    "rust", "go", "golang", "python", "javascript", "typescript", "java", "kotlin", "swift", "ruby", "php",
    "c", "c++", "c#", "scala", "haskell", "elixir", "lua", "bash", "zsh", "fish", "powershell", "sql",
    "vim", "neovim", "emacs", "vscode", "intellij", "git", "github", "gitlab", "docker", "kubernetes", "k8s",
    "helm", "terraform", "ansible", "linux", "macos", "windows", "aws", "gcp", "azure", "postgres",
    "postgresql", "mysql", "sqlite", "redis", "mongodb", "kafka", "graphql", "grpc", "rest", "http", "json",
    "yaml", "toml", "react", "vue", "angular", "svelte", "node", "nodejs", "deno", "npm", "cargo", "tokio",
    "axum", "django", "flask", "fastapi", "spring", "llm", "api", "ci", "cd", "nginx", "webpack", "vite",
];

/// Recommendation produced for one input. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub should_store: bool,
    pub tier: Tier,
    pub category: Category,
    pub scope: Scope,
    pub title: String,
    pub tags: Vec<String>,
    /// Only set for short-term recommendations.
    #[serde(skip)]
    pub ttl: Option<Duration>,
    pub confidence: f32,
    pub reason: String,
}

impl Classification {
    fn skip(reason: &str) -> Self {
        Self {
            should_store: false,
            tier: Tier::LongTerm,
            category: Category::Knowledge,
            scope: Scope::Global,
            title: String::new(),
            tags: Vec::new(),
            ttl: None,
            confidence: 0.0,
            reason: reason.to_string(),
        }
    }
}

pub struct Classifier {
    min_length: usize,
    max_title_len: usize,
    task_ttl: Duration,
    note_ttl: Duration,
    context_ttl: Duration,
    question: Regex,
    preference: Regex,
    rule: Regex,
    temporal: Regex,
    task: Regex,
    ongoing: Regex,
    project: Regex,
    declarative: Regex,
    decision: Regex,
    sentence_end: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::invalid("compile_classifier", e.to_string()))
}

impl Classifier {
    pub fn new(config: &ClassifierConfig, short_term: &ShortTermConfig) -> Result<Self> {
        Ok(Self {
            min_length: config.min_length,
            max_title_len: config.max_title_len,
            task_ttl: Duration::hours(short_term.task_ttl_hours),
            note_ttl: Duration::hours(short_term.note_ttl_hours),
            context_ttl: Duration::hours(short_term.context_ttl_hours),
            question: compile(
                r"(?i)([?？]\s*$|^\s*(what|why|how|when|where|who|which|can you|could you|do you|does|is it|are there)\b|吗[?？]?\s*$|^(什么|为什么|怎么|如何|哪))",
            )?,
            preference: compile(
                r"(?i)(\bi\s+(always|usually|generally|normally|prefer|like|love|hate|dislike|tend to|never|enjoy)\b|\bmy\s+(favou?rite|preferred|go-to)\b|\bi'?m\s+used\s+to\b|我(习惯|喜欢|偏好|更喜欢|通常|一般|总是|讨厌|不喜欢))",
            )?,
            rule: compile(
                r"(?i)(^\s*(always|never|don'?t|do not|must|make sure|remember to|please always|please never)\b|\b(you\s+(must|should)\s+(always|never)|from now on|in the future,? (always|never))\b|(必须|一定要|不要|永远不要|请总是|请不要|记住要|以后都))",
            )?,
            temporal: compile(
                r"(?i)(\b(today|tonight|tomorrow|this (morning|afternoon|evening|week|month)|next (week|month)|by (monday|tuesday|wednesday|thursday|friday|saturday|sunday|eod|end of day)|deadline|due|todo|to-do|remind me|need to|have to|right now|currently|working on)\b|(今天|今晚|明天|后天|本周|这周|下周|截止|待办|提醒我|需要|目前|正在|现在))",
            )?,
            task: compile(
                r"(?i)(\b(todo|to-do|remind me|need to|have to|deadline|due|by (monday|tuesday|wednesday|thursday|friday|saturday|sunday|eod|end of day))\b|(待办|提醒我|需要|截止))",
            )?,
            ongoing: compile(r"(?i)(\b(right now|currently|working on|at the moment)\b|(目前|正在|现在))")?,
            project: compile(
                r"(?i)(\b(this|the|our)\s+(project|repo|repository|codebase|service|app)\b|\bin this (repo|codebase)\b|(这个项目|本项目|项目里|项目中|代码库|仓库))",
            )?,
            declarative: compile(
                r"(?i)(\b(is|are|was|were|uses|use|using|means|requires|supports|runs|lives|stores|depends on|decided|chose|should)\b|(是|使用|用的|采用|依赖|需要|决定|运行|存放|位于))",
            )?,
            decision: compile(
                r"(?i)(\b(we|i)\s+(decided|chose|agreed|settled on)\b|\bgoing with\b|\bdecision\b|(决定|选择了|定下来))",
            )?,
            sentence_end: compile(r"[.!?。！？\n]")?,
        })
    }

    pub fn from_config(config: &crate::config::StrataConfig) -> Result<Self> {
        Self::new(&config.classifier, &config.short_term)
    }

    /// Default TTL for a short-term category.
    pub fn ttl_for(&self, category: Category) -> Option<Duration> {
        match category {
            Category::Task => Some(self.task_ttl),
            Category::Note => Some(self.note_ttl),
            Category::Context => Some(self.context_ttl),
            _ => None,
        }
    }

    pub fn classify(&self, text: &str) -> Classification {
        let text = text.trim();
        if text.chars().count() < self.min_length {
            return Classification::skip("input too short");
        }
        if self.question.is_match(text) {
            return Classification::skip("questions are not memories");
        }

        let recommend = |tier: Tier, category: Category, scope: Scope, confidence: f32, reason: &str| {
            Classification {
                should_store: true,
                tier,
                category,
                scope,
                title: self.title(text),
                tags: extract_tags(text),
                ttl: self.ttl_for(category).filter(|_| tier == Tier::ShortTerm),
                confidence,
                reason: reason.to_string(),
            }
        };

        if self.preference.is_match(text) {
            return recommend(Tier::Core, Category::Preference, Scope::Global, 0.9, "preference expression");
        }
        if self.rule.is_match(text) {
            return recommend(Tier::Core, Category::Rule, Scope::Global, 0.85, "imperative rule");
        }
        if self.temporal.is_match(text) {
            let category = if self.task.is_match(text) {
                Category::Task
            } else if self.ongoing.is_match(text) {
                Category::Context
            } else {
                Category::Note
            };
            return recommend(Tier::ShortTerm, category, Scope::Project, 0.75, "temporal expression");
        }
        let declarative = self.declarative.is_match(text);
        if declarative && self.project.is_match(text) {
            let category = if self.decision.is_match(text) {
                Category::Decision
            } else {
                Category::Project
            };
            return recommend(Tier::LongTerm, category, Scope::Project, 0.7, "project fact");
        }
        if declarative {
            let category = if self.decision.is_match(text) {
                Category::Decision
            } else {
                Category::Knowledge
            };
            return recommend(Tier::LongTerm, category, Scope::Global, 0.6, "declarative knowledge");
        }
        Classification::skip("no memory pattern matched")
    }

    /// First sentence, capped at `max_title_len` characters.
    pub fn title(&self, text: &str) -> String {
        let first = self
            .sentence_end
            .split(text.trim())
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("");
        first.chars().take(self.max_title_len).collect::<String>().trim_end().to_string()
    }
}

/// Dictionary technology keywords present in `text`, in first-seen order.
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let lower = text.to_lowercase();
    for token in lower.split(|c: char| !(c.is_ascii_alphanumeric() || c == '+' || c == '#')) {
        let token = token.trim_end_matches(['.', ',']);
        if token.is_empty() {
            continue;
        }
        if TECH_KEYWORDS.contains(&token) && !tags.iter().any(|t| t == token) {
            tags.push(token.to_string());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(&ClassifierConfig::default(), &ShortTermConfig::default()).unwrap()
    }

    #[test]
    fn chinese_and_english_preferences_go_to_core() {
        let c = classifier();
        for input in ["我习惯使用 vim 编辑器", "I always use vim"] {
            let r = c.classify(input);
            assert!(r.should_store, "{input}");
            assert_eq!(r.tier, Tier::Core);
            assert_eq!(r.category, Category::Preference);
            assert_eq!(r.scope, Scope::Global);
            assert_eq!(r.tags, vec!["vim".to_string()]);
            assert!(r.ttl.is_none());
        }
    }

    #[test]
    fn rules_go_to_core() {
        let r = classifier().classify("Never commit directly to main.");
        assert_eq!((r.tier, r.category), (Tier::Core, Category::Rule));
        assert_eq!(r.title, "Never commit directly to main");
    }

    #[test]
    fn temporal_routes_to_short_term_with_ttl() {
        let c = classifier();
        let task = c.classify("I need to fix the login bug tomorrow");
        assert_eq!((task.tier, task.category), (Tier::ShortTerm, Category::Task));
        assert_eq!(task.ttl, Some(Duration::hours(168)));

        let ctx = c.classify("Currently refactoring the parser module");
        assert_eq!(ctx.category, Category::Context);
        assert_eq!(ctx.ttl, Some(Duration::hours(24)));

        let note = c.classify("The demo went well today");
        assert_eq!(note.category, Category::Note);
        assert_eq!(note.ttl, Some(Duration::hours(72)));
    }

    #[test]
    fn project_declarative_and_plain_declarative() {
        let c = classifier();
        let p = c.classify("This project uses tokio with a current-thread runtime");
        assert_eq!((p.tier, p.category, p.scope), (Tier::LongTerm, Category::Project, Scope::Project));
        assert_eq!(p.tags, vec!["tokio".to_string()]);

        let d = c.classify("We decided to store vectors in SQLite for this repo");
        assert_eq!((d.tier, d.category), (Tier::LongTerm, Category::Decision));

        let k = c.classify("Postgres supports partial indexes");
        assert_eq!((k.tier, k.category, k.scope), (Tier::LongTerm, Category::Knowledge, Scope::Global));
    }

    #[test]
    fn short_inputs_and_questions_are_skipped() {
        let c = classifier();
        assert!(!c.classify("ok").should_store);
        assert!(!c.classify("What is the capital of France?").should_store);
        assert!(!c.classify("你喜欢什么编辑器吗？").should_store);
        assert!(!c.classify("hmm interesting stuff there").should_store);
    }

    #[test]
    fn title_is_first_sentence_capped() {
        let c = classifier();
        let long = "a".repeat(80);
        assert_eq!(c.title(&long).chars().count(), 50);
        assert_eq!(c.title("First part. Second part."), "First part");
    }

    #[test]
    fn tags_are_deduplicated() {
        assert_eq!(extract_tags("Rust, rust and C++ with Docker."), vec!["rust", "c++", "docker"]);
        assert!(extract_tags("nothing technical").is_empty());
    }
}
