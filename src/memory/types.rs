//! Core record definitions.
//!
//! Defines [`Tier`], [`Scope`], [`Category`] and [`Status`], the universal
//! [`Memory`] record, and the conversation types [`Session`] and
//! [`SessionMessage`].

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four memory tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Durable preferences, rules and persona. Always global.
    Core,
    /// Per-conversation transcripts.
    Session,
    /// Expiring tasks, notes and context.
    ShortTerm,
    /// Durable project facts, knowledge and decisions.
    LongTerm,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Core, Tier::Session, Tier::ShortTerm, Tier::LongTerm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Session => "session",
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Self::Core),
            "session" => Ok(Self::Session),
            "short_term" => Ok(Self::ShortTerm),
            "long_term" => Ok(Self::LongTerm),
            _ => Err(format!("unknown tier: {s}")),
        }
    }
}

/// Visibility scope for a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Shared across every project.
    Global,
    /// Bound to one detected project root.
    Project,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

/// Tier-specific subtype of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Preference,
    Rule,
    Persona,
    Transcript,
    Task,
    Note,
    Context,
    Project,
    Knowledge,
    Decision,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Rule => "rule",
            Self::Persona => "persona",
            Self::Transcript => "transcript",
            Self::Task => "task",
            Self::Note => "note",
            Self::Context => "context",
            Self::Project => "project",
            Self::Knowledge => "knowledge",
            Self::Decision => "decision",
        }
    }

    /// The tier this category belongs to.
    pub fn tier(&self) -> Tier {
        match self {
            Self::Preference | Self::Rule | Self::Persona => Tier::Core,
            Self::Transcript => Tier::Session,
            Self::Task | Self::Note | Self::Context => Tier::ShortTerm,
            Self::Project | Self::Knowledge | Self::Decision => Tier::LongTerm,
        }
    }

    /// Directory name under the tier directory (`short_term/tasks`, ...).
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Preference => "preferences",
            Self::Rule => "rules",
            Self::Persona => "persona",
            Self::Transcript => "transcripts",
            Self::Task => "tasks",
            Self::Note => "notes",
            Self::Context => "contexts",
            Self::Project => "projects",
            Self::Knowledge => "knowledge",
            Self::Decision => "decisions",
        }
    }

    /// All categories belonging to `tier`.
    pub fn for_tier(tier: Tier) -> &'static [Category] {
        match tier {
            Tier::Core => &[Self::Preference, Self::Rule, Self::Persona],
            Tier::Session => &[Self::Transcript],
            Tier::ShortTerm => &[Self::Task, Self::Note, Self::Context],
            Tier::LongTerm => &[Self::Project, Self::Knowledge, Self::Decision],
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "rule" => Ok(Self::Rule),
            "persona" => Ok(Self::Persona),
            "transcript" => Ok(Self::Transcript),
            "task" => Ok(Self::Task),
            "note" => Ok(Self::Note),
            "context" => Ok(Self::Context),
            "project" => Ok(Self::Project),
            "knowledge" => Ok(Self::Knowledge),
            "decision" => Ok(Self::Decision),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

/// Lifecycle status of a memory or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Active,
    Archived,
    Expired,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("unknown status: {s}")),
        }
    }
}

/// A memory record. The backing file is authoritative; the index mirrors it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// UUID v7 (time-sortable).
    pub id: String,
    pub tier: Tier,
    pub scope: Scope,
    pub category: Category,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Loose links to other memory ids. Not enforced.
    pub related: Vec<String>,
    /// Project root this memory belongs to, for project scope.
    pub project_path: Option<String>,
    pub status: Status,
    /// 1 (trivia) to 5 (critical).
    pub importance: u8,
    pub access_count: u32,
    /// SHA-256 of the content body, recomputed on every write.
    pub content_hash: String,
    /// Only ever set for short-term memories.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    pub file_path: PathBuf,
}

impl Memory {
    /// `true` once `now` has reached `expires_at`. Unset expiry never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Active status and not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Active && !self.is_expired(now)
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.title) + estimate_tokens(&self.content)
    }
}

/// Speaker of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One turn of a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub tokens: usize,
}

impl SessionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
            tokens,
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }
}

/// A bounded conversation transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub title: Option<String>,
    pub scope: Scope,
    pub project_path: Option<String>,
    pub status: Status,
    pub token_count: usize,
    pub message_count: usize,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_path: PathBuf,
    pub messages: Vec<SessionMessage>,
}

impl Session {
    /// Recompute the running counters from the message buffer.
    pub fn recount(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.tokens).sum();
        self.message_count = self.messages.len();
    }
}

/// The crude token estimator used everywhere: one token per three bytes.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 3
}
