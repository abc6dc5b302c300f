//! Chat-completion capability, consumed but not implemented here.
//!
//! The session trimmer only needs "turn these messages into a summary", so it
//! depends on [`Summarizer`]; [`CompletionSummarizer`] adapts any
//! [`CompletionProvider`] to that narrower shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::types::{Role, SessionMessage, ToolCall};

/// One message sent to the completion capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            ..Self::system(content)
        }
    }
}

impl From<&SessionMessage> for ChatMessage {
    fn from(m: &SessionMessage) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
            tool_calls: m.tool_calls.clone(),
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

/// A tool the model may call; `parameters` is a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Model response: text, optional tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion>;
}

/// Condenses a run of conversation turns into a short summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[SessionMessage]) -> Result<String>;
}

const SUMMARY_PROMPT: &str = "Summarize the conversation below for your own future reference. \
Keep decisions, facts about the user, open tasks and any names, paths or identifiers. \
Reply with the summary only, in at most a few short paragraphs.";

/// [`Summarizer`] backed by a completion call with no tools.
pub struct CompletionSummarizer<P> {
    provider: P,
}

impl<P: CompletionProvider> CompletionSummarizer<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: CompletionProvider> Summarizer for CompletionSummarizer<P> {
    async fn summarize(&self, messages: &[SessionMessage]) -> Result<String> {
        let transcript = messages
            .iter()
            .map(|m| format!("[{}] {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = vec![ChatMessage::system(SUMMARY_PROMPT), ChatMessage::user(transcript)];
        let completion = self.provider.complete(&request, &[]).await?;
        let summary = completion.content.trim();
        if summary.is_empty() {
            return Err(Error::upstream("summarize", "completion returned an empty summary"));
        }
        Ok(summary.to_string())
    }
}
