//! Memory operations exposed as tools to a completion-driven agent.
//!
//! Arguments arrive as untyped JSON on a [`ToolCall`]; [`MemoryTool::from_call`]
//! converts them into one typed parameter struct per action before anything
//! else sees them. Execution lives on [`crate::engine::MemoryEngine::dispatch_tool`].

pub mod forget;
pub mod memory_stats;
pub mod recall;
pub mod remember;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::completion::ToolSpec;
use crate::error::{Error, Result};
use crate::memory::types::ToolCall;

pub use forget::ForgetParams;
pub use memory_stats::MemoryStatsParams;
pub use recall::RecallParams;
pub use remember::RememberParams;

pub const REMEMBER: &str = "remember";
pub const RECALL: &str = "recall";
pub const FORGET: &str = "forget";
pub const MEMORY_STATS: &str = "memory_stats";

/// A parsed tool invocation.
#[derive(Debug)]
pub enum MemoryTool {
    Remember(RememberParams),
    Recall(RecallParams),
    Forget(ForgetParams),
    MemoryStats(MemoryStatsParams),
}

impl MemoryTool {
    pub fn from_call(call: &ToolCall) -> Result<Self> {
        match call.name.as_str() {
            REMEMBER => parse(call).map(Self::Remember),
            RECALL => parse(call).map(Self::Recall),
            FORGET => parse(call).map(Self::Forget),
            MEMORY_STATS => {
                // Models often send `null` or nothing for a no-argument tool.
                if call.arguments.is_null() {
                    Ok(Self::MemoryStats(MemoryStatsParams::default()))
                } else {
                    parse(call).map(Self::MemoryStats)
                }
            }
            other => Err(Error::invalid("dispatch_tool", format!("unknown tool '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Remember(_) => REMEMBER,
            Self::Recall(_) => RECALL,
            Self::Forget(_) => FORGET,
            Self::MemoryStats(_) => MEMORY_STATS,
        }
    }
}

fn parse<T: DeserializeOwned>(call: &ToolCall) -> Result<T> {
    serde_json::from_value(call.arguments.clone()).map_err(|e| {
        Error::invalid("dispatch_tool", format!("invalid arguments for '{}': {e}", call.name))
    })
}

fn spec<T: JsonSchema>(name: &str, description: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters: schemars::schema_for!(T).to_value(),
    }
}

/// Every memory tool, in a stable order.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        spec::<RememberParams>(
            REMEMBER,
            "Store a memory. Preferences and rules become permanent core memory; tasks and notes expire; facts, projects and decisions are kept long-term.",
        ),
        spec::<RecallParams>(
            RECALL,
            "Search memories by meaning and keywords. Returns the best matches with ids and scores.",
        ),
        spec::<ForgetParams>(FORGET, "Delete (or archive) a memory by id."),
        spec::<MemoryStatsParams>(
            MEMORY_STATS,
            "Memory counts per tier, token usage and index health.",
        ),
    ]
}
