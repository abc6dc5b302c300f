//! `remember` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Store something worth keeping. Tier and category are inferred by the
/// classifier when omitted.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RememberParams {
    #[schemars(description = "The content to remember, in natural language")]
    pub content: String,

    #[schemars(description = "Category: 'preference', 'rule', 'persona', 'task', 'note', 'context', 'project', 'knowledge' or 'decision'. Inferred when omitted.")]
    pub category: Option<String>,

    #[schemars(description = "Short title. Derived from the content when omitted.")]
    pub title: Option<String>,

    #[schemars(description = "Visibility: 'global' or 'project'. Core memories are always global.")]
    pub scope: Option<String>,

    #[schemars(description = "Optional tags")]
    pub tags: Option<Vec<String>>,

    #[schemars(description = "Importance 1-5. Defaults to 3.")]
    pub importance: Option<u8>,
}
