use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecallParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Restrict to one tier: 'core', 'short_term' or 'long_term'")]
    pub tier: Option<String>,

    #[schemars(description = "Restrict to one scope: 'global' or 'project'")]
    pub scope: Option<String>,

    /// Maximum number of results (1-20). Defaults to 5.
    #[schemars(description = "Maximum number of results to return (1-20). Defaults to 5.")]
    pub max_results: Option<usize>,
}
