use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `memory_stats` takes no arguments.
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MemoryStatsParams {}
