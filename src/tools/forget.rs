use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ForgetParams {
    #[schemars(description = "ID of the memory to delete")]
    pub id: String,

    #[schemars(description = "Archive instead of deleting. Defaults to false.")]
    pub archive: Option<bool>,
}
