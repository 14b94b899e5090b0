use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreMemoryParams {
    #[schemars(description = "The content to store")]
    pub content: String,

    #[schemars(description = "Optional JSON object of metadata stored alongside the content")]
    pub metadata: Option<serde_json::Value>,

    #[schemars(description = "Source ids to store into. Omit to use the default set.")]
    pub sources: Option<Vec<String>>,
}
