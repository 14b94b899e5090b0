use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `systems_health` takes no arguments.
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SystemsHealthParams {}
