//! Tool catalog types and the conversion into the model calling convention.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use toolrelay_model::ModelTool;

const DEFAULT_DESCRIPTION: &str = "No description.";

/// Describes one tool offered by a tool service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Name of the tool, unique within a catalog.
    pub name: String,
    /// Human readable description, if the service provides one.
    pub description: Option<String>,
    /// JSON schema of the tool input, if the service provides one.
    pub input_schema: Option<Value>,
}

impl ToolDescriptor {
    /// Converts the descriptor into the form sent to the model.
    ///
    /// Missing fields are filled so that the model always gets a callable
    /// function definition: a placeholder description and a schema for an
    /// empty object.
    pub fn to_model_tool(&self) -> ModelTool {
        ModelTool {
            name: self.name.clone(),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_owned()),
            parameters: self.input_schema.clone().unwrap_or_else(|| {
                json!({
                    "type": "object",
                    "properties": {},
                    "required": [],
                })
            }),
        }
    }
}

/// Converts a whole catalog, keeping its order.
#[inline]
pub fn to_model_tools(catalog: &[ToolDescriptor]) -> Vec<ModelTool> {
    catalog.iter().map(ToolDescriptor::to_model_tool).collect()
}
