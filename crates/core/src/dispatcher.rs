//! Turns finalized tool calls into tool service invocations.

use serde_json::{Map, Value};
use toolrelay_model::ToolCall;
use tracing::Instrument;

use crate::tool::{ToolResult, ToolService};

/// A tool call with its arguments parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    /// The tool call as the model requested it.
    pub call: ToolCall,
    /// The parsed arguments. An empty object if the argument text was empty
    /// or malformed.
    pub arguments: Value,
    /// The parser message if the argument text was malformed.
    pub argument_error: Option<String>,
}

impl ToolInvocation {
    /// Parses the argument text of a tool call.
    ///
    /// Malformed text never fails the call: it's reported and replaced by
    /// an empty object, so that one bad call doesn't block its siblings.
    pub fn parse(call: ToolCall) -> Self {
        if call.arguments.is_empty() {
            return Self {
                call,
                arguments: Value::Object(Map::new()),
                argument_error: None,
            };
        }

        match serde_json::from_str::<Value>(&call.arguments) {
            Ok(arguments) => Self {
                call,
                arguments,
                argument_error: None,
            },
            Err(err) => {
                warn!(
                    "could not parse args for {}: {} ({err})",
                    call.name, call.arguments
                );
                Self {
                    call,
                    arguments: Value::Object(Map::new()),
                    argument_error: Some(err.to_string()),
                }
            }
        }
    }
}

/// Forwards an invocation to the tool service and returns its raw result.
pub async fn dispatch(
    service: &dyn ToolService,
    invocation: &ToolInvocation,
) -> ToolResult {
    let name = invocation.call.name.as_str();
    let result = service
        .call_tool(name, invocation.arguments.clone())
        .instrument(debug_span!("tool dispatch", tool = name))
        .await;
    match &result {
        Ok(value) => trace!("tool {name} returned: {value}"),
        Err(err) => warn!("tool {name} failed: {err}"),
    }
    result
}
