use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelRequest {
    /// The input messages, in conversation order.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelMessage {
    /// A user input text.
    User(String),
    /// An assistant turn, possibly requesting tool calls.
    Assistant(AssistantMessage),
    /// A tool call result.
    Tool(ToolCallResult),
}

impl ModelMessage {
    /// Creates a text-only assistant message.
    #[inline]
    pub fn assistant_text<S: Into<String>>(text: S) -> Self {
        ModelMessage::Assistant(AssistantMessage {
            content: Some(text.into()),
            tool_calls: vec![],
        })
    }
}

/// A message produced by the assistant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AssistantMessage {
    /// The text content. Providers typically omit it when the turn only
    /// requests tool calls.
    pub content: Option<String>,
    /// Tool calls requested in this turn, in the order the model emitted
    /// them.
    pub tool_calls: Vec<ToolCall>,
}

/// A finalized tool call request from the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// The invocation kind, usually `"function"`.
    pub kind: String,
    /// The name of the tool to call.
    pub name: String,
    /// The raw argument text exactly as the model produced it.
    ///
    /// It's kept unparsed so that replaying the history sends the same
    /// bytes back to the model.
    pub arguments: String,
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolCallResult {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// The serialized result of the tool call.
    pub content: String,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}
