mod builder;
mod config;
mod error;
mod state;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde_json::Value;
use toolrelay_model::{ModelFinishReason, ModelTool, TokenUsage};

use crate::catalog::{ToolDescriptor, to_model_tools};
use crate::conversation::Conversation;
use crate::dispatcher::ToolInvocation;
use crate::model_client::{ModelClient, TranscriptFn};
use crate::tool::{Error as ToolError, ToolService};
pub use builder::AgentBuilder;
pub use config::{AgentConfig, RetryConfig, ToolFailureMode};
pub use error::AgentError;

type ToolCallFn = Box<dyn Fn(&ToolInvocation) + Send + Sync>;
type ToolResultFn =
    Box<dyn Fn(&ToolInvocation, Result<&Value, &ToolError>) + Send + Sync>;

#[derive(Default)]
struct Observers {
    on_transcript: Option<TranscriptFn>,
    on_tool_call: Option<ToolCallFn>,
    on_tool_result: Option<ToolResultFn>,
}

/// The result of a finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentOutcome {
    /// The text of the last assistant turn.
    pub answer: String,
    /// Number of completion requests made in the run.
    pub rounds: usize,
    /// Token usage summed over all rounds.
    pub usage: TokenUsage,
    /// Why the model stopped in the last round. `None` if the stream ended
    /// without saying.
    pub finish_reason: Option<ModelFinishReason>,
}

/// An agent that relays tool calls between a model and a tool service.
///
/// The agent owns a conversation. Each [`run`](Agent::run) appends a goal
/// to it and keeps asking the model until it answers without requesting
/// tools. A round (the assistant turn and the results of its tool calls)
/// is appended to the conversation only after it completes, so dropping a
/// running future never leaves a partial round behind.
pub struct Agent {
    model_client: ModelClient,
    tool_service: Arc<dyn ToolService>,
    config: AgentConfig,
    catalog: Option<Vec<ToolDescriptor>>,
    model_tools: Vec<ModelTool>,
    conversation: Conversation,
    observers: Observers,
}

impl Agent {
    fn new(
        model_client: ModelClient,
        tool_service: Arc<dyn ToolService>,
        config: AgentConfig,
        observers: Observers,
    ) -> Self {
        Self {
            model_client,
            tool_service,
            config,
            catalog: None,
            model_tools: vec![],
            conversation: Conversation::default(),
            observers,
        }
    }

    /// Fetches the tool catalog from the tool service.
    ///
    /// This is done automatically by the first run. Calling it again
    /// refreshes the catalog.
    pub async fn load_tools(
        &mut self,
    ) -> Result<&[ToolDescriptor], AgentError> {
        let catalog = self
            .tool_service
            .list_tools()
            .await
            .map_err(AgentError::Catalog)?;
        info!("loaded {} tools", catalog.len());
        self.model_tools = to_model_tools(&catalog);
        Ok(self.catalog.insert(catalog))
    }

    /// Returns the tool catalog, if it has been loaded.
    #[inline]
    pub fn catalog(&self) -> Option<&[ToolDescriptor]> {
        self.catalog.as_deref()
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Returns the loop configuration.
    #[inline]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}
