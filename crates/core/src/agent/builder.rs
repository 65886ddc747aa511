use std::sync::Arc;

use serde_json::Value;
use toolrelay_model::ModelProvider;

use super::{Agent, AgentConfig, Observers};
use crate::dispatcher::ToolInvocation;
use crate::model_client::ModelClient;
use crate::tool::{Error as ToolError, LocalTools, ToolService};

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    tool_service: Option<Arc<dyn ToolService>>,
    config: AgentConfig,
    observers: Observers,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            tool_service: None,
            config: AgentConfig::default(),
            observers: Observers::default(),
        }
    }

    /// Sets the service that provides and runs tools.
    ///
    /// Without one, the agent offers no tools to the model.
    #[inline]
    pub fn with_tool_service<S: ToolService + 'static>(
        mut self,
        service: S,
    ) -> Self {
        self.tool_service = Some(Arc::new(service));
        self
    }

    /// Replaces the whole loop configuration.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Limits the number of completion requests in one run.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.config.max_rounds = Some(max_rounds);
        self
    }

    /// Attaches a callback to be invoked with every streamed text delta.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.observers.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Attaches a callback to be invoked before a tool is called.
    #[inline]
    pub fn on_tool_call(
        mut self,
        on_tool_call: impl Fn(&ToolInvocation) + Send + Sync + 'static,
    ) -> Self {
        self.observers.on_tool_call = Some(Box::new(on_tool_call));
        self
    }

    /// Attaches a callback to be invoked after a tool call returns.
    #[inline]
    pub fn on_tool_result(
        mut self,
        on_tool_result: impl Fn(&ToolInvocation, Result<&Value, &ToolError>)
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.observers.on_tool_result = Some(Box::new(on_tool_result));
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        let tool_service = self
            .tool_service
            .unwrap_or_else(|| Arc::new(LocalTools::default()));
        Agent::new(self.model_client, tool_service, self.config, self.observers)
    }
}
