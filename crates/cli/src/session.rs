use std::sync::Arc;

use serde_json::Value;
use toolrelay_core::catalog::ToolDescriptor;
use toolrelay_core::tool::Error as ToolError;
use toolrelay_core::{
    Agent, AgentBuilder, AgentConfig, AgentError, AgentOutcome, ToolInvocation,
};
use toolrelay_mcp::McpToolService;
use toolrelay_model::ModelProvider;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    mcp_url: String,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider and the URL
    /// of the MCP server to take tools from.
    pub fn with_model_provider<M: ModelProvider + 'static, S: Into<String>>(
        provider: M,
        mcp_url: S,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self {
            agent_builder,
            mcp_url: mcp_url.into(),
        }
    }

    /// Sets the agent loop configuration.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.agent_builder = self.agent_builder.with_config(config);
        self
    }

    /// Attaches a callback to be invoked with every streamed text delta.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_transcript(on_transcript);
        self
    }

    /// Attaches a callback to be invoked before a tool is called.
    #[inline]
    pub fn on_tool_call(
        mut self,
        on_tool_call: impl Fn(&ToolInvocation) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_tool_call(on_tool_call);
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
        self.agent_builder = self.agent_builder.on_tool_result(on_tool_result);
        self
    }

    /// Connects to the MCP server and loads its tool catalog.
    ///
    /// If the catalog can't be loaded, the MCP session is closed before
    /// returning the error.
    pub async fn connect(self) -> Result<Session, AgentError> {
        let mcp = Arc::new(
            McpToolService::connect(&self.mcp_url)
                .await
                .map_err(AgentError::Catalog)?,
        );
        let agent = self
            .agent_builder
            .with_tool_service(Arc::clone(&mcp))
            .build();

        let mut session = Session { agent, mcp };
        if let Err(err) = session.agent.load_tools().await {
            session.close().await;
            return Err(err);
        }
        Ok(session)
    }
}

/// A conversation with a model, backed by one MCP session.
///
/// The session must be released with [`close`](Session::close) when the
/// conversation is over.
pub struct Session {
    agent: Agent,
    mcp: Arc<McpToolService>,
}

impl Session {
    /// Returns the tool catalog loaded when connecting.
    #[inline]
    pub fn catalog(&self) -> &[ToolDescriptor] {
        self.agent.catalog().unwrap_or_default()
    }

    /// Returns the URL of the MCP server.
    #[inline]
    pub fn mcp_url(&self) -> &str {
        self.mcp.url()
    }

    /// Runs a goal until the model gives a final answer.
    ///
    /// This method is cancel safe, see [`Agent::run`].
    #[inline]
    pub async fn run(
        &mut self,
        goal: &str,
    ) -> Result<AgentOutcome, AgentError> {
        self.agent.run(goal).await
    }

    /// Closes the MCP session.
    pub async fn close(self) {
        let Self { agent, mcp } = self;
        // The agent holds the other reference.
        drop(agent);
        match Arc::try_unwrap(mcp) {
            Ok(mcp) => mcp.close().await,
            Err(_) => warn!("MCP session is still in use, leaving it open"),
        }
    }
}
