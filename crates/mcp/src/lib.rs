//! A tool service backed by an MCP server over streamable HTTP.

#[macro_use]
extern crate tracing;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, JsonObject};
use rmcp::service::RunningService;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use toolrelay_core::catalog::ToolDescriptor;
use toolrelay_core::tool::{Error as ToolError, ToolResult, ToolService};

/// An initialized MCP client session.
///
/// The session is opened by [`connect`](McpToolService::connect) and must be
/// released with [`close`](McpToolService::close) once the conversation is
/// over, whether it succeeded or not.
pub struct McpToolService {
    url: String,
    service: RunningService<RoleClient, ()>,
}

impl McpToolService {
    /// Opens a session with the MCP server at `url` and performs the
    /// initialization handshake.
    pub async fn connect(url: &str) -> Result<Self, ToolError> {
        let transport = StreamableHttpClientTransport::from_uri(url.to_owned());
        let service = ().serve(transport).await.map_err(|err| {
            ToolError::unavailable()
                .with_reason(format!("failed to connect to {url}: {err}"))
        })?;
        if let Some(info) = service.peer_info() {
            info!(
                "connected to MCP server {} {}",
                info.server_info.name, info.server_info.version
            );
        }
        Ok(Self {
            url: url.to_owned(),
            service,
        })
    }

    /// Returns the URL of the server.
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Closes the session.
    pub async fn close(self) {
        match self.service.cancel().await {
            Ok(reason) => debug!("MCP session closed: {reason:?}"),
            Err(err) => warn!("failed to close MCP session: {err}"),
        }
    }
}

#[async_trait]
impl ToolService for McpToolService {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let tools = self.service.list_all_tools().await.map_err(|err| {
            ToolError::unavailable().with_reason(err.to_string())
        })?;
        Ok(tools
            .iter()
            .map(|tool| {
                descriptor(
                    &tool.name,
                    tool.description.as_deref(),
                    &tool.input_schema,
                )
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let arguments = object_arguments(arguments)?;
        let result = self
            .service
            .call_tool(CallToolRequestParams {
                name: name.to_owned().into(),
                arguments,
                meta: None,
                task: None,
            })
            .await
            .map_err(|err| {
                ToolError::execution_error().with_reason(err.to_string())
            })?;
        if result.is_error == Some(true) {
            debug!("tool {name} reported an error");
        }
        serde_json::to_value(&result).map_err(|err| {
            ToolError::execution_error().with_reason(err.to_string())
        })
    }
}

fn descriptor(
    name: &str,
    description: Option<&str>,
    input_schema: &JsonObject,
) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_owned(),
        description: description
            .filter(|d| !d.is_empty())
            .map(ToOwned::to_owned),
        input_schema: (!input_schema.is_empty())
            .then(|| Value::Object(input_schema.clone())),
    }
}

fn object_arguments(arguments: Value) -> Result<Option<JsonObject>, ToolError> {
    match arguments {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => Err(ToolError::invalid_input()
            .with_reason(format!("arguments must be an object, got {other}"))),
    }
}
