//! Tool call supports.

mod error;
mod local;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::ToolDescriptor;
pub use error::{Error, ErrorKind};
pub use local::{LocalTools, Tool};

/// The result of a tool call.
pub type ToolResult = Result<Value, Error>;

/// A service that offers a catalog of tools and runs them.
///
/// The result of a call is opaque to the agent loop. It's serialized as-is
/// into the conversation, so services may return any JSON structure.
#[async_trait]
pub trait ToolService: Send + Sync {
    /// Lists the tools this service offers.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, Error>;

    /// Calls the named tool with the given arguments.
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult;
}

#[async_trait]
impl<T: ToolService + ?Sized> ToolService for Arc<T> {
    #[inline]
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, Error> {
        (**self).list_tools().await
    }

    #[inline]
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        (**self).call_tool(name, arguments).await
    }
}
