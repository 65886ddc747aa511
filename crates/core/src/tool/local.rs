use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;

use super::{Error, ToolResult, ToolService};
use crate::catalog::ToolDescriptor;

/// A tool defined in-process.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as an API endpoint. To do this,
/// make the context an immutable state of the tool, which can be set during
/// initialization, and copy it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned + JsonSchema;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    ///
    /// It's derived from the input type by default.
    fn parameter_schema(&self) -> Value {
        schema_for!(Self::Input).to_value()
    }

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

trait ToolObject: Send + Sync + 'static {
    fn descriptor(&self) -> ToolDescriptor;

    fn execute(
        &self,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>>;
}

struct ToolObjectImpl<T: Tool>(T);

impl<T: Tool> ToolObject for ToolObjectImpl<T> {
    #[inline]
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.0.name().to_owned(),
            description: Some(self.0.description().to_owned()),
            input_schema: Some(self.0.parameter_schema()),
        }
    }

    fn execute(
        &self,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> {
        let input: T::Input = match serde_json::from_value(arguments) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(ToolResult::Err(
                    Error::invalid_input().with_reason(reason),
                )));
            }
        };
        Box::pin(
            self.0
                .execute(input)
                .instrument(debug_span!("local tool execute")),
        )
    }
}

/// A [`ToolService`] backed by tools registered in-process.
///
/// The catalog lists tools in registration order.
#[derive(Clone, Default)]
pub struct LocalTools {
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn ToolObject>>,
}

impl LocalTools {
    /// Registers a tool, replacing any tool with the same name.
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        if self
            .tools
            .insert(name.clone(), Arc::new(ToolObjectImpl(tool)))
            .is_none()
        {
            self.order.push(name);
        }
    }

    /// Registers a tool, builder style.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.add_tool(tool);
        self
    }
}

#[async_trait]
impl ToolService for LocalTools {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, Error> {
        Ok(self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            warn!("tool not found: {name}");
            return Err(Error::not_found().with_reason(name));
        };
        trace!("executing a local tool ({name}) with args: {arguments:?}");
        tool.execute(arguments).await
    }
}
