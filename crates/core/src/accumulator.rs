//! Reassembles a streamed response into text and tool calls.

use std::collections::BTreeMap;

use toolrelay_model::{ToolCall, ToolCallDelta};

const DEFAULT_TOOL_CALL_KIND: &str = "function";

/// A tool call that is still being streamed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialToolCall {
    /// The slot index this record was created for.
    pub index: u32,
    /// The identifier from the first delta of the slot.
    pub id: String,
    /// The invocation kind from the first delta of the slot.
    pub kind: String,
    /// The tool name from the first delta of the slot.
    pub name: String,
    /// Argument text received so far.
    pub arguments: String,
}

impl From<PartialToolCall> for ToolCall {
    #[inline]
    fn from(partial: PartialToolCall) -> Self {
        ToolCall {
            id: partial.id,
            kind: partial.kind,
            name: partial.name,
            arguments: partial.arguments,
        }
    }
}

/// Accumulates the events of one response.
///
/// An accumulator lives for exactly one response, slot indices are not
/// meaningful across responses.
#[derive(Clone, Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
}

impl StreamAccumulator {
    /// Appends a piece of assistant text.
    #[inline]
    pub fn push_text(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    /// Applies a tool call delta.
    ///
    /// The first delta of a slot fixes the identifier, the kind and the
    /// name. Every delta, including the first one, extends the argument
    /// text.
    pub fn push_tool_call_delta(&mut self, delta: ToolCallDelta) {
        let ToolCallDelta {
            index,
            id,
            kind,
            name,
            arguments,
        } = delta;

        let partial = self.tool_calls.entry(index).or_insert_with(|| {
            trace!("new tool call slot {index}: {name:?} ({id:?})");
            PartialToolCall {
                index,
                id: id.clone().unwrap_or_default(),
                kind: kind
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TOOL_CALL_KIND.to_owned()),
                name: name.clone().unwrap_or_default(),
                arguments: String::new(),
            }
        });

        if id.is_some_and(|id| id != partial.id)
            || name.is_some_and(|name| name != partial.name)
        {
            warn!(
                "ignoring identity change of tool call slot {index} ({})",
                partial.name
            );
        }
        if let Some(arguments) = arguments {
            partial.arguments.push_str(&arguments);
        }
    }

    /// Returns the text received so far.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the in-progress tool calls, ordered by slot index.
    #[inline]
    pub fn tool_calls(&self) -> impl Iterator<Item = &PartialToolCall> {
        self.tool_calls.values()
    }

    /// Finishes the accumulation, returning the text and the tool calls
    /// ordered by slot index.
    pub fn finish(self) -> (String, Vec<ToolCall>) {
        let tool_calls =
            self.tool_calls.into_values().map(ToolCall::from).collect();
        (self.content, tool_calls)
    }
}
