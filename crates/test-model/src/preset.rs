use serde::{Deserialize, Serialize};
use toolrelay_model::{TokenUsage, ToolCallDelta};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta(ToolCallDelta),
    #[serde(rename = "usage")]
    Usage(TokenUsage),
    /// Fails the stream at this point.
    #[serde(rename = "stream_error")]
    StreamError,
}

impl PresetEvent {
    /// Creates the opening delta of a tool call slot.
    #[inline]
    pub fn tool_call_start(index: u32, id: &str, name: &str) -> Self {
        PresetEvent::ToolCallDelta(ToolCallDelta {
            index,
            id: Some(id.to_owned()),
            kind: Some("function".to_owned()),
            name: Some(name.to_owned()),
            arguments: Some(String::new()),
        })
    }

    /// Creates a delta carrying a piece of argument text for a slot.
    #[inline]
    pub fn tool_call_arguments(index: u32, arguments: &str) -> Self {
        PresetEvent::ToolCallDelta(ToolCallDelta {
            index,
            arguments: Some(arguments.to_owned()),
            ..Default::default()
        })
    }
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failure` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
        }
    }

    /// Creates a text-only `PresetResponse`.
    #[inline]
    pub fn with_text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }
}
