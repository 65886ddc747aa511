use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

/// What the agent does when a tool call fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ToolFailureMode {
    /// Abort the conversation with the error.
    #[default]
    Propagate,
    /// Send the error to the model as the tool result and keep going.
    ReportToModel,
}

/// Retry policy for completion requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of the delay between retries.
    pub max_interval: Duration,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed_time: Duration,
}

impl RetryConfig {
    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed_time))
            .build()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Duration::from_secs(60),
        }
    }
}

/// Configuration of the agent loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AgentConfig {
    /// Maximum number of completion requests in one run. `None` lets the
    /// loop go on until the model stops calling tools.
    pub max_rounds: Option<usize>,
    /// What to do when a tool call fails.
    pub tool_failure: ToolFailureMode,
    /// Run the tool calls of one round concurrently. Results are recorded
    /// in the order of the calls either way.
    pub parallel_tool_calls: bool,
    /// Retry failed completion requests. `None` disables retries.
    pub retry: Option<RetryConfig>,
}
