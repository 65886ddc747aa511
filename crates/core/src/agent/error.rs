use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};

use toolrelay_model::{ModelProviderError, ToolCall};

use crate::tool::Error as ToolError;

/// Errors that end a run.
#[derive(Debug)]
pub enum AgentError {
    /// The tool catalog could not be fetched.
    Catalog(ToolError),
    /// The model request failed, or its stream broke.
    Model(Box<dyn ModelProviderError>),
    /// A tool call failed and failures are propagated.
    Tool {
        /// The call that failed.
        call: ToolCall,
        /// The error from the tool service.
        error: ToolError,
    },
    /// The model still requested tools in the last allowed round.
    RoundLimitExceeded {
        /// The configured limit.
        max_rounds: usize,
    },
}

impl Display for AgentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog(err) => write!(f, "failed to list tools: {err}"),
            Self::Model(err) => {
                write!(f, "model request failed ({}): {err}", err.kind())
            }
            Self::Tool { call, error } => {
                write!(f, "tool `{}` ({}) failed: {error}", call.name, call.id)
            }
            Self::RoundLimitExceeded { max_rounds } => {
                write!(f, "round limit of {max_rounds} exceeded")
            }
        }
    }
}

impl StdError for AgentError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Catalog(err) => Some(err),
            Self::Model(err) => {
                let err: &(dyn StdError + 'static) = &**err;
                Some(err)
            }
            Self::Tool { error, .. } => Some(error),
            Self::RoundLimitExceeded { .. } => None,
        }
    }
}
