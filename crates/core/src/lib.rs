//! Core logic of the tool relay: stream accumulation, tool dispatch and the
//! agent loop.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod accumulator;
mod agent;
pub mod catalog;
pub mod conversation;
pub mod dispatcher;
mod model_client;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentError, AgentOutcome, RetryConfig,
    ToolFailureMode,
};
pub use dispatcher::ToolInvocation;
