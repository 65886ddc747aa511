//! An out-of-the-box agent that relays tool calls between an
//! OpenAI-compatible model and an MCP server.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to run goals from your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod session;

pub use session::{Session, SessionBuilder};

/// Re-exports of [`toolrelay_core`] crate.
pub mod core {
    pub use toolrelay_core::*;
}
