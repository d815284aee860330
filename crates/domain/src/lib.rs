//! Shared domain types for the relay run-execution core.
//!
//! Everything that crosses a crate boundary lives here: the error type,
//! run/thread/message vocabulary, tool types, the normalized LLM chunk
//! stream, the typed run-event envelope, and the configuration tree.

pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod run;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
