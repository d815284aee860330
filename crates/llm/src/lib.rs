//! LLM execution: the provider trait, the streaming executor, token
//! estimation, and model id resolution.
//!
//! Provider adapters live outside this crate; anything that yields the
//! normalized [`relay_domain::stream::LlmChunk`] stream plugs in. The
//! [`scripted::ScriptedProvider`] backs tests and local dry-runs.

pub mod executor;
pub mod resolver;
pub mod scripted;
pub mod tokens;
pub mod traits;

pub use executor::LlmExecutor;
pub use resolver::ModelResolver;
pub use traits::{LlmProvider, LlmRequest, ToolChoice};
