//! Tool registry and invoker.
//!
//! Tools are named async callables with a declared JSON schema. The
//! coordinator snapshots the registry at run start so registrations that
//! land mid-run never leak in, and every invocation failure is captured
//! as a `{success: false, error}` result — never raised.

pub mod invoker;
pub mod registry;
pub mod terminators;

pub use invoker::Invoker;
pub use registry::{ToolHandler, ToolRegistry, ToolSnapshot};
pub use terminators::Terminators;
