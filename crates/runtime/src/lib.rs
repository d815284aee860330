//! The run execution core: per-run state, the LLM/tool loop, ownership
//! and idempotency, the write buffer, and the response processor that
//! turns provider chunks into the semantic event stream.

pub mod cancel;
pub mod coordinator;
pub mod flush;
pub mod idempotency;
pub mod lifecycle;
pub mod ownership;
pub mod processor;
pub mod prompt;
pub mod sinks;
pub mod state;

pub use cancel::CancelToken;
pub use coordinator::{Coordinator, CoordinatorDeps, RunContext, RunOutcome};
pub use flush::WriteBuffer;
pub use lifecycle::Lifecycle;
pub use ownership::{ClaimOutcome, Ownership};
