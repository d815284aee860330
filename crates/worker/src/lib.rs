//! The background worker: dequeues run jobs, owns each run's lifetime,
//! fans events out to the stream and pub/sub channels, and finalizes
//! status, cleanup and post-run sinks.

pub mod bootstrap;
pub mod broker;
pub mod cli;
pub mod control;
pub mod driver;
pub mod run_control;
pub mod sinks;

pub use bootstrap::Worker;
pub use broker::JobQueue;
pub use driver::{run_agent, DriverOutcome};
