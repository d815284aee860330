//! Postgres accessor for the run core.
//!
//! A pooled primary (and optional read replica) with a transient-error
//! classifier, strict identifier validation for dynamic query building,
//! typed repositories for the run tables, and the at-most-once gates
//! (webhook dedup, renewal dedup) the billing domain shares with the
//! core. The [`RunPersistence`] trait is the seam consumed by the
//! runtime; [`memory::MemoryStore`] backs it in tests.

pub mod credits;
pub mod ident;
pub mod memory;
pub mod messages;
pub mod renewal;
pub mod runs;
pub mod store;
pub mod threads;
pub mod traits;
pub mod webhook;

pub use store::{ReadPreference, Store};
pub use traits::{PgPersistence, RunPersistence};
pub use webhook::{WebhookDecision, WebhookGate};
