//! Thin Redis service: keys with TTL, append-only streams, pub/sub, and
//! script-backed atomic locks.
//!
//! Every operation carries a client-side deadline and transparent retry
//! with jittered backoff for transient transport failures. A health flag
//! is exported for the driver's backpressure decisions. The [`Kv`] trait
//! is the seam: [`KvService`] is the Redis backend, [`memory::MemoryKv`]
//! the in-process one used by tests and local development.

pub mod lock;
pub mod memory;
pub mod retry;
pub mod service;
pub mod traits;

pub use lock::{DistributedLock, LockGuard};
pub use service::{KvService, StreamEntry, Subscription};
pub use traits::Kv;
