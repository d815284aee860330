//! The KV/stream service interface.
//!
//! Backends: [`crate::service::KvService`] (Redis, production) and
//! [`crate::memory::MemoryKv`] (in-process, tests and local development).

use std::time::Duration;

use relay_domain::Result;

use crate::service::{StreamEntry, Subscription};

#[async_trait::async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// SET with optional TTL and NX. Returns whether the key was written.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>, nx: bool) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn incr(&self, key: &str) -> Result<i64>;

    /// Append one entry with approximate maxlen trimming. Returns its id.
    async fn xadd(&self, key: &str, fields: &[(&str, &str)], maxlen: usize) -> Result<String>;

    async fn xrange(&self, key: &str, since_id: &str, count: usize) -> Result<Vec<StreamEntry>>;

    /// Append to a list tail (job queue producer side).
    async fn rpush(&self, key: &str, value: &str) -> Result<u64>;

    /// Blocking pop from a list head; `None` when `timeout` elapses.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// Publish a message; returns the subscriber count.
    async fn publish(&self, channel: &str, message: &str) -> Result<u64>;

    /// Open a dedicated subscriber on the given channels.
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription>;

    /// Atomic set-if-absent of `holder`.
    async fn acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Atomic delete-if-still-held-by `holder`.
    async fn release_lock(&self, key: &str, holder: &str) -> Result<bool>;

    /// Whether the last operation round-tripped successfully.
    fn is_healthy(&self) -> bool;
}
