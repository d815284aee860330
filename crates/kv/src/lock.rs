//! Named distributed mutex over the KV service.
//!
//! The key's value is a fresh holder id; release deletes only while the
//! holder still matches (atomic compare-and-delete). Waiting acquisition
//! polls at 500 ms until the wait budget runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use relay_domain::{Error, Result};

use crate::traits::Kv;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct DistributedLock {
    kv: Arc<dyn Kv>,
    key: String,
    holder_id: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn Kv>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kv,
            key: key.into(),
            holder_id: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Try once; `Err(LockNotAcquired)` when someone else holds the key.
    pub async fn acquire(&self) -> Result<LockGuard> {
        if self
            .kv
            .acquire_lock(&self.key, &self.holder_id, self.ttl)
            .await?
        {
            debug!(key = %self.key, holder = %self.holder_id, "lock acquired");
            return Ok(LockGuard {
                kv: self.kv.clone(),
                key: self.key.clone(),
                holder_id: self.holder_id.clone(),
                released: false,
            });
        }
        Err(Error::LockNotAcquired(self.key.clone()))
    }

    /// Poll at 500 ms until acquired or `wait_timeout` elapses.
    pub async fn acquire_wait(&self, wait_timeout: Duration) -> Result<LockGuard> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            match self.acquire().await {
                Ok(guard) => return Ok(guard),
                Err(Error::LockNotAcquired(_)) => {}
                // Transient transport failures keep polling too; the lock
                // may still be acquirable before the budget runs out.
                Err(e) if e.is_transient() => {
                    warn!(key = %self.key, error = %e, "lock acquire attempt failed");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(Error::LockNotAcquired(self.key.clone()));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

/// Held lock; releases on `release()` and best-effort on drop.
pub struct LockGuard {
    kv: Arc<dyn Kv>,
    key: String,
    holder_id: String,
    released: bool,
}

impl LockGuard {
    /// Release the lock if this guard still owns it.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let released = self.kv.release_lock(&self.key, &self.holder_id).await?;
        if !released {
            warn!(key = %self.key, "lock was no longer held at release");
        }
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Exit paths that skip the explicit release still clean up; the TTL
        // is the final backstop when the runtime is already gone.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let kv = self.kv.clone();
            let key = std::mem::take(&mut self.key);
            let holder = std::mem::take(&mut self.holder_id);
            handle.spawn(async move {
                if let Err(e) = kv.release_lock(&key, &holder).await {
                    warn!(key = %key, error = %e, "best-effort lock release failed");
                }
            });
        }
    }
}
