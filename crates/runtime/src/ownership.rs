//! Cross-instance run ownership.
//!
//! The lock key's value is the owning instance id. A claimer that finds
//! the key held consults the holder's heartbeat key AND the database
//! status; only when both say the holder is dead is the lock taken over.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relay_domain::run::{self, RunStatus};
use relay_domain::Result;
use relay_kv::Kv;
use relay_store::RunPersistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// A live sibling owns the run; skip the duplicate job.
    AlreadyClaimed,
}

#[derive(Clone)]
pub struct Ownership {
    kv: Arc<dyn Kv>,
    persistence: Arc<dyn RunPersistence>,
    lock_ttl: Duration,
    heartbeat_interval: Duration,
}

impl Ownership {
    pub fn new(
        kv: Arc<dyn Kv>,
        persistence: Arc<dyn RunPersistence>,
        lock_ttl: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            kv,
            persistence,
            lock_ttl,
            heartbeat_interval,
        }
    }

    /// Try to take ownership of a run for `instance_id`.
    pub async fn claim(&self, run_id: Uuid, instance_id: &str) -> Result<ClaimOutcome> {
        let lock_key = run::lock_key(run_id);

        if self
            .kv
            .acquire_lock(&lock_key, instance_id, self.lock_ttl)
            .await?
        {
            self.mark_active(run_id, instance_id).await;
            debug!(%run_id, instance_id, "run lock acquired");
            return Ok(ClaimOutcome::Claimed);
        }

        let Some(holder) = self.kv.get(&lock_key).await? else {
            // The holder vanished between our set and get; try once more.
            return if self
                .kv
                .acquire_lock(&lock_key, instance_id, self.lock_ttl)
                .await?
            {
                self.mark_active(run_id, instance_id).await;
                Ok(ClaimOutcome::Claimed)
            } else {
                Ok(ClaimOutcome::AlreadyClaimed)
            };
        };

        // Take-over check: heartbeat key AND database status must both say
        // the holder is dead.
        let holder_alive = self
            .kv
            .get(&run::instance_active_key(&holder, run_id))
            .await?
            .is_some();
        let db_running = match self.persistence.run_status(run_id).await {
            Ok(status) => status == Some(RunStatus::Running),
            Err(e) => {
                warn!(%run_id, error = %e, "status check failed during claim; assuming running");
                true
            }
        };

        if holder_alive || db_running {
            info!(%run_id, holder, "run already owned by a live instance, skipping");
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        warn!(%run_id, holder, "stale lock detected, taking over");
        self.kv.delete(&lock_key).await?;
        if self
            .kv
            .acquire_lock(&lock_key, instance_id, self.lock_ttl)
            .await?
        {
            self.mark_active(run_id, instance_id).await;
            Ok(ClaimOutcome::Claimed)
        } else {
            // Another worker won the takeover race.
            info!(%run_id, "lost takeover race, skipping");
            Ok(ClaimOutcome::AlreadyClaimed)
        }
    }

    /// Refresh the holder's lock and heartbeat keys.
    pub async fn heartbeat(&self, run_id: Uuid, instance_id: &str) -> Result<()> {
        self.kv
            .expire(&run::lock_key(run_id), self.lock_ttl)
            .await?;
        self.kv
            .expire(
                &run::instance_active_key(instance_id, run_id),
                self.lock_ttl,
            )
            .await?;
        Ok(())
    }

    /// Periodic heartbeat task for the duration of a run.
    pub fn spawn_heartbeat(&self, run_id: Uuid, instance_id: String) -> JoinHandle<()> {
        let ownership = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ownership.heartbeat_interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if let Err(e) = ownership.heartbeat(run_id, &instance_id).await {
                    warn!(%run_id, error = %e, "heartbeat refresh failed");
                }
            }
        })
    }

    /// Drop ownership: delete the lock (only while still the holder) and
    /// the heartbeat key, and put a TTL on the event stream.
    pub async fn release(&self, run_id: Uuid, instance_id: &str, stream_ttl: Duration) {
        let lock_key = run::lock_key(run_id);
        if let Err(e) = self.kv.release_lock(&lock_key, instance_id).await {
            warn!(%run_id, error = %e, "run lock release failed");
        }
        if let Err(e) = self
            .kv
            .delete(&run::instance_active_key(instance_id, run_id))
            .await
        {
            warn!(%run_id, error = %e, "instance key cleanup failed");
        }
        if let Err(e) = self.kv.expire(&run::stream_key(run_id), stream_ttl).await {
            warn!(%run_id, error = %e, "stream TTL set failed");
        }
        debug!(%run_id, instance_id, "ownership released");
    }

    async fn mark_active(&self, run_id: Uuid, instance_id: &str) {
        // Non-fatal: the run proceeds even if the heartbeat marker fails;
        // a sibling would then consult the DB status.
        if let Err(e) = self
            .kv
            .set(
                &run::instance_active_key(instance_id, run_id),
                "running",
                Some(self.lock_ttl),
                false,
            )
            .await
        {
            warn!(%run_id, error = %e, "failed to set instance-active key");
        }
    }
}
