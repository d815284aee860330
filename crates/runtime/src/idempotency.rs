//! Per-step idempotency keys.
//!
//! Short-TTL `(run_id, step, kind)` markers make LLM and tool steps safe
//! to replay when at-least-once delivery re-runs part of a job.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use relay_domain::Result;
use relay_kv::Kv;

#[derive(Clone)]
pub struct StepIdempotency {
    kv: Arc<dyn Kv>,
    ttl: Duration,
}

fn key(run_id: Uuid, step: u32, kind: &str) -> String {
    format!("idempotency:{run_id}:{step}:{kind}")
}

impl StepIdempotency {
    pub fn new(kv: Arc<dyn Kv>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Whether the step was already executed (skip it on true).
    ///
    /// KV failures report `false`: executing a step twice is recoverable,
    /// silently dropping one is not.
    pub async fn already_done(&self, run_id: Uuid, step: u32, kind: &str) -> bool {
        match self.kv.get(&key(run_id, step, kind)).await {
            Ok(marker) => marker.is_some(),
            Err(_) => false,
        }
    }

    pub async fn mark(&self, run_id: Uuid, step: u32, kind: &str) -> Result<()> {
        self.kv
            .set(&key(run_id, step, kind), "1", Some(self.ttl), false)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_kv::memory::MemoryKv;

    #[tokio::test]
    async fn mark_then_check() {
        let idem = StepIdempotency::new(Arc::new(MemoryKv::new()), Duration::from_secs(600));
        let run_id = Uuid::new_v4();

        assert!(!idem.already_done(run_id, 1, "llm").await);
        idem.mark(run_id, 1, "llm").await.unwrap();
        assert!(idem.already_done(run_id, 1, "llm").await);

        // Different step and kind are independent.
        assert!(!idem.already_done(run_id, 2, "llm").await);
        assert!(!idem.already_done(run_id, 1, "tool").await);
    }

    #[tokio::test(start_paused = true)]
    async fn markers_expire() {
        let idem = StepIdempotency::new(Arc::new(MemoryKv::new()), Duration::from_secs(10));
        let run_id = Uuid::new_v4();
        idem.mark(run_id, 1, "llm").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!idem.already_done(run_id, 1, "llm").await);
    }
}
