//! Redis-list job queue.
//!
//! Delivery is at-least-once — a worker crash between pop and completion
//! redelivers nothing here, but the enqueuing side retries and the run
//! ownership lock makes execution at-most-once in effect.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use relay_domain::run::RunJob;
use relay_domain::Result;
use relay_kv::Kv;

#[derive(Clone)]
pub struct JobQueue {
    kv: Arc<dyn Kv>,
    queue_key: String,
}

impl JobQueue {
    pub fn new(kv: Arc<dyn Kv>, queue_key: impl Into<String>) -> Self {
        Self {
            kv,
            queue_key: queue_key.into(),
        }
    }

    pub async fn enqueue(&self, job: &RunJob) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        self.kv.rpush(&self.queue_key, &payload).await?;
        Ok(())
    }

    /// Wait up to `timeout` for the next job. Undecodable payloads are
    /// dropped with a warning rather than wedging the queue.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<RunJob>> {
        let Some(payload) = self.kv.blpop(&self.queue_key, timeout).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                warn!(error = %e, "dropping undecodable job payload");
                Ok(None)
            }
        }
    }
}
