//! The write buffer: per-run ordered message queues with a background
//! flusher.
//!
//! Content deltas never land here — only terminal transcript rows. The
//! flusher batches each run's queue into one transactional insert per
//! tick; the coordinator drains synchronously before ownership release.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use relay_domain::message::NewMessage;
use relay_domain::Result;
use relay_store::RunPersistence;

struct RunQueue {
    pending: Vec<NewMessage>,
    /// Serializes flushes per run so batch order is preserved.
    flushing: Arc<tokio::sync::Mutex<()>>,
}

pub struct WriteBuffer {
    persistence: Arc<dyn RunPersistence>,
    queues: Mutex<HashMap<Uuid, RunQueue>>,
    wakeup: Notify,
}

impl WriteBuffer {
    pub fn new(persistence: Arc<dyn RunPersistence>) -> Self {
        Self {
            persistence,
            queues: Mutex::new(HashMap::new()),
            wakeup: Notify::new(),
        }
    }

    pub fn register(&self, run_id: Uuid) {
        self.queues.lock().entry(run_id).or_insert_with(|| RunQueue {
            pending: Vec::new(),
            flushing: Arc::new(tokio::sync::Mutex::new(())),
        });
        self.wakeup.notify_one();
    }

    /// Drop a run's queue. Call only after a successful drain.
    pub fn unregister(&self, run_id: Uuid) {
        let dropped = self.queues.lock().remove(&run_id);
        if let Some(queue) = dropped {
            if !queue.pending.is_empty() {
                warn!(%run_id, dropped = queue.pending.len(), "unregistered run with unflushed messages");
            }
        }
        self.wakeup.notify_one();
    }

    pub fn push(&self, run_id: Uuid, message: NewMessage) {
        let mut queues = self.queues.lock();
        match queues.get_mut(&run_id) {
            Some(queue) => queue.pending.push(message),
            None => warn!(%run_id, "dropping message for unregistered run"),
        }
    }

    pub fn pending_count(&self, run_id: Uuid) -> usize {
        self.queues
            .lock()
            .get(&run_id)
            .map_or(0, |q| q.pending.len())
    }

    /// Flush one run's queue now. On failure the batch is requeued at the
    /// front and the error returned (the background flusher retries on the
    /// next tick).
    pub async fn flush_run(&self, run_id: Uuid) -> Result<()> {
        let flush_lock = {
            let queues = self.queues.lock();
            let Some(queue) = queues.get(&run_id) else {
                return Ok(());
            };
            queue.flushing.clone()
        };
        // Serialize per run, then take the batch: a concurrent flush never
        // interleaves batches out of order.
        let _serialized = flush_lock.lock().await;
        let batch = {
            let mut queues = self.queues.lock();
            match queues.get_mut(&run_id) {
                Some(queue) => std::mem::take(&mut queue.pending),
                None => return Ok(()),
            }
        };
        if batch.is_empty() {
            return Ok(());
        }
        match self.persistence.insert_messages(&batch).await {
            Ok(()) => {
                debug!(%run_id, count = batch.len(), "flushed message batch");
                Ok(())
            }
            Err(e) => {
                warn!(%run_id, error = %e, count = batch.len(), "flush failed, requeueing");
                let mut queues = self.queues.lock();
                if let Some(queue) = queues.get_mut(&run_id) {
                    let newer = std::mem::take(&mut queue.pending);
                    queue.pending = batch;
                    queue.pending.extend(newer);
                }
                Err(e)
            }
        }
    }

    /// Flush every registered run once.
    pub async fn flush_all(&self) {
        let run_ids: Vec<Uuid> = self.queues.lock().keys().copied().collect();
        for run_id in run_ids {
            let _ = self.flush_run(run_id).await;
        }
    }

    /// Background flusher: wakes every `interval` and on register/
    /// unregister events.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let buffer = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = buffer.wakeup.notified() => {}
                }
                buffer.flush_all().await;
            }
        })
    }
}
