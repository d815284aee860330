//! The control-channel supervisor.
//!
//! Watches the per-instance and global control channels for a run; a
//! `STOP` on either sets the in-process cancellation flag and records
//! which channel delivered it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relay_domain::run::{ControlSignal, RunKeys};
use relay_kv::Subscription;
use relay_runtime::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Why a stop was observed, for the terminal error message.
pub type StopReason = Arc<Mutex<Option<String>>>;

pub fn spawn_supervisor(
    mut subscription: Subscription,
    keys: RunKeys,
    cancel: CancelToken,
) -> (JoinHandle<()>, StopReason) {
    let stop_reason: StopReason = Arc::new(Mutex::new(None));
    let reason_out = stop_reason.clone();

    let handle = tokio::spawn(async move {
        loop {
            match subscription.next_message(POLL_INTERVAL).await {
                Ok(Some((channel, payload))) => {
                    if ControlSignal::parse(&payload) != Some(ControlSignal::Stop) {
                        continue;
                    }
                    let source = if channel == keys.instance_control {
                        "instance_control_channel"
                    } else {
                        "global_control_channel"
                    };
                    warn!(channel = %channel, "STOP received");
                    *stop_reason.lock() = Some(source.to_string());
                    cancel.cancel();
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, "control subscription closed");
                    break;
                }
            }
        }
    });

    (handle, reason_out)
}
