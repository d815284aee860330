//! Process-wide shutdown state.
//!
//! SIGTERM sets the flag; the coordinator short-circuits new runs with a
//! `SHUTDOWN` error while the driver finishes in-flight runs within the
//! configured grace window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

#[derive(Clone, Default)]
pub struct Lifecycle {
    shutting_down: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!("shutdown initiated");
            self.notify.notify_waiters();
        }
    }

    /// Resolves once shutdown begins.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.notify.notified().await;
    }

    /// Watch SIGTERM/ctrl-c and flip the flag. Spawned once per process.
    pub fn spawn_signal_watcher(&self) -> tokio::task::JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            let terminate = async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::{signal, SignalKind};
                    match signal(SignalKind::terminate()) {
                        Ok(mut sigterm) => {
                            sigterm.recv().await;
                        }
                        Err(_) => std::future::pending::<()>().await,
                    }
                }
                #[cfg(not(unix))]
                std::future::pending::<()>().await
            };

            tokio::select! {
                _ = terminate => {}
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
            lifecycle.begin_shutdown();
        })
    }
}
