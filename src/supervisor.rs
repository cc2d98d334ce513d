// =============================================================================
// Supervisor — spawns the long-running background tasks and coordinates a
// graceful shutdown. Grounded on the teacher's `main.rs` shutdown handling
// (a ctrl_c future raced against the running server, with a final config
// save), generalized into a reusable handle since this core spawns several
// independent loops instead of one server future.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self { shutdown_tx, handles: Mutex::new(Vec::new()) }
    }

    /// A cloneable receiver that flips to `true` once `shutdown` is called,
    /// for tasks that need to select on it inside their own loop (e.g. the
    /// execution queue consumer).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawns `fut` as a named background task tracked for graceful
    /// shutdown. Tasks that don't consume `shutdown_signal()` themselves
    /// still get aborted if they haven't finished once the grace period in
    /// `shutdown` elapses.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.handles.lock().push((name, handle));
    }

    /// Signals every task-local shutdown receiver, then waits up to `grace`
    /// for each spawned task to finish, aborting any stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        info!("supervisor: shutdown signal sent");
        let _ = self.shutdown_tx.send(true);

        let handles = std::mem::take(&mut *self.handles.lock());
        for (name, handle) in handles {
            let abort_handle = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => info!(task = name, "supervisor: task exited cleanly"),
                Ok(Err(e)) => warn!(task = name, error = %e, "supervisor: task panicked"),
                Err(_) => {
                    warn!(task = name, "supervisor: task exceeded grace period, aborting");
                    abort_handle.abort();
                }
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_task_finishing_on_its_own_is_reported_clean() {
        let supervisor = Supervisor::new();
        supervisor.spawn("quick", async {
            tokio::time::sleep(Duration::from_millis(5)).await;
        });
        supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn task_respecting_shutdown_signal_exits_before_grace_elapses() {
        let supervisor = Supervisor::new();
        let mut rx = supervisor.shutdown_signal();
        supervisor.spawn("graceful", async move {
            loop {
                if rx.changed().await.is_err() || *rx.borrow() {
                    return;
                }
            }
        });
        supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn stubborn_task_is_aborted_after_grace_period() {
        let supervisor = Supervisor::new();
        supervisor.spawn("stubborn", async {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
        supervisor.shutdown(Duration::from_millis(50)).await;
    }
}
