//! Task registry for background maintenance.
//!
//! Every spawned task observes one shutdown signal; shutting the registry
//! down (or dropping it) stops the tasks between iterations and aborts
//! anything still running.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Tracks background tasks and their shared shutdown signal.
#[derive(Debug)]
pub struct TaskRegistry {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `f` now and then every `interval` until it returns `false` or the
    /// registry shuts down. A shutdown during `f` waits for `f` to finish.
    pub fn spawn_interval_until<F, Fut>(&self, interval: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                if !f().await {
                    break;
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Number of tasks that have not finished.
    pub fn running(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Signal shutdown and abort every task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }

    /// Signal shutdown and wait for every task to stop on its own.
    pub async fn shutdown_gracefully(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
