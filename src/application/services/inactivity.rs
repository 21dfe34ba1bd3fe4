//! Inactivity Monitor (G): shuts the process down after an idle window (§4.7).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

/// Arms a timer on `start_inactivity`, cancels it on `end_inactivity`, and
/// notifies a waiter once the timer expires without being cancelled.
///
/// Edges are idempotent: a repeated `start_inactivity` while already armed
/// re-arms the same deadline rather than stacking timers; a repeated
/// `end_inactivity` while idle is a no-op.
pub struct InactivityMonitor {
    max_idle: Duration,
    generation: AtomicU64,
    shutdown: Notify,
}

impl InactivityMonitor {
    #[must_use]
    pub fn new(max_idle: Duration) -> Self {
        Self {
            max_idle,
            generation: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    /// Arms the idle timer. Spawns a task that requests shutdown if this
    /// generation is still current once `max_idle` elapses.
    pub fn start_inactivity(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.max_idle).await;
            if this.generation.load(Ordering::SeqCst) == generation {
                info!(idle_for = ?this.max_idle, "idle timeout reached, requesting shutdown");
                this.shutdown.notify_waiters();
            }
        });
    }

    /// Cancels any pending idle timer by invalidating its generation.
    pub fn end_inactivity(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Resolves once an armed timer has expired without being cancelled.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expires_and_signals_shutdown() {
        let monitor = Arc::new(InactivityMonitor::new(Duration::from_millis(20)));
        monitor.start_inactivity();
        tokio::time::timeout(Duration::from_millis(200), monitor.wait_for_shutdown())
            .await
            .expect("should have signalled shutdown");
    }

    #[tokio::test]
    async fn cancelling_prevents_shutdown() {
        let monitor = Arc::new(InactivityMonitor::new(Duration::from_millis(20)));
        monitor.start_inactivity();
        monitor.end_inactivity();
        let result =
            tokio::time::timeout(Duration::from_millis(60), monitor.wait_for_shutdown()).await;
        assert!(result.is_err(), "shutdown should not have fired");
    }

    #[tokio::test]
    async fn repeated_start_is_idempotent_and_keeps_latest_deadline() {
        let monitor = Arc::new(InactivityMonitor::new(Duration::from_millis(40)));
        monitor.start_inactivity();
        monitor.start_inactivity();
        tokio::time::timeout(Duration::from_millis(200), monitor.wait_for_shutdown())
            .await
            .expect("should have signalled shutdown exactly once armed");
    }
}
