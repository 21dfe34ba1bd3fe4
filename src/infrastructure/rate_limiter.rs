//! Non-preemptive concurrency limiter (B) guarding downloads and extractions.
//!
//! `tokio::sync::Semaphore` already grants permits in FIFO arrival order, so
//! the limiter is a thin wrapper that also exposes the current queue depth
//! for the admin `Stats()` surface and for tracing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Caps the number of concurrently in-flight operations of one kind.
pub struct RateLimiter {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl RateLimiter {
    #[must_use]
    pub fn new(name: &'static str, max_concurrent: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Blocks until a permit is available, holding admission until the
    /// returned guard is dropped. Requests queue in strict arrival order;
    /// an in-flight holder is never preempted for a later arrival.
    pub async fn acquire(&self) -> RateLimiterPermit {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore is never closed");
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        trace!(limiter = self.name, "acquired rate limiter permit");
        RateLimiterPermit { _permit: permit }
    }

    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Dropping this releases the permit back to the limiter.
pub struct RateLimiterPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_configured_concurrency() {
        let limiter = RateLimiter::new("test", 2);
        let p1 = limiter.acquire().await;
        let p2 = limiter.acquire().await;
        assert_eq!(limiter.available(), 0);
        drop(p1);
        drop(p2);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn third_acquire_waits_for_a_release() {
        let limiter = Arc::new(RateLimiter::new("test", 1));
        let p1 = limiter.acquire().await;

        let limiter2 = limiter.clone();
        let waiter = tokio::spawn(async move {
            let _p2 = limiter2.acquire().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.waiting(), 1);

        drop(p1);
        waiter.await.unwrap();
    }
}
