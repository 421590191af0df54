//! Caps simultaneous in-flight upstream actions and enforces a minimum
//! interval between dispatches.
//!
//! Grounded in the teacher's pervasive `tokio::sync` usage (`mpsc`,
//! `oneshot`, `RwLock`); the FIFO-fair bounded concurrency comes from
//! `tokio::sync::Semaphore`, and the permit is an RAII guard so the slot is
//! released automatically on drop, same shape as the teacher's other
//! scope-guarded resources.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_interval: Duration,
    last_dispatch: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_concurrency: usize, min_interval_ms: u64) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            min_interval: Duration::from_millis(min_interval_ms),
            last_dispatch: Arc::new(Mutex::new(None)),
        }
    }

    /// Suspends until a slot is free and the minimum interval has elapsed
    /// since the previous dispatch. Returns a permit; dropping it releases
    /// the slot.
    pub async fn acquire(&self) -> RateLimitPermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore is never closed");

        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());

        RateLimitPermit { _permit: permit }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// RAII permit; the slot is released when this is dropped.
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_rate_limiter_caps_concurrency() {
        let limiter = Arc::new(RateLimiter::new(2, 0));
        assert_eq!(limiter.available_permits(), 2);
        let p1 = limiter.acquire().await;
        let p2 = limiter.acquire().await;
        assert_eq!(limiter.available_permits(), 0);
        drop(p1);
        assert_eq!(limiter.available_permits(), 1);
        drop(p2);
        assert_eq!(limiter.available_permits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_enforces_min_interval() {
        let limiter = RateLimiter::new(10, 50);
        let start = Instant::now();
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_rate_limiter_releases_on_drop_under_contention() {
        let limiter = Arc::new(RateLimiter::new(1, 0));
        let completed = Arc::new(AtomicUsize::new(0));

        let l1 = limiter.clone();
        let c1 = completed.clone();
        let h1 = tokio::spawn(async move {
            let _permit = l1.acquire().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            c1.fetch_add(1, Ordering::SeqCst);
        });

        let l2 = limiter.clone();
        let c2 = completed.clone();
        let h2 = tokio::spawn(async move {
            let _permit = l2.acquire().await;
            c2.fetch_add(1, Ordering::SeqCst);
        });

        let _ = tokio::join!(h1, h2);
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }
}
