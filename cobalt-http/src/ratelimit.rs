//! Bucketed REST rate limiting.
//!
//! Each canonical route owns a [`SequentialBucket`]: requests on the route
//! run strictly one at a time, and each completion reports the allowance
//! headers back so the next dispatch can wait out an exhausted window. A
//! process-wide global lockout gates every bucket when the platform
//! signals a global limit.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Serial executor and allowance tracking for one route.
pub struct SequentialBucket {
    serial: Arc<Semaphore>,
    state: Mutex<BucketState>,
}

struct BucketState {
    limit: u32,
    remaining: u32,
    reset_at: Option<Instant>,
}

/// Held for the duration of one request; dropping it releases the route.
pub struct BucketPermit {
    _permit: OwnedSemaphorePermit,
}

impl SequentialBucket {
    fn new() -> Self {
        Self {
            serial: Arc::new(Semaphore::new(1)),
            state: Mutex::new(BucketState {
                limit: 1,
                remaining: 1,
                reset_at: None,
            }),
        }
    }

    /// Wait until this bucket may dispatch: one request at a time, and
    /// an exhausted window delays until its reset instant.
    pub async fn acquire(&self) -> Result<BucketPermit, crate::HttpError> {
        let permit = Arc::clone(&self.serial)
            .acquire_owned()
            .await
            .map_err(|_| crate::HttpError::Closed)?;

        loop {
            let wait = {
                let state = self.state.lock();
                match state.reset_at {
                    Some(reset_at) if state.remaining == 0 => {
                        reset_at.checked_duration_since(Instant::now())
                    }
                    _ => None,
                }
            };

            match wait {
                Some(delay) if !delay.is_zero() => sleep(delay).await,
                _ => break,
            }
        }

        Ok(BucketPermit { _permit: permit })
    }

    /// Ingest the allowance reported by a completed request.
    pub fn complete(&self, limit: Option<u32>, remaining: Option<u32>, reset_at: Option<Instant>) {
        let mut state = self.state.lock();
        if let Some(limit) = limit {
            state.limit = limit;
        }
        if let Some(remaining) = remaining {
            state.remaining = remaining;
        }
        if let Some(reset_at) = reset_at {
            state.reset_at = Some(reset_at);
        }
    }

    /// Force the next dispatch to wait until `reset_at` (non-global 429).
    pub fn lock_until(&self, reset_at: Instant) {
        let mut state = self.state.lock();
        state.remaining = 0;
        state.reset_at = Some(reset_at);
    }

    /// Reported per-window allowance.
    pub fn limit(&self) -> u32 {
        self.state.lock().limit
    }

    /// Requests left in the current window, as last reported.
    pub fn remaining(&self) -> u32 {
        self.state.lock().remaining
    }
}

/// Rate-limit fabric shared by all routes of one client.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<SequentialBucket>>,
    global_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            global_until: Mutex::new(None),
        }
    }

    /// The bucket for a canonical route, created on first use.
    pub fn bucket(&self, route: &str) -> Arc<SequentialBucket> {
        self.buckets
            .entry(route.to_string())
            .or_insert_with(|| Arc::new(SequentialBucket::new()))
            .clone()
    }

    /// Sleep through any active global lockout.
    pub async fn wait_global(&self) {
        loop {
            let wait = {
                let until = self.global_until.lock();
                until.and_then(|t| t.checked_duration_since(Instant::now()))
            };
            match wait {
                Some(delay) if !delay.is_zero() => sleep(delay).await,
                _ => return,
            }
        }
    }

    /// Engage the global lockout; every bucket waits it out.
    pub fn set_global(&self, retry_after: Duration) {
        debug!(retry_after_ms = retry_after.as_millis() as u64, "global rate limit engaged");
        let mut until = self.global_until.lock();
        let target = Instant::now() + retry_after;
        if until.map_or(true, |current| target > current) {
            *until = Some(target);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn requests_on_a_route_are_serial() {
        let limiter = Arc::new(RateLimiter::new());
        let bucket = limiter.bucket("GET:/gateway/bot");
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let bucket = Arc::clone(&bucket);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let permit = bucket.acquire().await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_window_waits_for_reset() {
        let bucket = SequentialBucket::new();
        bucket.complete(Some(5), Some(0), Some(Instant::now() + Duration::from_secs(2)));

        let started = Instant::now();
        let permit = bucket.acquire().await.unwrap();
        drop(permit);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn global_lockout_blocks_until_release() {
        let limiter = RateLimiter::new();
        limiter.set_global(Duration::from_millis(500));

        let started = Instant::now();
        limiter.wait_global().await;
        assert!(started.elapsed() >= Duration::from_millis(500));

        // Once expired it no longer blocks.
        let started = Instant::now();
        limiter.wait_global().await;
        assert!(started.elapsed() < Duration::from_millis(1));
    }
}
