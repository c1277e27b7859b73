//! Session-start rate limiting.
//!
//! The platform caps how quickly sessions may identify. Concurrency is
//! bucketed: shards whose ids are congruent modulo `max_concurrency` share
//! a slot that frees five seconds after each acquisition.

use crate::error::GatewayError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

/// How long an identify slot stays occupied.
const SLOT_HOLD: Duration = Duration::from_secs(5);

/// Gate on IDENTIFY operations, shared by every shard of a manager.
pub struct SessionStartLimiter {
    buckets: Vec<Arc<Semaphore>>,
}

impl SessionStartLimiter {
    /// Build a limiter with `max_concurrency` identify buckets.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        let buckets = (0..max_concurrency.max(1))
            .map(|_| Arc::new(Semaphore::new(1)))
            .collect();
        Self { buckets }
    }

    /// Number of identify buckets.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.buckets.len()
    }

    /// Wait for the identify slot of `shard_id`'s bucket. The slot is
    /// released automatically after the hold window.
    pub async fn acquire(&self, shard_id: u16) -> Result<(), GatewayError> {
        let bucket = &self.buckets[shard_id as usize % self.buckets.len()];
        let permit = Arc::clone(bucket).acquire_owned().await.map_err(|_| {
            GatewayError::ChannelSend("session-start limiter closed".to_string())
        })?;

        tokio::spawn(async move {
            sleep(SLOT_HOLD).await;
            drop(permit);
        });

        Ok(())
    }

    /// Whether `shard_id`'s bucket currently has a free slot.
    #[must_use]
    pub fn slot_available(&self, shard_id: u16) -> bool {
        self.buckets[shard_id as usize % self.buckets.len()].available_permits() > 0
    }
}

impl Default for SessionStartLimiter {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn buckets_key_by_shard_modulo() {
        let limiter = SessionStartLimiter::new(2);

        limiter.acquire(0).await.unwrap();
        assert!(!limiter.slot_available(0));
        // Shard 1 lands in the other bucket.
        assert!(limiter.slot_available(1));
        // Shard 2 shares bucket 0.
        assert!(!limiter.slot_available(2));
    }

    #[tokio::test(start_paused = true)]
    async fn slot_frees_after_hold_window() {
        let limiter = SessionStartLimiter::new(1);
        limiter.acquire(0).await.unwrap();
        assert!(!limiter.slot_available(0));

        sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(limiter.slot_available(0));
    }
}
