//! Shard collection and serialized connect queue.
//!
//! The manager owns every [`Shard`] of a process, funnels their events
//! into one channel tagged by shard id, and drains a connect queue with a
//! single worker: each connect waits for a session-start slot and then for
//! the shard's handshake signal (PreReady/Resumed) before the next shard
//! dials.

use crate::error::GatewayError;
use crate::queue::SessionStartLimiter;
use crate::shard::{Shard, ShardConfig, ShardEvent, ShardState};

use dashmap::DashMap;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Configuration for a shard manager.
#[derive(Debug, Clone)]
pub struct ShardManagerConfig {
    /// Template applied to every spawned shard.
    pub shard: ShardConfig,

    /// First shard id this process runs.
    pub first_shard_id: u16,

    /// Last shard id this process runs (inclusive).
    pub last_shard_id: u16,

    /// Total shards across all processes.
    pub total_shards: u16,

    /// Identify concurrency from the session-start limit.
    pub max_concurrency: usize,
}

impl ShardManagerConfig {
    /// Run all of `total` shards in this process.
    pub fn all(shard: ShardConfig, total: u16) -> Self {
        Self {
            shard,
            first_shard_id: 0,
            last_shard_id: total.saturating_sub(1),
            total_shards: total.max(1),
            max_concurrency: 1,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }
}

struct ShardRunner {
    shard: Arc<Shard>,
    handshake: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<Result<(), GatewayError>>>>,
}

/// Owns the shards and their connect queue.
pub struct ShardManager {
    config: ShardManagerConfig,
    shards: DashMap<u16, Arc<ShardRunner>>,
    limiter: Arc<SessionStartLimiter>,
    event_tx: Sender<(u16, ShardEvent)>,
    queued: Arc<Mutex<BTreeSet<u16>>>,
    connect_tx: Sender<u16>,
}

impl ShardManager {
    /// Create a manager and the aggregated event stream, `(shard_id,
    /// event)` pairs in per-shard wire order.
    pub fn new(config: ShardManagerConfig) -> (Arc<Self>, Receiver<(u16, ShardEvent)>) {
        let (event_tx, event_rx) = flume::unbounded();
        let (connect_tx, connect_rx) = flume::unbounded();

        let manager = Arc::new(Self {
            limiter: Arc::new(SessionStartLimiter::new(config.max_concurrency)),
            config,
            shards: DashMap::new(),
            event_tx,
            queued: Arc::new(Mutex::new(BTreeSet::new())),
            connect_tx,
        });

        let worker = Arc::clone(&manager);
        tokio::spawn(async move { worker.run_connect_queue(connect_rx).await });

        (manager, event_rx)
    }

    /// Create the shard object for `id` without connecting it.
    pub fn spawn(&self, id: u16) -> Arc<Shard> {
        if let Some(runner) = self.shards.get(&id) {
            return Arc::clone(&runner.shard);
        }

        let shard = Arc::new(Shard::new(id, self.config.total_shards, self.config.shard.clone()));
        let runner = Arc::new(ShardRunner {
            shard: Arc::clone(&shard),
            handshake: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        });
        self.shards.insert(id, runner);
        debug!(shard_id = id, "shard spawned");
        shard
    }

    /// Spawn every shard in the configured range.
    pub fn spawn_all(&self) {
        for id in self.config.first_shard_id..=self.config.last_shard_id {
            self.spawn(id);
        }
    }

    /// Queue `id` for connection; a no-op when already queued.
    pub fn connect(&self, id: u16) {
        self.spawn(id);
        let mut queued = self.queued.lock();
        if queued.insert(id) {
            let _ = self.connect_tx.send(id);
        }
    }

    /// Queue the whole configured range.
    pub fn connect_all(&self) {
        for id in self.config.first_shard_id..=self.config.last_shard_id {
            self.connect(id);
        }
    }

    async fn run_connect_queue(&self, connect_rx: Receiver<u16>) {
        while let Ok(id) = connect_rx.recv_async().await {
            // Disconnect clears the queue; entries removed there are
            // skipped here.
            if !self.queued.lock().remove(&id) {
                continue;
            }

            if let Err(err) = self.limiter.acquire(id).await {
                error!(shard_id = id, error = %err, "session-start limiter failed");
                return;
            }

            let Some(runner) = self.shards.get(&id).map(|r| Arc::clone(&r)) else {
                continue;
            };

            self.start_runner(id, &runner);

            // Advance on the shard's handshake, or once the connection
            // window lapses; the session-start hold still paces identifies.
            let wait = self.config.shard.connection_timeout;
            if timeout(wait, runner.handshake.notified()).await.is_err() {
                warn!(shard_id = id, "handshake signal timed out, advancing queue");
            }
        }
    }

    fn start_runner(&self, id: u16, runner: &Arc<ShardRunner>) {
        let mut handle = runner.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let shard = Arc::clone(&runner.shard);
        let handshake = Arc::clone(&runner.handshake);
        let event_tx = self.event_tx.clone();

        let (shard_tx, shard_rx) = flume::unbounded::<ShardEvent>();

        // Forward shard events onto the aggregate channel, flagging the
        // handshake for the connect queue.
        tokio::spawn(async move {
            while let Ok(event) = shard_rx.recv_async().await {
                if matches!(event, ShardEvent::PreReady | ShardEvent::Resumed) {
                    handshake.notify_one();
                }
                if event_tx.send_async((id, event)).await.is_err() {
                    break;
                }
            }
        });

        *handle = Some(tokio::spawn(async move {
            let result = shard.run(shard_tx).await;
            if let Err(ref err) = result {
                error!(shard_id = id, error = %err, "shard stopped");
            }
            result
        }));

        info!(shard_id = id, "shard connecting");
    }

    pub fn shard(&self, id: u16) -> Option<Arc<Shard>> {
        self.shards.get(&id).map(|r| Arc::clone(&r.shard))
    }

    pub fn shard_state(&self, id: u16) -> Option<ShardState> {
        self.shards.get(&id).map(|r| r.shard.state())
    }

    pub fn shard_latency(&self, id: u16) -> Option<Duration> {
        self.shards.get(&id).and_then(|r| r.shard.latency())
    }

    pub fn shard_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.shards.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Replicate a presence to every shard.
    pub fn update_status_all(&self, presence: cobalt_model::ClientPresence) {
        for runner in self.shards.iter() {
            if let Err(err) = runner.shard.update_status(presence.clone()) {
                warn!(shard_id = *runner.key(), error = %err, "presence update failed");
            }
        }
    }

    /// Stop every shard and clear the connect queue.
    pub async fn shutdown(&self) {
        info!("shutting down shard manager");
        self.queued.lock().clear();

        for runner in self.shards.iter() {
            runner.shard.shutdown();
        }

        let handles: Vec<(u16, JoinHandle<Result<(), GatewayError>>)> = self
            .shards
            .iter()
            .filter_map(|r| r.handle.lock().take().map(|h| (*r.key(), h)))
            .collect();
        for (id, handle) in handles {
            if let Err(err) = handle.await {
                error!(shard_id = id, error = %err, "shard task panicked");
            }
        }

        info!("shard manager shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobalt_model::Token;

    fn manager_config() -> ShardManagerConfig {
        ShardManagerConfig::all(ShardConfig::new(Token::bot("test")), 4).with_max_concurrency(2)
    }

    #[tokio::test]
    async fn spawn_is_idempotent() {
        let (manager, _events) = ShardManager::new(manager_config());
        let first = manager.spawn(0);
        let again = manager.spawn(0);
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[tokio::test]
    async fn spawn_all_covers_the_range() {
        let (manager, _events) = ShardManager::new(manager_config());
        manager.spawn_all();
        assert_eq!(manager.shard_ids(), vec![0, 1, 2, 3]);
        assert_eq!(manager.shard_state(2), Some(ShardState::Disconnected));
    }

    #[tokio::test]
    async fn connect_deduplicates_queue_entries() {
        let (manager, _events) = ShardManager::new(manager_config());
        manager.connect(1);
        manager.connect(1);
        // At most one queue entry survives; the other insert was refused.
        let queued = manager.queued.lock().len();
        assert!(queued <= 1);
    }

    #[tokio::test]
    async fn shutdown_clears_the_queue() {
        let (manager, _events) = ShardManager::new(manager_config());
        manager.connect(0);
        manager.connect(1);
        manager.shutdown().await;
        assert!(manager.queued.lock().is_empty());
    }
}
