//! Token-bucket rate limiting for the shard send path.
//!
//! A [`Bucket`] admits `tokens` task executions per `interval`, with
//! `reserved` of them set aside for priority traffic (heartbeats). Tasks
//! run FIFO within their class; priority tasks dispatch ahead of normal
//! ones. When the window is exhausted a single wake timer is armed for the
//! window boundary, stretched by the observed gateway latency so a refill
//! does not burst into a server-side window that has not rolled over yet.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// A queued unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Latency sentinel meaning "not measured"; treated as zero.
const UNMEASURED: u64 = u64::MAX;

#[derive(Clone)]
pub struct Bucket {
    inner: Arc<Inner>,
}

struct Inner {
    tokens: u32,
    reserved: u32,
    interval: Duration,
    latency_ms: Arc<AtomicU64>,
    state: Mutex<State>,
}

struct State {
    used: u32,
    window_start: Instant,
    priority: VecDeque<Task>,
    normal: VecDeque<Task>,
    timer_armed: bool,
}

impl Bucket {
    /// A bucket with no reserved lane and no latency adjustment.
    pub fn new(tokens: u32, interval: Duration) -> Self {
        Self::with_reserved(tokens, interval, 0, Arc::new(AtomicU64::new(UNMEASURED)))
    }

    /// A bucket with `reserved` tokens available only to priority tasks.
    /// `latency_ms` stretches the refill timer by the value it holds.
    pub fn with_reserved(
        tokens: u32,
        interval: Duration,
        reserved: u32,
        latency_ms: Arc<AtomicU64>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tokens,
                reserved,
                interval,
                latency_ms,
                state: Mutex::new(State {
                    used: 0,
                    window_start: Instant::now(),
                    priority: VecDeque::new(),
                    normal: VecDeque::new(),
                    timer_armed: false,
                }),
            }),
        }
    }

    /// Enqueue a task. Priority tasks may consume the reserved lane and
    /// run ahead of queued normal tasks.
    pub fn queue(&self, task: Task, priority: bool) {
        {
            let mut state = self.inner.state.lock();
            if priority {
                state.priority.push_back(task);
            } else {
                state.normal.push_back(task);
            }
        }
        self.check();
    }

    /// Dispatch whatever the current window allows, arming the refill
    /// timer when work remains. Concurrent callers coalesce onto one
    /// armed timer.
    fn check(&self) {
        let mut runnable: Vec<Task> = Vec::new();
        let mut wake_after: Option<Duration> = None;

        {
            let inner = &*self.inner;
            let mut state = inner.state.lock();
            let now = Instant::now();

            if now.duration_since(state.window_start) >= inner.interval {
                state.used = 0;
                state.window_start = now;
            }

            while state.used < inner.tokens {
                match state.priority.pop_front() {
                    Some(task) => {
                        state.used += 1;
                        runnable.push(task);
                    }
                    None => break,
                }
            }

            let general_cap = inner.tokens.saturating_sub(inner.reserved);
            while state.used < general_cap {
                match state.normal.pop_front() {
                    Some(task) => {
                        state.used += 1;
                        runnable.push(task);
                    }
                    None => break,
                }
            }

            if (!state.priority.is_empty() || !state.normal.is_empty()) && !state.timer_armed {
                state.timer_armed = true;
                let elapsed = now.duration_since(state.window_start);
                let latency = match inner.latency_ms.load(Ordering::Acquire) {
                    UNMEASURED => Duration::ZERO,
                    ms => Duration::from_millis(ms),
                };
                wake_after = Some(inner.interval.saturating_sub(elapsed) + latency);
            }
        }

        for task in runnable {
            task();
        }

        if let Some(delay) = wake_after {
            let bucket = self.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                bucket.inner.state.lock().timer_armed = false;
                bucket.check();
            });
        }
    }

    /// Tasks waiting for a future window.
    pub fn queued(&self) -> usize {
        let state = self.inner.state.lock();
        state.priority.len() + state.normal.len()
    }
}

/// A task that runs once its countdown reaches zero.
///
/// Presence updates pass through two buckets in series; each bucket fires
/// the shared task and only the final fire executes the payload.
#[derive(Clone)]
pub struct SharedTask {
    remaining: Arc<AtomicU32>,
    slot: Arc<Mutex<Option<Task>>>,
}

impl SharedTask {
    pub fn new(wait_for: u32, task: Task) -> Self {
        Self {
            remaining: Arc::new(AtomicU32::new(wait_for)),
            slot: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Count one fire; the wrapped task runs on the final one.
    pub fn fire(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(task) = self.slot.lock().take() {
                task();
            }
        }
    }

    /// A boxed task firing this counter, for enqueueing into a bucket.
    pub fn as_task(&self) -> Task {
        let shared = self.clone();
        Box::new(move || shared.fire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |name: &'static str| -> Task {
                let log = Arc::clone(&log);
                Box::new(move || log.lock().push(name))
            }
        };
        (log, make)
    }

    #[tokio::test(start_paused = true)]
    async fn reserved_lane_admits_priority_when_exhausted() {
        let bucket = Bucket::with_reserved(
            2,
            Duration::from_secs(60),
            1,
            Arc::new(AtomicU64::new(UNMEASURED)),
        );
        let (log, task) = recorder();

        bucket.queue(task("first"), false);
        bucket.queue(task("second"), false);
        // One general slot: "first" runs, "second" holds for the window.
        assert_eq!(*log.lock(), vec!["first"]);

        bucket.queue(task("beat"), true);
        assert_eq!(*log.lock(), vec!["first", "beat"]);

        bucket.queue(task("third"), false);
        assert_eq!(log.lock().len(), 2);

        // Next window: one general slot again, in FIFO order.
        sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(*log.lock(), vec!["first", "beat", "second"]);

        sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(*log.lock(), vec!["first", "beat", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn priority_dispatches_ahead_of_queued_normal() {
        let bucket = Bucket::new(1, Duration::from_secs(60));
        let (log, task) = recorder();

        bucket.queue(task("a"), false);
        bucket.queue(task("b"), false);
        bucket.queue(task("p"), true);
        assert_eq!(*log.lock(), vec!["a"]);

        sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        // Refill serves the priority queue first.
        assert_eq!(*log.lock(), vec!["a", "p"]);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_stretches_the_refill() {
        let latency = Arc::new(AtomicU64::new(500));
        let bucket = Bucket::with_reserved(1, Duration::from_secs(60), 0, latency);
        let (log, task) = recorder();

        bucket.queue(task("now"), false);
        bucket.queue(task("later"), false);
        assert_eq!(*log.lock(), vec!["now"]);

        sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(log.lock().len(), 1, "refill waits out the latency");

        sleep(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(*log.lock(), vec!["now", "later"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_task_runs_on_final_fire() {
        let (log, task) = recorder();
        let shared = SharedTask::new(2, task("both"));

        let a = Bucket::new(5, Duration::from_secs(60));
        let b = Bucket::new(5, Duration::from_secs(60));

        a.queue(shared.as_task(), false);
        assert!(log.lock().is_empty());

        b.queue(shared.as_task(), false);
        assert_eq!(*log.lock(), vec!["both"]);
    }
}
