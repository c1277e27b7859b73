//! Guild member request tracking.
//!
//! Member requests are batched against the gateway payload ceiling, keyed
//! by a client-generated nonce, and reassembled from GUILD_MEMBERS_CHUNK
//! dispatches. A request that times out resolves with whatever arrived —
//! callers never see an error from a partial harvest.

use ahash::AHashMap;
use cobalt_model::guild::GuildMembersChunkEvent;
use cobalt_model::{Member, Snowflake};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Serialized size ceiling for one REQUEST_GUILD_MEMBERS payload.
pub(crate) const PAYLOAD_CEILING: usize = 4096;

/// Envelope bytes outside the guild id list.
const BATCH_OVERHEAD: usize = 96;

/// JSON cost of one guild id inside an id list: digits, quotes, comma.
pub(crate) fn id_cost(id: Snowflake) -> usize {
    let mut digits = 1;
    let mut value = id.get();
    while value >= 10 {
        digits += 1;
        value /= 10;
    }
    digits + 3
}

/// A batch of guilds accumulating toward one request payload.
pub(crate) struct PendingBatch {
    pub guild_ids: Vec<Snowflake>,
    pub waiters: Vec<oneshot::Sender<Vec<Member>>>,
    bytes: usize,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            guild_ids: Vec::new(),
            waiters: Vec::new(),
            bytes: BATCH_OVERHEAD,
        }
    }
}

/// A flushed request awaiting its chunks.
struct InFlight {
    members: Vec<Member>,
    waiters: Vec<oneshot::Sender<Vec<Member>>>,
}

/// Outcome of routing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkOutcome {
    /// The chunk's nonce matched an in-flight request.
    pub matched: bool,
    /// The matched request resolved with this chunk.
    pub completed: bool,
}

#[derive(Clone)]
pub(crate) struct MemberRequests {
    inner: Arc<Inner>,
}

struct Inner {
    nonce_counter: AtomicU64,
    building: Mutex<Option<PendingBatch>>,
    pending: Mutex<AHashMap<String, InFlight>>,
}

impl MemberRequests {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                nonce_counter: AtomicU64::new(0),
                building: Mutex::new(None),
                pending: Mutex::new(AHashMap::new()),
            }),
        }
    }

    pub fn next_nonce(&self, shard_id: u16) -> String {
        let n = self.inner.nonce_counter.fetch_add(1, Ordering::Relaxed);
        format!("{shard_id}-{n}")
    }

    /// Add a guild to the batch under construction. When adding it would
    /// push the serialized payload over the ceiling, the full batch is
    /// returned for immediate flush and a fresh one begins with this
    /// guild.
    pub fn enqueue(
        &self,
        guild_id: Snowflake,
        waiter: Option<oneshot::Sender<Vec<Member>>>,
    ) -> Option<PendingBatch> {
        let mut building = self.inner.building.lock();
        let cost = id_cost(guild_id);

        let crosses = building
            .as_ref()
            .is_some_and(|b| !b.guild_ids.is_empty() && b.bytes + cost > PAYLOAD_CEILING);
        let flushed = if crosses {
            building.replace(PendingBatch::new())
        } else {
            None
        };

        let batch = building.get_or_insert_with(PendingBatch::new);
        batch.guild_ids.push(guild_id);
        if let Some(waiter) = waiter {
            batch.waiters.push(waiter);
        }
        batch.bytes += cost;

        flushed
    }

    /// Take the batch under construction, if any.
    pub fn take_batch(&self) -> Option<PendingBatch> {
        self.inner
            .building
            .lock()
            .take()
            .filter(|b| !b.guild_ids.is_empty())
    }

    /// Track a flushed batch under its nonce.
    pub fn register(&self, nonce: String, batch: PendingBatch) {
        self.inner.pending.lock().insert(
            nonce,
            InFlight {
                members: Vec::new(),
                waiters: batch.waiters,
            },
        );
    }

    /// Append a chunk to its request, merging chunk presences onto the
    /// members they reference, and resolve the request on the final chunk.
    pub fn handle_chunk(&self, chunk: &GuildMembersChunkEvent) -> ChunkOutcome {
        const MISS: ChunkOutcome = ChunkOutcome {
            matched: false,
            completed: false,
        };

        let Some(nonce) = chunk.nonce.as_deref() else {
            return MISS;
        };

        let mut pending = self.inner.pending.lock();
        let Some(request) = pending.get_mut(nonce) else {
            return MISS;
        };

        let mut arrived = chunk.members.clone();
        for presence in &chunk.presences {
            if let Some(member) = arrived
                .iter_mut()
                .find(|m| m.user_id() == Some(presence.user.id))
            {
                member.status = Some(presence.status);
            }
        }
        request.members.append(&mut arrived);

        let completed = chunk.chunk_index + 1 >= chunk.chunk_count;
        if completed {
            if let Some(request) = pending.remove(nonce) {
                resolve(request);
            }
        }

        ChunkOutcome {
            matched: true,
            completed,
        }
    }

    /// Resolve a timed-out request with whatever has been received.
    pub fn expire(&self, nonce: &str) {
        if let Some(request) = self.inner.pending.lock().remove(nonce) {
            resolve(request);
        }
    }

    /// Resolve everything outstanding with partials; used on disconnect.
    pub fn resolve_all(&self) {
        let drained: Vec<InFlight> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, request)| request)
            .collect();
        for request in drained {
            resolve(request);
        }

        if let Some(batch) = self.inner.building.lock().take() {
            for waiter in batch.waiters {
                let _ = waiter.send(Vec::new());
            }
        }
    }

    /// No in-flight requests and no batch under construction.
    pub fn is_empty(&self) -> bool {
        self.inner.pending.lock().is_empty() && self.inner.building.lock().is_none()
    }
}

fn resolve(request: InFlight) {
    let mut waiters = request.waiters;
    if let Some(last) = waiters.pop() {
        for waiter in waiters {
            let _ = waiter.send(request.members.clone());
        }
        let _ = last.send(request.members);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobalt_model::guild::GuildMembersChunkEvent;

    fn chunk(nonce: &str, index: u64, count: u64, ids: &[u64]) -> GuildMembersChunkEvent {
        let members: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"user":{{"id":"{id}","username":"user{id}"}}}}"#))
            .collect();
        serde_json::from_str(&format!(
            r#"{{"guild_id":"1","members":[{}],"chunk_index":{index},"chunk_count":{count},"nonce":"{nonce}"}}"#,
            members.join(",")
        ))
        .unwrap()
    }

    #[test]
    fn chunks_concatenate_in_wire_order() {
        let requests = MemberRequests::new();
        let (tx, mut rx) = oneshot::channel();

        assert!(requests.enqueue(Snowflake::new(1), Some(tx)).is_none());
        let batch = requests.take_batch().unwrap();
        requests.register("0-0".into(), batch);

        let first = requests.handle_chunk(&chunk("0-0", 0, 2, &[10, 11]));
        assert!(first.matched && !first.completed);
        assert!(rx.try_recv().is_err());

        let second = requests.handle_chunk(&chunk("0-0", 1, 2, &[12]));
        assert!(second.matched && second.completed);

        let members = rx.try_recv().unwrap();
        let ids: Vec<u64> = members
            .iter()
            .map(|m| m.user_id().unwrap().get())
            .collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert!(requests.is_empty());
    }

    #[test]
    fn timeout_resolves_with_partial() {
        let requests = MemberRequests::new();
        let (tx, mut rx) = oneshot::channel();

        requests.enqueue(Snowflake::new(1), Some(tx));
        let batch = requests.take_batch().unwrap();
        requests.register("0-1".into(), batch);

        requests.handle_chunk(&chunk("0-1", 0, 3, &[20]));
        requests.expire("0-1");

        let members = rx.try_recv().unwrap();
        assert_eq!(members.len(), 1);
        assert!(requests.is_empty());

        // A late chunk for the expired nonce is ignored.
        let late = requests.handle_chunk(&chunk("0-1", 1, 3, &[21]));
        assert!(!late.matched);
    }

    #[test]
    fn presences_merge_onto_members() {
        let requests = MemberRequests::new();
        let (tx, mut rx) = oneshot::channel();

        requests.enqueue(Snowflake::new(1), Some(tx));
        let batch = requests.take_batch().unwrap();
        requests.register("0-2".into(), batch);

        let chunk: GuildMembersChunkEvent = serde_json::from_str(
            r#"{"guild_id":"1",
                "members":[{"user":{"id":"30","username":"a"}}],
                "chunk_index":0,"chunk_count":1,
                "presences":[{"user":{"id":"30"},"status":"idle"}],
                "nonce":"0-2"}"#,
        )
        .unwrap();
        requests.handle_chunk(&chunk);

        let members = rx.try_recv().unwrap();
        assert_eq!(members[0].status, Some(cobalt_model::Status::Idle));
    }

    #[test]
    fn disconnect_resolves_everything() {
        let requests = MemberRequests::new();
        let (tx_flushed, mut rx_flushed) = oneshot::channel();
        let (tx_building, mut rx_building) = oneshot::channel();

        requests.enqueue(Snowflake::new(1), Some(tx_flushed));
        let batch = requests.take_batch().unwrap();
        requests.register("0-3".into(), batch);
        requests.handle_chunk(&chunk("0-3", 0, 2, &[40]));

        requests.enqueue(Snowflake::new(2), Some(tx_building));

        requests.resolve_all();

        assert_eq!(rx_flushed.try_recv().unwrap().len(), 1);
        assert!(rx_building.try_recv().unwrap().is_empty());
        assert!(requests.is_empty());
    }

    #[test]
    fn batch_splits_at_payload_ceiling() {
        let requests = MemberRequests::new();

        // Ten 18-digit ids stay in one batch.
        for i in 0..10u64 {
            let flushed = requests.enqueue(Snowflake::new(100_000_000_000_000_000 + i), None);
            assert!(flushed.is_none());
        }
        let batch = requests.take_batch().unwrap();
        assert_eq!(batch.guild_ids.len(), 10);

        // Enough 18-digit ids to cross 4 KiB force early flushes.
        let mut flushed: Vec<PendingBatch> = Vec::new();
        for i in 0..250u64 {
            if let Some(batch) =
                requests.enqueue(Snowflake::new(100_000_000_000_000_000 + i), None)
            {
                flushed.push(batch);
            }
        }
        assert!(!flushed.is_empty(), "cap must split the run");
        for batch in &flushed {
            let serialized = BATCH_OVERHEAD
                + batch
                    .guild_ids
                    .iter()
                    .map(|id| id_cost(*id))
                    .sum::<usize>();
            assert!(serialized <= PAYLOAD_CEILING);
        }
    }
}
