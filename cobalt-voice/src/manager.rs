//! Pending-join table and VOICE_SERVER_UPDATE routing.
//!
//! A join either adopts a live session immediately, waits one-shot on a
//! session that is still negotiating, or records a pending entry that a
//! matching VOICE_SERVER_UPDATE completes. Pending entries live at most
//! ten seconds, independent of the session's own lifecycle.

use crate::error::VoiceError;
use crate::session::{SessionEvent, VoiceConnectionParams, VoiceOptions, VoiceSession};

use cobalt_model::{Snowflake, VoiceServerUpdateEvent};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// How long a pending join waits for its VOICE_SERVER_UPDATE.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

type JoinResult = Result<Arc<VoiceSession>, VoiceError>;

struct PendingJoin {
    channel_id: Snowflake,
    options: VoiceOptions,
    shard_id: u16,
    resolver: oneshot::Sender<JoinResult>,
    /// One-shot listeners are already attached to a session.
    waiting: bool,
}

/// Bridges gateway voice-state traffic and per-guild voice sessions.
pub struct VoiceManager {
    sessions: DashMap<Snowflake, Arc<VoiceSession>>,
    pending: Arc<Mutex<HashMap<Snowflake, PendingJoin>>>,
}

impl VoiceManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The live session for a guild, if any.
    pub fn get(&self, guild_id: Snowflake) -> Option<Arc<VoiceSession>> {
        self.sessions.get(&guild_id).map(|s| Arc::clone(&s))
    }

    /// Join `channel_id` in `guild_id`.
    ///
    /// The caller is responsible for sending the gateway voice-state
    /// update on the owning shard; this future completes when the
    /// resulting session reaches ready, and fails on session
    /// disconnect/error or after the ten-second rendezvous window.
    pub async fn join(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        options: VoiceOptions,
        shard_id: u16,
    ) -> JoinResult {
        if let Some(session) = self.get(guild_id) {
            if session.is_ready() {
                // Same-guild move: no rendezvous needed.
                session.switch_channel(channel_id);
                return Ok(session);
            }

            // A session is negotiating: ride its next transition.
            let mut events = session.subscribe();
            return match events.recv().await {
                Ok(SessionEvent::Ready) => Ok(session),
                Ok(SessionEvent::Disconnect) | Err(_) => Err(VoiceError::Disconnected),
                Ok(SessionEvent::Error(message)) => Err(VoiceError::Session(message)),
            };
        }

        let (resolver, receiver) = oneshot::channel();
        self.pending.lock().insert(
            guild_id,
            PendingJoin {
                channel_id,
                options,
                shard_id,
                resolver,
                waiting: false,
            },
        );
        debug!(guild_id = %guild_id, channel_id = %channel_id, "voice join pending");

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            sleep(JOIN_TIMEOUT).await;
            if let Some(entry) = pending.lock().remove(&guild_id) {
                warn!(guild_id = %guild_id, "voice join timed out");
                let _ = entry.resolver.send(Err(VoiceError::ConnectionTimeout));
            }
        });

        receiver
            .await
            .unwrap_or(Err(VoiceError::Disconnected))
    }

    /// Route a VOICE_SERVER_UPDATE observed on `shard_id` for the bot
    /// user `user_id` under the gateway voice session `session_id`.
    pub fn voice_server_update(
        &self,
        update: &VoiceServerUpdateEvent,
        session_id: &str,
        user_id: Snowflake,
        shard_id: u16,
    ) {
        let guild_id = update.guild_id;

        let (channel_id, options, attach) = {
            let mut pending = self.pending.lock();
            match pending.get_mut(&guild_id) {
                Some(entry) => {
                    let attach = !entry.waiting;
                    entry.waiting = true;
                    (entry.channel_id, entry.options, attach)
                }
                None => {
                    let Some(session) = self.get(guild_id) else {
                        debug!(guild_id = %guild_id, "voice server update without session or pending join");
                        return;
                    };
                    (session.channel_id(), session.options(), false)
                }
            }
        };

        let session = self
            .sessions
            .entry(guild_id)
            .or_insert_with(|| VoiceSession::new(guild_id, channel_id, options))
            .clone();

        if attach {
            self.attach_listeners(guild_id, &session);
        }

        info!(shard_id, guild_id = %guild_id, "voice server update matched");
        if let Err(err) = session.connect(VoiceConnectionParams {
            channel_id,
            endpoint: update.endpoint.clone(),
            token: update.token.clone(),
            session_id: session_id.to_string(),
            user_id,
        }) {
            session.fail(err.to_string());
        }
    }

    /// One-shot, mutually exclusive ready/disconnect/error listeners
    /// resolving the pending join.
    fn attach_listeners(&self, guild_id: Snowflake, session: &Arc<VoiceSession>) {
        let mut events = session.subscribe();
        let pending = Arc::clone(&self.pending);
        let session = Arc::clone(session);

        tokio::spawn(async move {
            let result = match events.recv().await {
                Ok(SessionEvent::Ready) => Ok(session),
                Ok(SessionEvent::Disconnect) | Err(_) => Err(VoiceError::Disconnected),
                Ok(SessionEvent::Error(message)) => Err(VoiceError::Session(message)),
            };
            if let Some(entry) = pending.lock().remove(&guild_id) {
                let _ = entry.resolver.send(result);
            }
        });
    }

    /// Move the live session of `guild_id` to another channel.
    pub fn switch(&self, guild_id: Snowflake, channel_id: Snowflake) -> Result<(), VoiceError> {
        let session = self.get(guild_id).ok_or(VoiceError::NotConnected)?;
        session.switch_channel(channel_id);
        Ok(())
    }

    /// Disconnect and drop the session for `guild_id`.
    pub fn leave(&self, guild_id: Snowflake) {
        if let Some((_, session)) = self.sessions.remove(&guild_id) {
            session.disconnect();
        }
    }

    /// Reject pending joins owned by a disconnecting shard.
    pub fn reject_pending_for_shard(&self, shard_id: u16) {
        let rejected: Vec<PendingJoin> = {
            let mut pending = self.pending.lock();
            let guilds: Vec<Snowflake> = pending
                .iter()
                .filter(|(_, entry)| entry.shard_id == shard_id)
                .map(|(guild, _)| *guild)
                .collect();
            guilds
                .into_iter()
                .filter_map(|guild| pending.remove(&guild))
                .collect()
        };
        for entry in rejected {
            let _ = entry.resolver.send(Err(VoiceError::Disconnected));
        }
    }

    /// Disconnect every session and reject every pending join.
    pub fn disconnect_all(&self) {
        let guilds: Vec<Snowflake> = self.sessions.iter().map(|s| *s.key()).collect();
        for guild in guilds {
            self.leave(guild);
        }

        let drained: Vec<PendingJoin> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.resolver.send(Err(VoiceError::Disconnected));
        }
    }
}

impl Default for VoiceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(guild: u64, endpoint: Option<&str>) -> VoiceServerUpdateEvent {
        VoiceServerUpdateEvent {
            token: "tok".to_string(),
            guild_id: Snowflake::new(guild),
            endpoint: endpoint.map(str::to_owned),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn join_completes_on_server_update() {
        let manager = Arc::new(VoiceManager::new());

        let join = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .join(
                        Snowflake::new(1),
                        Snowflake::new(10),
                        VoiceOptions::default(),
                        0,
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        manager.voice_server_update(
            &update(1, Some("voice.helselia.dev")),
            "sess",
            Snowflake::new(7),
            0,
        );

        let session = join.await.unwrap().expect("join resolves");
        assert!(session.is_ready());
        assert_eq!(session.channel_id().get(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn join_times_out_without_server_update() {
        let manager = Arc::new(VoiceManager::new());

        let join = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .join(
                        Snowflake::new(2),
                        Snowflake::new(20),
                        VoiceOptions::default(),
                        0,
                    )
                    .await
            })
        };

        let result = join.await.unwrap();
        assert_eq!(result.unwrap_err(), VoiceError::ConnectionTimeout);
        assert_eq!(
            VoiceError::ConnectionTimeout.to_string(),
            "voice connection timeout"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ready_session_switches_immediately() {
        let manager = VoiceManager::new();

        // An update with neither a session nor a pending join is ignored.
        manager.voice_server_update(
            &update(3, Some("voice.helselia.dev")),
            "sess",
            Snowflake::new(7),
            0,
        );
        assert!(manager.get(Snowflake::new(3)).is_none());

        // Seed a ready session on one channel.
        let session = VoiceSession::new(
            Snowflake::new(3),
            Snowflake::new(30),
            VoiceOptions::default(),
        );
        session
            .connect(VoiceConnectionParams {
                channel_id: Snowflake::new(30),
                endpoint: Some("voice.helselia.dev".to_string()),
                token: "tok".to_string(),
                session_id: "sess".to_string(),
                user_id: Snowflake::new(7),
            })
            .unwrap();
        manager.sessions.insert(Snowflake::new(3), session);

        let joined = manager
            .join(
                Snowflake::new(3),
                Snowflake::new(31),
                VoiceOptions::default(),
                0,
            )
            .await
            .expect("immediate join");

        assert_eq!(joined.channel_id().get(), 31);
        assert!(manager.pending.lock().is_empty(), "no pending entry");
    }

    #[tokio::test(start_paused = true)]
    async fn shard_disconnect_rejects_its_pending_joins() {
        let manager = Arc::new(VoiceManager::new());

        let join = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .join(
                        Snowflake::new(4),
                        Snowflake::new(40),
                        VoiceOptions::default(),
                        3,
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;

        manager.reject_pending_for_shard(3);

        let result = join.await.unwrap();
        assert_eq!(result.unwrap_err(), VoiceError::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_disconnects_and_removes() {
        let manager = VoiceManager::new();
        let session = VoiceSession::new(
            Snowflake::new(5),
            Snowflake::new(50),
            VoiceOptions::default(),
        );
        manager.sessions.insert(Snowflake::new(5), session);

        manager.leave(Snowflake::new(5));
        assert!(manager.get(Snowflake::new(5)).is_none());
    }
}
