//! A per-guild voice session.
//!
//! The session models the control-plane contract the connection manager
//! depends on: it holds the negotiation parameters delivered by
//! VOICE_SERVER_UPDATE, tracks the active channel, and broadcasts
//! `ready`/`disconnect`/`error` transitions. The media transport (UDP,
//! codecs, encryption) lives behind this boundary and is out of scope
//! here; a session is ready once its negotiation parameters are complete.

use crate::error::VoiceError;
use cobalt_model::Snowflake;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Options carried from a join request into the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceOptions {
    pub self_mute: bool,
    pub self_deaf: bool,
    /// Restrict the session to Opus payloads.
    pub opus_only: bool,
    /// Allow the session to be shared across consumers.
    pub shared: bool,
}

/// Lifecycle transitions broadcast by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ready,
    Disconnect,
    Error(String),
}

/// Negotiation parameters from a VOICE_SERVER_UPDATE rendezvous.
#[derive(Debug, Clone)]
pub struct VoiceConnectionParams {
    pub channel_id: Snowflake,

    /// `None` while the platform reallocates the voice server; a
    /// follow-up update carries the replacement.
    pub endpoint: Option<String>,

    pub token: String,

    pub session_id: String,

    pub user_id: Snowflake,
}

#[derive(Debug)]
struct ServerInfo {
    endpoint: String,
    token: String,
    session_id: String,
    user_id: Snowflake,
}

/// A guild's voice session.
#[derive(Debug)]
pub struct VoiceSession {
    guild_id: Snowflake,
    channel_id: RwLock<Snowflake>,
    options: VoiceOptions,
    server: RwLock<Option<ServerInfo>>,
    ready: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl VoiceSession {
    pub fn new(guild_id: Snowflake, channel_id: Snowflake, options: VoiceOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            guild_id,
            channel_id: RwLock::new(channel_id),
            options,
            server: RwLock::new(None),
            ready: AtomicBool::new(false),
            events,
        })
    }

    pub fn guild_id(&self) -> Snowflake {
        self.guild_id
    }

    pub fn channel_id(&self) -> Snowflake {
        *self.channel_id.read()
    }

    pub fn options(&self) -> VoiceOptions {
        self.options
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Subscribe to lifecycle transitions. Subscribers only observe
    /// events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Apply negotiation parameters. With a complete parameter set the
    /// session transitions to ready; with a reallocating endpoint it
    /// holds until the follow-up update.
    pub fn connect(&self, params: VoiceConnectionParams) -> Result<(), VoiceError> {
        *self.channel_id.write() = params.channel_id;

        let Some(endpoint) = params.endpoint else {
            debug!(
                guild_id = %self.guild_id,
                "voice server reallocating, waiting for a follow-up update"
            );
            self.ready.store(false, Ordering::SeqCst);
            return Ok(());
        };

        *self.server.write() = Some(ServerInfo {
            endpoint,
            token: params.token,
            session_id: params.session_id,
            user_id: params.user_id,
        });

        let was_ready = self.ready.swap(true, Ordering::SeqCst);
        info!(
            guild_id = %self.guild_id,
            reconnect = was_ready,
            "voice session ready"
        );
        let _ = self.events.send(SessionEvent::Ready);
        Ok(())
    }

    /// Move the session to another channel within the same guild.
    pub fn switch_channel(&self, channel_id: Snowflake) {
        debug!(guild_id = %self.guild_id, channel_id = %channel_id, "switching voice channel");
        *self.channel_id.write() = channel_id;
    }

    /// Tear the session down and notify listeners.
    pub fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        *self.server.write() = None;
        info!(guild_id = %self.guild_id, "voice session disconnected");
        let _ = self.events.send(SessionEvent::Disconnect);
    }

    /// Surface a session failure to listeners.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.ready.store(false, Ordering::SeqCst);
        warn!(guild_id = %self.guild_id, error = %message, "voice session error");
        let _ = self.events.send(SessionEvent::Error(message));
    }

    /// The negotiated endpoint, once ready.
    pub fn endpoint(&self) -> Option<String> {
        self.server.read().as_ref().map(|s| s.endpoint.clone())
    }

    /// The platform session id backing this voice session.
    pub fn session_id(&self) -> Option<String> {
        self.server.read().as_ref().map(|s| s.session_id.clone())
    }

    /// The user this session speaks for.
    pub fn user_id(&self) -> Option<Snowflake> {
        self.server.read().as_ref().map(|s| s.user_id)
    }

    /// The voice token for transport negotiation.
    pub fn token(&self) -> Option<String> {
        self.server.read().as_ref().map(|s| s.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(endpoint: Option<&str>) -> VoiceConnectionParams {
        VoiceConnectionParams {
            channel_id: Snowflake::new(20),
            endpoint: endpoint.map(str::to_owned),
            token: "tok".to_string(),
            session_id: "sess".to_string(),
            user_id: Snowflake::new(7),
        }
    }

    #[tokio::test]
    async fn complete_params_make_the_session_ready() {
        let session = VoiceSession::new(
            Snowflake::new(1),
            Snowflake::new(10),
            VoiceOptions::default(),
        );
        let mut events = session.subscribe();

        session.connect(params(Some("voice.helselia.dev"))).unwrap();

        assert!(session.is_ready());
        assert_eq!(session.channel_id().get(), 20);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Ready);
    }

    #[tokio::test]
    async fn missing_endpoint_holds_readiness() {
        let session = VoiceSession::new(
            Snowflake::new(1),
            Snowflake::new(10),
            VoiceOptions::default(),
        );
        session.connect(params(None)).unwrap();
        assert!(!session.is_ready());

        session.connect(params(Some("voice.helselia.dev"))).unwrap();
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn disconnect_notifies_listeners() {
        let session = VoiceSession::new(
            Snowflake::new(1),
            Snowflake::new(10),
            VoiceOptions::default(),
        );
        session.connect(params(Some("voice.helselia.dev"))).unwrap();

        let mut events = session.subscribe();
        session.disconnect();

        assert!(!session.is_ready());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnect);
    }
}
