//! The client façade.
//!
//! A [`Client`] owns the REST client, the cache, the voice manager and —
//! once connected — the shard manager. `connect` resolves the gateway
//! probe, spawns the configured shard range behind the session-start
//! queue, and starts the dispatcher that keeps the cache current and fans
//! events out to the [`EventHandler`].

use crate::dispatch::Dispatcher;
use crate::error::CobaltError;
use crate::handler::{Context, EventHandler};

use ahash::AHashSet;
use cobalt_cache::InMemoryCache;
use cobalt_gateway::{Encoding, ShardConfig, ShardManager, ShardManagerConfig};
use cobalt_http::HttpClient;
use cobalt_model::{ClientPresence, Intents, Snowflake, Token, User};
use cobalt_voice::{VoiceManager, VoiceOptions, VoiceSession};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shard count selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxShards {
    /// Use the count recommended by the gateway probe.
    #[default]
    Auto,
    /// Use exactly this many shards.
    Fixed(u16),
}

/// Everything the core recognizes about how to run a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Intent bits; `None` falls back to `guild_subscriptions`.
    pub intents: Option<Intents>,

    /// Presence/typing subscription flag for intent-less sessions.
    pub guild_subscriptions: bool,

    /// zlib-stream transport compression.
    pub compress: bool,

    /// Binary payload encoding instead of JSON.
    pub binary_encoding: bool,

    /// Offline-member delivery cutoff (clamped to 50..=250).
    pub large_threshold: u8,

    /// Request all guild members once each shard is ready.
    pub get_all_users: bool,

    /// Reconnect automatically on unclean closes.
    pub autoreconnect: bool,

    pub max_resume_attempts: u32,

    pub max_reconnect_attempts: u32,

    /// Override for the reconnect delay schedule `(last_delay_ms,
    /// attempts) -> next_delay_ms`.
    pub reconnect_delay: Option<fn(u64, u32) -> u64>,

    pub connection_timeout: Duration,

    pub request_timeout: Duration,

    pub guild_create_timeout: Duration,

    pub first_shard_id: u16,

    /// Defaults to the last shard of the resolved count.
    pub last_shard_id: Option<u16>,

    pub max_shards: MaxShards,

    /// Dispatch names dropped before demultiplexing.
    pub disable_events: HashSet<String>,

    /// Re-establish voice sessions found in initial voice states.
    pub seed_voice_connections: bool,

    /// Presence sent with IDENTIFY and replicated to every shard.
    pub presence: ClientPresence,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            intents: Some(Intents::default()),
            guild_subscriptions: true,
            compress: false,
            binary_encoding: false,
            large_threshold: 250,
            get_all_users: false,
            autoreconnect: true,
            max_resume_attempts: 10,
            max_reconnect_attempts: 10,
            reconnect_delay: None,
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            guild_create_timeout: Duration::from_secs(2),
            first_shard_id: 0,
            last_shard_id: None,
            max_shards: MaxShards::Auto,
            disable_events: HashSet::new(),
            seed_voice_connections: false,
            presence: ClientPresence::default(),
        }
    }
}

struct NoopHandler;

#[async_trait::async_trait]
impl EventHandler for NoopHandler {}

/// The Helselia client.
pub struct Client {
    pub http: Arc<HttpClient>,
    pub cache: Arc<InMemoryCache>,
    pub voice: Arc<VoiceManager>,

    token: Token,
    options: ClientOptions,
    handler: Arc<dyn EventHandler>,
    presence: RwLock<ClientPresence>,
    current_user: Arc<RwLock<Option<User>>>,
    manager: RwLock<Option<Arc<ShardManager>>>,
    total_shards: AtomicU16,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Start building a client for a bot token.
    pub fn builder(token: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(token)
    }

    /// Resolve the gateway, spawn the shard range and start dispatching.
    pub async fn connect(&self) -> Result<(), CobaltError> {
        if self.manager.read().is_some() {
            return Ok(());
        }

        let gateway = self.http.get_gateway_bot().await?;
        let limit = &gateway.session_start_limit;

        let total = match self.options.max_shards {
            MaxShards::Auto => gateway.shards.max(1),
            MaxShards::Fixed(n) => n.max(1),
        };
        if limit.remaining < u32::from(total) {
            warn!(
                remaining = limit.remaining,
                reset_after_ms = limit.reset_after,
                shards = total,
                "session start budget below shard count"
            );
        }

        let first = self.options.first_shard_id.min(total - 1);
        let last = self
            .options
            .last_shard_id
            .unwrap_or(total - 1)
            .clamp(first, total - 1);

        info!(
            shards = total,
            first,
            last,
            max_concurrency = limit.max_concurrency,
            "connecting"
        );

        let shard_config = ShardConfig {
            token: self.token.clone(),
            intents: self.options.intents,
            guild_subscriptions: self.options.guild_subscriptions,
            gateway_url: gateway.url,
            encoding: if self.options.binary_encoding {
                Encoding::Etf
            } else {
                Encoding::Json
            },
            compress: self.options.compress,
            large_threshold: self.options.large_threshold.clamp(50, 250),
            autoreconnect: self.options.autoreconnect,
            max_reconnect_attempts: self.options.max_reconnect_attempts,
            max_resume_attempts: self.options.max_resume_attempts,
            get_all_users: self.options.get_all_users,
            connection_timeout: self.options.connection_timeout,
            request_timeout: self.options.request_timeout,
            guild_create_timeout: self.options.guild_create_timeout,
            presence: self.presence.read().clone(),
            disabled_events: self
                .options
                .disable_events
                .iter()
                .cloned()
                .collect::<AHashSet<String>>(),
            reconnect_delay: self.options.reconnect_delay,
        };

        let manager_config = ShardManagerConfig {
            shard: shard_config,
            first_shard_id: first,
            last_shard_id: last,
            total_shards: total,
            max_concurrency: limit.max_concurrency.max(1) as usize,
        };

        let (manager, events) = ShardManager::new(manager_config);
        self.total_shards.store(total, Ordering::SeqCst);
        *self.manager.write() = Some(Arc::clone(&manager));

        let dispatcher = Dispatcher {
            http: Arc::clone(&self.http),
            cache: Arc::clone(&self.cache),
            voice: Arc::clone(&self.voice),
            manager: Arc::clone(&manager),
            handler: Arc::clone(&self.handler),
            current_user: Arc::clone(&self.current_user),
            seed_voice_connections: self.options.seed_voice_connections,
            total_shards: total,
        };
        *self.dispatch_handle.lock() = Some(tokio::spawn(dispatcher.run(events)));

        manager.connect_all();
        Ok(())
    }

    /// Connect and block until the event stream ends.
    pub async fn start(&self) -> Result<(), CobaltError> {
        self.connect().await?;
        let handle = self.dispatch_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Stop every shard, clear the connect queue and tear down voice.
    pub async fn disconnect(&self) {
        let manager = self.manager.write().take();
        if let Some(manager) = manager {
            manager.shutdown().await;
        }
        self.voice.disconnect_all();
        if let Some(handle) = self.dispatch_handle.lock().take() {
            handle.abort();
        }
    }

    /// The shard manager, once connected.
    pub fn shard_manager(&self) -> Option<Arc<ShardManager>> {
        self.manager.read().clone()
    }

    /// The session user, after the first READY.
    pub fn current_user(&self) -> Option<User> {
        self.current_user.read().clone()
    }

    /// The shard a guild routes to (`guild id mod total shards`).
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> u16 {
        let total = self.total_shards.load(Ordering::SeqCst).max(1);
        (guild_id.get() % u64::from(total)) as u16
    }

    /// Replace the client presence and replicate it to every shard.
    ///
    /// The change is not echoed back as a local `presence_update` event;
    /// listeners only observe what the gateway sends.
    pub fn edit_status(&self, presence: ClientPresence) {
        *self.presence.write() = presence.clone();
        if let Some(manager) = &*self.manager.read() {
            manager.update_status_all(presence);
        }
    }

    /// Join a voice channel: sends the gateway voice-state update on the
    /// owning shard and completes when the rendezvous produces a ready
    /// session.
    pub async fn join_voice_channel(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        options: VoiceOptions,
    ) -> Result<Arc<VoiceSession>, CobaltError> {
        let shard_id = self.shard_for_guild(guild_id);
        let shard = self
            .shard_manager()
            .and_then(|m| m.shard(shard_id))
            .ok_or(CobaltError::NotConnected)?;

        shard.update_voice_state(
            guild_id,
            Some(channel_id),
            options.self_mute,
            options.self_deaf,
        )?;

        self.voice
            .join(guild_id, channel_id, options, shard_id)
            .await
            .map_err(CobaltError::from)
    }

    /// Leave a guild's voice channel and destroy its session.
    pub async fn leave_voice_channel(&self, guild_id: Snowflake) -> Result<(), CobaltError> {
        let shard_id = self.shard_for_guild(guild_id);
        if let Some(shard) = self.shard_manager().and_then(|m| m.shard(shard_id)) {
            shard.update_voice_state(guild_id, None, false, false)?;
        }
        self.voice.leave(guild_id);
        Ok(())
    }

    /// A context detached from any event, for driving the client from
    /// outside a handler.
    pub fn context(&self, shard_id: u16) -> Option<Context> {
        let shard = self.shard_manager()?.shard(shard_id)?;
        Some(Context {
            http: Arc::clone(&self.http),
            cache: Arc::clone(&self.cache),
            voice: Arc::clone(&self.voice),
            shard,
        })
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    token: String,
    bot: bool,
    options: ClientOptions,
    handler: Option<Arc<dyn EventHandler>>,
}

impl ClientBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            bot: true,
            options: ClientOptions::default(),
            handler: None,
        }
    }

    /// Authenticate as a user account instead of a bot.
    #[must_use]
    pub fn user_account(mut self) -> Self {
        self.bot = false;
        self
    }

    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn intents(mut self, intents: Intents) -> Self {
        self.options.intents = Some(intents);
        self
    }

    /// Drop intents entirely; the session falls back to
    /// `guild_subscriptions`.
    #[must_use]
    pub fn without_intents(mut self, guild_subscriptions: bool) -> Self {
        self.options.intents = None;
        self.options.guild_subscriptions = guild_subscriptions;
        self
    }

    #[must_use]
    pub fn compress(mut self, compress: bool) -> Self {
        self.options.compress = compress;
        self
    }

    #[must_use]
    pub fn max_shards(mut self, max_shards: MaxShards) -> Self {
        self.options.max_shards = max_shards;
        self
    }

    #[must_use]
    pub fn disable_event(mut self, name: impl Into<String>) -> Self {
        self.options.disable_events.insert(name.into());
        self
    }

    #[must_use]
    pub fn presence(mut self, presence: ClientPresence) -> Self {
        self.options.presence = presence;
        self
    }

    pub fn event_handler<H: EventHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Client, CobaltError> {
        let token = if self.bot {
            Token::bot(&self.token)
        } else {
            Token::user(&self.token)
        };

        let http = Arc::new(HttpClient::with_request_timeout(
            token.clone(),
            self.options.request_timeout,
        )?);

        Ok(Client {
            http,
            cache: Arc::new(InMemoryCache::new()),
            voice: Arc::new(VoiceManager::new()),
            token,
            presence: RwLock::new(self.options.presence.clone()),
            options: self.options,
            handler: self.handler.unwrap_or_else(|| Arc::new(NoopHandler)),
            current_user: Arc::new(RwLock::new(None)),
            manager: RwLock::new(None),
            total_shards: AtomicU16::new(1),
            dispatch_handle: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_a_client() {
        let client = Client::builder("token")
            .intents(Intents::GUILDS | Intents::GUILD_VOICE_STATES)
            .disable_event("TYPING_START")
            .build()
            .unwrap();

        assert!(client.current_user().is_none());
        assert!(client.shard_manager().is_none());
    }

    #[test]
    fn guild_routing_uses_modulo() {
        let client = Client::builder("token").build().unwrap();
        client.total_shards.store(4, Ordering::SeqCst);

        assert_eq!(client.shard_for_guild(Snowflake::new(7)), 3);
        assert_eq!(client.shard_for_guild(Snowflake::new(8)), 0);
    }

    #[test]
    fn large_threshold_is_clamped_at_connect_config() {
        let mut options = ClientOptions::default();
        options.large_threshold = 10;
        assert_eq!(options.large_threshold.clamp(50, 250), 50);
    }
}
