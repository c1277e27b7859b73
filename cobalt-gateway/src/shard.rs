//! A single gateway session.
//!
//! A [`Shard`] owns one WebSocket connection: handshake (HELLO then
//! IDENTIFY or RESUME), heartbeating with zombie detection, payload
//! decode, event demultiplexing, member-request batching and the
//! readiness gate. Reconnects follow the close-code decision table in
//! [`crate::error::CloseCode`].

use crate::bucket::{Bucket, SharedTask};
use crate::codec::{self, Encoding, FrameCodec, WireFrame};
use crate::error::{CloseCode, GatewayError};
use crate::event::{parse_event, Event};
use crate::heartbeat::Heartbeats;
use crate::members::{MemberRequests, PendingBatch};
use crate::opcode::OpCode;
use crate::payload::{
    heartbeat, GatewayPayload, GuildSelector, HelloPayload, IdentifyPayload,
    RequestGuildMembersPayload, ResumePayload, VoiceStateUpdatePayload, WireEnvelope,
};
use crate::GATEWAY_VERSION;

use ahash::AHashSet;
use cobalt_model::guild::ReadyEventData;
use cobalt_model::{ClientPresence, Intents, Member, Snowflake, Token};
use flume::Sender;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

/// Sends allowed per window on the per-shard global bucket.
const GLOBAL_BUCKET_TOKENS: u32 = 120;

/// Tokens of the global bucket reserved for priority traffic.
const GLOBAL_BUCKET_RESERVED: u32 = 5;

/// Presence updates allowed per window.
const PRESENCE_BUCKET_TOKENS: u32 = 5;

/// Window length shared by both send-path buckets.
const BUCKET_INTERVAL: Duration = Duration::from_secs(60);

/// Reconnect backoff floor and ceiling.
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Shard connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    /// Not connected.
    Disconnected,
    /// Socket dialing in progress.
    Connecting,
    /// Connected, waiting for HELLO.
    Handshaking,
    /// IDENTIFY sent, waiting for READY.
    Identifying,
    /// RESUME sent, waiting for RESUMED.
    Resuming,
    /// Session established and the readiness gate has completed.
    Ready,
}

/// Configuration for a shard.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Credential used for IDENTIFY/RESUME.
    pub token: Token,

    /// Intent bits; `None` falls back to `guild_subscriptions` semantics.
    pub intents: Option<Intents>,

    /// Presence/typing subscription flag for intent-less sessions.
    pub guild_subscriptions: bool,

    /// Gateway URL, usually from the gateway probe.
    pub gateway_url: String,

    /// Payload encoding for this connection.
    pub encoding: Encoding,

    /// Enable zlib-stream transport compression.
    pub compress: bool,

    /// Offline-member delivery cutoff, clamped to 50..=250.
    pub large_threshold: u8,

    /// Reconnect automatically on unclean closes.
    pub autoreconnect: bool,

    /// Reconnect cycles before giving up.
    pub max_reconnect_attempts: u32,

    /// Resume attempts before the session is invalidated.
    pub max_resume_attempts: u32,

    /// Request members for every known guild once ready.
    pub get_all_users: bool,

    /// Socket dial and handshake ceiling.
    pub connection_timeout: Duration,

    /// Member request ceiling.
    pub request_timeout: Duration,

    /// Quiet period after READY before the guild stream is considered
    /// complete.
    pub guild_create_timeout: Duration,

    /// Presence sent with IDENTIFY.
    pub presence: ClientPresence,

    /// Dispatch names dropped before demultiplexing.
    pub disabled_events: AHashSet<String>,

    /// Override for the reconnect delay schedule, given the previous
    /// delay in milliseconds and the attempt count. `None` uses the
    /// default randomized-growth schedule.
    pub reconnect_delay: Option<fn(last_delay_ms: u64, attempts: u32) -> u64>,
}

impl ShardConfig {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            intents: Some(Intents::default()),
            guild_subscriptions: true,
            gateway_url: crate::DEFAULT_GATEWAY_URL.to_string(),
            encoding: Encoding::Json,
            compress: false,
            large_threshold: 250,
            autoreconnect: true,
            max_reconnect_attempts: 10,
            max_resume_attempts: 10,
            get_all_users: false,
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            guild_create_timeout: Duration::from_secs(2),
            presence: ClientPresence::default(),
            disabled_events: AHashSet::new(),
            reconnect_delay: None,
        }
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn with_intents(mut self, intents: Option<Intents>) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_large_threshold(mut self, threshold: u8) -> Self {
        self.large_threshold = threshold.clamp(50, 250);
        self
    }
}

/// Signals a shard surfaces alongside dispatched events.
#[derive(Debug)]
pub enum ShardEvent {
    /// A decoded dispatch.
    Dispatch(Event),

    /// READY or RESUMED was observed; the connect queue advances on this.
    PreReady,

    /// The readiness gate completed: guild streaming, guild syncs and
    /// member drains are done.
    Ready,

    /// The session resumed.
    Resumed,

    /// The connection dropped.
    Disconnected {
        code: Option<u16>,
        reconnecting: bool,
    },

    /// A non-fatal error the shard absorbed or is retrying.
    Error(GatewayError),
}

enum ShardCommand {
    Frame(WireFrame),
    FlushMembers,
    Shutdown,
}

enum LoopAction {
    Reconnect,
    ScheduleIdentify(Duration),
}

/// Readiness gate state: guilds still streaming in, guild syncs and the
/// member drain that must complete before `ready` is announced.
struct ReadyGate {
    pending_guilds: AHashSet<Snowflake>,
    known_guilds: AHashSet<Snowflake>,
    deadline: Option<Instant>,
    unsynced: usize,
    draining: bool,
    announced: bool,
}

impl ReadyGate {
    fn new() -> Self {
        Self {
            pending_guilds: AHashSet::new(),
            known_guilds: AHashSet::new(),
            deadline: None,
            unsynced: 0,
            draining: false,
            announced: false,
        }
    }
}

/// A single gateway session.
pub struct Shard {
    id: u16,
    total: u16,
    config: ShardConfig,

    state: RwLock<ShardState>,
    session_id: RwLock<Option<String>>,
    sequence: AtomicU64,
    heartbeat: Heartbeats,
    presence: RwLock<ClientPresence>,

    global_bucket: Bucket,
    presence_bucket: Bucket,
    members: MemberRequests,
    gate: Mutex<ReadyGate>,

    connect_attempts: AtomicU32,
    resume_attempts: AtomicU32,
    backoff_ms: AtomicU64,
    shutdown: AtomicBool,

    command_tx: Sender<ShardCommand>,
    command_rx: flume::Receiver<ShardCommand>,
}

impl Shard {
    /// Create a shard with `id` out of `total`.
    pub fn new(id: u16, total: u16, config: ShardConfig) -> Self {
        let (command_tx, command_rx) = flume::unbounded();
        let heartbeat = Heartbeats::new();
        let latency = heartbeat.latency_ref();

        Self {
            id,
            total,
            presence: RwLock::new(config.presence.clone()),
            config,
            state: RwLock::new(ShardState::Disconnected),
            session_id: RwLock::new(None),
            sequence: AtomicU64::new(0),
            global_bucket: Bucket::with_reserved(
                GLOBAL_BUCKET_TOKENS,
                BUCKET_INTERVAL,
                GLOBAL_BUCKET_RESERVED,
                Arc::clone(&latency),
            ),
            presence_bucket: Bucket::with_reserved(
                PRESENCE_BUCKET_TOKENS,
                BUCKET_INTERVAL,
                0,
                latency,
            ),
            heartbeat,
            members: MemberRequests::new(),
            gate: Mutex::new(ReadyGate::new()),
            connect_attempts: AtomicU32::new(0),
            resume_attempts: AtomicU32::new(0),
            backoff_ms: AtomicU64::new(BACKOFF_BASE_MS),
            shutdown: AtomicBool::new(false),
            command_tx,
            command_rx,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn total_shards(&self) -> u16 {
        self.total
    }

    pub fn state(&self) -> ShardState {
        *self.state.read()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Last measured heartbeat round trip.
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// Request a graceful shutdown; `run` returns after the close frame.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(ShardCommand::Shutdown);
    }

    /// Drop the resumable session so the next connect identifies afresh.
    pub fn hard_reset(&self) {
        *self.session_id.write() = None;
        self.sequence.store(0, Ordering::SeqCst);
    }

    /// Replace the shard's presence and replicate it to the gateway
    /// through the presence and global buckets in series.
    pub fn update_status(&self, presence: ClientPresence) -> Result<(), GatewayError> {
        *self.presence.write() = presence.clone();

        let frame = codec::encode(
            self.config.encoding,
            &GatewayPayload::new(OpCode::StatusUpdate, &presence),
        )?;
        let tx = self.command_tx.clone();
        let shared = SharedTask::new(
            2,
            Box::new(move || {
                let _ = tx.send(ShardCommand::Frame(frame));
            }),
        );
        self.presence_bucket.queue(shared.as_task(), false);
        self.global_bucket.queue(shared.as_task(), false);
        Ok(())
    }

    /// Send a voice state update (join, move or leave a voice channel).
    pub fn update_voice_state(
        &self,
        guild_id: Snowflake,
        channel_id: Option<Snowflake>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<(), GatewayError> {
        self.send(
            OpCode::VoiceStateUpdate,
            &VoiceStateUpdatePayload {
                guild_id,
                channel_id,
                self_mute,
                self_deaf,
            },
            false,
        )
    }

    /// Request the member list of a guild.
    ///
    /// Requests issued close together coalesce into one payload up to the
    /// gateway size ceiling. The future resolves with whatever arrived
    /// when the request times out; it never errors.
    pub fn request_guild_members(
        &self,
        guild_id: Snowflake,
    ) -> oneshot::Receiver<Vec<Member>> {
        let (tx, rx) = oneshot::channel();
        if let Some(batch) = self.members.enqueue(guild_id, Some(tx)) {
            self.flush_member_batch(batch);
        }
        let _ = self.command_tx.send(ShardCommand::FlushMembers);
        rx
    }

    /// Run the shard until shutdown or a fatal error.
    pub async fn run(&self, events: Sender<ShardEvent>) -> Result<(), GatewayError> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                *self.state.write() = ShardState::Disconnected;
                return Ok(());
            }

            let outcome = self.connect_and_run(&events).await;
            *self.state.write() = ShardState::Disconnected;
            self.members.resolve_all();

            let err = match outcome {
                Ok(()) => {
                    let _ = events.send(ShardEvent::Disconnected {
                        code: None,
                        reconnecting: false,
                    });
                    return Ok(());
                }
                Err(err) => err,
            };

            match self.apply_close_policy(&err, &events) {
                ClosePolicy::Stop(fatal) => {
                    let _ = events.send(ShardEvent::Disconnected {
                        code: close_code_of(&err),
                        reconnecting: false,
                    });
                    return match fatal {
                        Some(fatal) => {
                            error!(shard_id = self.id, error = %fatal, "fatal gateway close");
                            let _ = events.send(ShardEvent::Error(err));
                            Err(fatal)
                        }
                        None => Ok(()),
                    };
                }
                ClosePolicy::Reconnect { quiet } => {
                    if !quiet {
                        warn!(shard_id = self.id, error = %err, "connection lost, reconnecting");
                        let _ = events.send(ShardEvent::Error(err));
                    }
                    let _ = events.send(ShardEvent::Disconnected {
                        code: None,
                        reconnecting: true,
                    });
                }
            }

            let attempts = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempts > self.config.max_reconnect_attempts {
                return Err(GatewayError::ReconnectExhausted { attempts });
            }

            if self.session_id.read().is_some() {
                let resumes = self.resume_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if resumes > self.config.max_resume_attempts {
                    warn!(
                        shard_id = self.id,
                        resumes, "resume attempts exhausted, falling back to identify"
                    );
                    self.hard_reset();
                    sleep(self.next_backoff()).await;
                }
                // Resume attempts reconnect immediately.
            } else {
                sleep(self.next_backoff()).await;
            }
        }
    }

    /// Advance the backoff schedule: wait the current delay, then grow it
    /// by a random factor in [1, 3) up to the cap.
    fn next_backoff(&self) -> Duration {
        let current = self.backoff_ms.load(Ordering::SeqCst);
        let next = match self.config.reconnect_delay {
            Some(delay) => delay(current, self.connect_attempts.load(Ordering::SeqCst)),
            None => {
                let factor = rand::rng().random::<f64>() * 2.0 + 1.0;
                ((current as f64) * factor).round() as u64
            }
        };
        self.backoff_ms.store(next.min(BACKOFF_CAP_MS), Ordering::SeqCst);
        Duration::from_millis(current)
    }

    fn apply_close_policy(
        &self,
        err: &GatewayError,
        _events: &Sender<ShardEvent>,
    ) -> ClosePolicy {
        match err {
            GatewayError::Closed { code, reason } => {
                if let Some(close) = CloseCode::from_code(*code) {
                    if close.invalidates_session() {
                        *self.session_id.write() = None;
                    }
                    if close.resets_sequence() {
                        self.sequence.store(0, Ordering::SeqCst);
                    }
                    if !close.should_reconnect() {
                        let fatal = if close.is_authentication_failure() {
                            GatewayError::AuthenticationFailed(format!(
                                "close code {code}: {reason}"
                            ))
                        } else {
                            GatewayError::Configuration(format!("close code {code}: {reason}"))
                        };
                        return ClosePolicy::Stop(Some(fatal));
                    }
                    return ClosePolicy::Reconnect { quiet: false };
                }

                // Clean closes carry no error and only reconnect when the
                // caller opted into automatic reconnects.
                if *code == 1000 || *code == 1001 {
                    return if self.config.autoreconnect {
                        ClosePolicy::Reconnect { quiet: true }
                    } else {
                        ClosePolicy::Stop(None)
                    };
                }

                self.reconnect_or_stop()
            }
            GatewayError::InvalidSession { resumable } => {
                if !resumable {
                    self.hard_reset();
                }
                self.reconnect_or_stop()
            }
            GatewayError::HeartbeatUnacknowledged => self.reconnect_or_stop(),
            _ => self.reconnect_or_stop(),
        }
    }

    fn reconnect_or_stop(&self) -> ClosePolicy {
        if self.config.autoreconnect {
            ClosePolicy::Reconnect { quiet: false }
        } else {
            ClosePolicy::Stop(None)
        }
    }

    async fn connect_and_run(&self, events: &Sender<ShardEvent>) -> Result<(), GatewayError> {
        let url = self.build_gateway_url()?;

        info!(shard_id = self.id, "connecting to gateway");
        *self.state.write() = ShardState::Connecting;

        let (ws, _response) = timeout(self.config.connection_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| GatewayError::ConnectionTimeout)??;
        let (mut sink, mut stream) = ws.split();

        *self.state.write() = ShardState::Handshaking;
        let mut frame_codec = FrameCodec::new(self.config.encoding, self.config.compress);

        let hello = self.wait_for_hello(&mut stream, &mut frame_codec).await?;
        self.heartbeat
            .set_interval(Duration::from_millis(hello.heartbeat_interval));
        debug!(
            shard_id = self.id,
            interval_ms = hello.heartbeat_interval,
            trace = ?hello.trace,
            "received hello"
        );

        let resuming = {
            let session = self.session_id.read().clone();
            match session {
                Some(session_id) => {
                    *self.state.write() = ShardState::Resuming;
                    info!(shard_id = self.id, "resuming session");
                    self.send_resume(&session_id)?;
                    true
                }
                None => {
                    *self.state.write() = ShardState::Identifying;
                    info!(shard_id = self.id, "identifying");
                    self.send_identify()?;
                    false
                }
            }
        };

        self.heartbeat.reset();
        if !resuming {
            // One immediate heartbeat follows IDENTIFY; during a resume,
            // heartbeats hold until RESUMED.
            self.queue_heartbeat()?;
        }

        let mut next_heartbeat = Instant::now() + self.heartbeat.interval();
        let mut identify_at: Option<Instant> = None;

        loop {
            let gate_deadline = self.gate.lock().deadline;

            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(message)) => {
                            let action = self
                                .handle_message(message, events, &mut sink, &mut frame_codec)
                                .await?;
                            match action {
                                Some(LoopAction::Reconnect) => {
                                    return Err(GatewayError::Closed {
                                        code: 0,
                                        reason: "server requested reconnect".to_string(),
                                    });
                                }
                                Some(LoopAction::ScheduleIdentify(delay)) => {
                                    identify_at = Some(Instant::now() + delay);
                                }
                                None => {}
                            }
                        }
                        Some(Err(e)) => return Err(GatewayError::WebSocket(e)),
                        None => {
                            return Err(GatewayError::Closed {
                                code: 0,
                                reason: "stream ended".to_string(),
                            });
                        }
                    }
                }

                _ = sleep_until(next_heartbeat) => {
                    if *self.state.read() != ShardState::Resuming {
                        if !self.heartbeat.is_acked() {
                            error!(
                                shard_id = self.id,
                                "heartbeat not acknowledged, closing zombie connection"
                            );
                            let _ = sink.close().await;
                            return Err(GatewayError::HeartbeatUnacknowledged);
                        }
                        self.queue_heartbeat()?;
                    }
                    next_heartbeat = Instant::now() + self.heartbeat.interval();
                }

                _ = maybe_deadline(gate_deadline) => {
                    debug!(shard_id = self.id, "guild streaming window elapsed");
                    self.close_gate(events)?;
                }

                _ = maybe_deadline(identify_at) => {
                    identify_at = None;
                    *self.state.write() = ShardState::Identifying;
                    self.send_identify()?;
                    self.heartbeat.reset();
                    self.queue_heartbeat()?;
                }

                command = self.command_rx.recv_async() => {
                    match command {
                        Ok(ShardCommand::Frame(frame)) => {
                            sink.send(ws_message(frame)).await?;
                        }
                        Ok(ShardCommand::FlushMembers) => {
                            if let Some(batch) = self.members.take_batch() {
                                self.flush_member_batch(batch);
                            }
                            self.check_ready(events)?;
                        }
                        Ok(ShardCommand::Shutdown) | Err(_) => {
                            let _ = sink.close().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn build_gateway_url(&self) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.config.gateway_url)?;
        url.query_pairs_mut()
            .append_pair("v", &GATEWAY_VERSION.to_string())
            .append_pair("encoding", self.config.encoding.as_str());
        if self.config.compress {
            url.query_pairs_mut().append_pair("compress", "zlib-stream");
        }
        Ok(url)
    }

    async fn wait_for_hello(
        &self,
        stream: &mut WsRead,
        frame_codec: &mut FrameCodec,
    ) -> Result<HelloPayload, GatewayError> {
        let wait = async {
            loop {
                let message = stream
                    .next()
                    .await
                    .ok_or_else(|| GatewayError::Closed {
                        code: 0,
                        reason: "connection closed before hello".to_string(),
                    })??;

                let envelope = match message {
                    WsMessage::Text(text) => frame_codec.decode_text(&text)?,
                    WsMessage::Binary(data) => frame_codec.decode_binary(&data)?,
                    WsMessage::Close(frame) => return Err(close_error(frame)),
                    _ => None,
                };

                if let Some(envelope) = envelope {
                    if envelope.op == OpCode::Hello {
                        if let Some(data) = envelope.d {
                            return serde_json::from_value(data).map_err(GatewayError::from);
                        }
                    }
                    trace!(shard_id = self.id, op = ?envelope.op, "frame before hello");
                }
            }
        };

        timeout(self.config.connection_timeout, wait)
            .await
            .map_err(|_| GatewayError::ConnectionTimeout)?
    }

    async fn handle_message(
        &self,
        message: WsMessage,
        events: &Sender<ShardEvent>,
        sink: &mut WsSink,
        frame_codec: &mut FrameCodec,
    ) -> Result<Option<LoopAction>, GatewayError> {
        let decoded = match message {
            WsMessage::Text(text) => frame_codec.decode_text(&text),
            WsMessage::Binary(data) => frame_codec.decode_binary(&data),
            WsMessage::Close(frame) => return Err(close_error(frame)),
            WsMessage::Ping(data) => {
                sink.send(WsMessage::Pong(data)).await?;
                return Ok(None);
            }
            WsMessage::Pong(_) | WsMessage::Frame(_) => return Ok(None),
        };

        let envelope = match decoded {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(None),
            // A corrupt decompression stream cannot recover; a single
            // undecodable frame can be dropped.
            Err(err @ GatewayError::Compression(_)) => return Err(err),
            Err(err) => {
                debug!(shard_id = self.id, error = %err, "dropping undecodable frame");
                let _ = events.send(ShardEvent::Error(err));
                return Ok(None);
            }
        };

        self.handle_envelope(envelope, events).await
    }

    async fn handle_envelope(
        &self,
        envelope: WireEnvelope,
        events: &Sender<ShardEvent>,
    ) -> Result<Option<LoopAction>, GatewayError> {
        if let Some(seq) = envelope.s {
            self.observe_sequence(seq);
        }

        match envelope.op {
            OpCode::Dispatch => {
                let Some(name) = envelope.t else {
                    return Ok(None);
                };
                if self.config.disabled_events.contains(&name) {
                    trace!(shard_id = self.id, event = %name, "event disabled");
                    return Ok(None);
                }

                let data = envelope.d.unwrap_or(serde_json::Value::Null);
                let event = match parse_event(&name, data) {
                    Ok(event) => event,
                    Err(err) => {
                        debug!(
                            shard_id = self.id,
                            event = %name,
                            error = %err,
                            "failed to decode dispatch"
                        );
                        let _ = events.send(ShardEvent::Error(err));
                        return Ok(None);
                    }
                };

                self.pre_dispatch(&event, events)?;
                events.send_async(ShardEvent::Dispatch(event)).await?;
                Ok(None)
            }

            OpCode::Heartbeat => {
                debug!(shard_id = self.id, "server requested heartbeat");
                self.queue_heartbeat()?;
                Ok(None)
            }

            OpCode::Reconnect => {
                info!(shard_id = self.id, "server requested reconnect");
                Ok(Some(LoopAction::Reconnect))
            }

            OpCode::InvalidSession => {
                let resumable = envelope
                    .d
                    .as_ref()
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                warn!(shard_id = self.id, resumable, "session invalidated");

                if resumable {
                    if let Some(session_id) = self.session_id.read().clone() {
                        *self.state.write() = ShardState::Resuming;
                        self.send_resume(&session_id)?;
                        return Ok(None);
                    }
                }

                self.hard_reset();
                let delay = Duration::from_millis(rand::rng().random_range(1_000..=5_000));
                Ok(Some(LoopAction::ScheduleIdentify(delay)))
            }

            OpCode::HeartbeatAck => {
                self.heartbeat.mark_acked();
                trace!(shard_id = self.id, latency = ?self.heartbeat.latency(), "heartbeat ack");
                Ok(None)
            }

            other => {
                trace!(shard_id = self.id, op = ?other, "ignoring opcode");
                Ok(None)
            }
        }
    }

    /// Internal bookkeeping ahead of listener fan-out.
    fn pre_dispatch(
        &self,
        event: &Event,
        events: &Sender<ShardEvent>,
    ) -> Result<(), GatewayError> {
        match event {
            Event::Ready(ready) => self.handle_ready(ready, events)?,

            Event::Resumed => {
                *self.state.write() = ShardState::Ready;
                self.connect_attempts.store(0, Ordering::SeqCst);
                self.resume_attempts.store(0, Ordering::SeqCst);
                self.backoff_ms.store(BACKOFF_BASE_MS, Ordering::SeqCst);
                info!(shard_id = self.id, "session resumed");
                let _ = events.send(ShardEvent::Resumed);
            }

            Event::GuildCreate(guild) => {
                let completed = {
                    let mut gate = self.gate.lock();
                    gate.known_guilds.insert(guild.id);
                    if gate.deadline.is_some() && !guild.unavailable {
                        gate.pending_guilds.remove(&guild.id);
                        if gate.pending_guilds.is_empty() {
                            true
                        } else {
                            // Each arrival restarts the quiet period.
                            gate.deadline =
                                Some(Instant::now() + self.config.guild_create_timeout);
                            false
                        }
                    } else {
                        false
                    }
                };
                if completed {
                    self.close_gate(events)?;
                }
            }

            Event::GuildDelete(unavailable) => {
                let completed = {
                    let mut gate = self.gate.lock();
                    gate.known_guilds.remove(&unavailable.id);
                    gate.pending_guilds.remove(&unavailable.id);
                    gate.deadline.is_some() && gate.pending_guilds.is_empty()
                };
                if completed {
                    self.close_gate(events)?;
                }
            }

            Event::GuildMembersChunk(chunk) => {
                // The server leans on chunks as an implicit alive signal.
                self.heartbeat.mark_alive();
                let outcome = self.members.handle_chunk(chunk);
                if !outcome.matched {
                    debug!(
                        shard_id = self.id,
                        guild_id = %chunk.guild_id,
                        "unsolicited member chunk"
                    );
                }
                if outcome.completed {
                    self.check_ready(events)?;
                }
            }

            Event::GuildSync(sync) => {
                {
                    let mut gate = self.gate.lock();
                    gate.unsynced = gate.unsynced.saturating_sub(1);
                    trace!(shard_id = self.id, guild_id = %sync.id, remaining = gate.unsynced, "guild synced");
                }
                self.check_ready(events)?;
            }

            _ => {}
        }

        Ok(())
    }

    fn handle_ready(
        &self,
        ready: &ReadyEventData,
        events: &Sender<ShardEvent>,
    ) -> Result<(), GatewayError> {
        *self.session_id.write() = Some(ready.session_id.clone());
        self.connect_attempts.store(0, Ordering::SeqCst);
        self.resume_attempts.store(0, Ordering::SeqCst);
        self.backoff_ms.store(BACKOFF_BASE_MS, Ordering::SeqCst);

        info!(
            shard_id = self.id,
            guilds = ready.guilds.len(),
            "shard identified"
        );

        let gate_open = {
            let mut gate = self.gate.lock();
            *gate = ReadyGate::new();
            for guild in &ready.guilds {
                gate.known_guilds.insert(guild.id);
                if guild.unavailable {
                    gate.pending_guilds.insert(guild.id);
                }
            }
            if gate.pending_guilds.is_empty() {
                false
            } else {
                gate.deadline = Some(Instant::now() + self.config.guild_create_timeout);
                true
            }
        };

        let _ = events.send(ShardEvent::PreReady);

        if !gate_open {
            self.close_gate(events)?;
        }
        Ok(())
    }

    /// The guild stream settled: drain guild syncs and the member
    /// harvest, then announce readiness once both are empty.
    fn close_gate(&self, events: &Sender<ShardEvent>) -> Result<(), GatewayError> {
        let (sync_ids, harvest_ids) = {
            let mut gate = self.gate.lock();
            if gate.draining {
                return Ok(());
            }
            gate.deadline = None;
            gate.draining = true;

            let known: Vec<Snowflake> = gate.known_guilds.iter().copied().collect();
            let sync_ids = if self.config.token.is_bot() {
                Vec::new()
            } else {
                known.clone()
            };
            let harvest_ids = if self.config.get_all_users {
                known
            } else {
                Vec::new()
            };
            gate.unsynced = sync_ids.len();
            (sync_ids, harvest_ids)
        };

        if !sync_ids.is_empty() {
            self.send_guild_sync_batches(&sync_ids)?;
        }
        if !harvest_ids.is_empty() {
            self.request_all_members(&harvest_ids, events)?;
        }

        self.check_ready(events)
    }

    fn check_ready(&self, events: &Sender<ShardEvent>) -> Result<(), GatewayError> {
        let announce = {
            let mut gate = self.gate.lock();
            if gate.draining
                && !gate.announced
                && gate.unsynced == 0
                && self.members.is_empty()
            {
                gate.announced = true;
                true
            } else {
                false
            }
        };

        if announce {
            *self.state.write() = ShardState::Ready;
            info!(shard_id = self.id, "shard ready");
            let _ = events.send(ShardEvent::Ready);
        }
        Ok(())
    }

    fn send_guild_sync_batches(&self, ids: &[Snowflake]) -> Result<(), GatewayError> {
        let mut batch: Vec<Snowflake> = Vec::new();
        let mut bytes = 32usize;

        for id in ids {
            let cost = crate::members::id_cost(*id);
            if bytes + cost > crate::members::PAYLOAD_CEILING && !batch.is_empty() {
                self.send(OpCode::SyncGuild, &batch, false)?;
                batch.clear();
                bytes = 32;
            }
            batch.push(*id);
            bytes += cost;
        }
        if !batch.is_empty() {
            self.send(OpCode::SyncGuild, &batch, false)?;
        }
        Ok(())
    }

    /// Queue member requests for every known guild. With intents active
    /// the `GUILD_MEMBERS` bit is required and guilds are requested one
    /// per payload; without intents, requests batch up to the payload
    /// ceiling.
    fn request_all_members(
        &self,
        ids: &[Snowflake],
        events: &Sender<ShardEvent>,
    ) -> Result<(), GatewayError> {
        if let Some(intents) = self.config.intents {
            if !intents.contains(Intents::GUILD_MEMBERS) {
                warn!(
                    shard_id = self.id,
                    "get_all_users requires the GUILD_MEMBERS intent"
                );
                let _ = events.send(ShardEvent::Error(GatewayError::Configuration(
                    "get_all_users requires the GUILD_MEMBERS intent".to_string(),
                )));
                return Ok(());
            }

            for id in ids {
                if let Some(batch) = self.members.enqueue(*id, None) {
                    self.flush_member_batch(batch);
                }
                if let Some(batch) = self.members.take_batch() {
                    self.flush_member_batch(batch);
                }
            }
            return Ok(());
        }

        for id in ids {
            if let Some(batch) = self.members.enqueue(*id, None) {
                self.flush_member_batch(batch);
            }
        }
        if let Some(batch) = self.members.take_batch() {
            self.flush_member_batch(batch);
        }
        Ok(())
    }

    fn flush_member_batch(&self, batch: PendingBatch) {
        let nonce = self.members.next_nonce(self.id);
        let selector = if batch.guild_ids.len() == 1 {
            GuildSelector::One(batch.guild_ids[0])
        } else {
            GuildSelector::Many(batch.guild_ids.clone())
        };
        let payload = RequestGuildMembersPayload {
            guild_id: selector,
            query: String::new(),
            limit: 0,
            presences: None,
            nonce: nonce.clone(),
        };

        self.members.register(nonce.clone(), batch);

        if let Err(err) = self.send(OpCode::RequestGuildMembers, &payload, false) {
            warn!(shard_id = self.id, error = %err, "failed to send member request");
            self.members.expire(&nonce);
            return;
        }

        let requests = self.members.clone();
        let flush_signal = self.command_tx.clone();
        let deadline = self.config.request_timeout;
        tokio::spawn(async move {
            sleep(deadline).await;
            requests.expire(&nonce);
            // Re-evaluate the readiness gate after an expiry.
            let _ = flush_signal.send(ShardCommand::FlushMembers);
        });
    }

    fn observe_sequence(&self, seq: u64) {
        let previous = self.sequence.load(Ordering::SeqCst);
        if previous != 0 && seq > previous + 1 {
            warn!(
                shard_id = self.id,
                expected = previous + 1,
                received = seq,
                "non-consecutive sequence number"
            );
        }
        if seq > previous {
            self.sequence.store(seq, Ordering::SeqCst);
        }
    }

    fn send_identify(&self) -> Result<(), GatewayError> {
        let presence = self.presence.read().clone();
        let intents = self.config.intents;
        let identify = IdentifyPayload {
            token: Cow::Borrowed(self.config.token.expose()),
            properties: Default::default(),
            compress: self.config.compress,
            large_threshold: self.config.large_threshold,
            shard: [self.id, self.total],
            intents,
            guild_subscriptions: if intents.is_none() {
                Some(self.config.guild_subscriptions)
            } else {
                None
            },
            presence: Some(presence),
        };

        // The token never reaches the log; `Token`'s debug form is a
        // sentinel and frames are not dumped.
        trace!(shard_id = self.id, token = ?self.config.token, "sending identify");
        self.send(OpCode::Identify, &identify, false)
    }

    fn send_resume(&self, session_id: &str) -> Result<(), GatewayError> {
        let resume = ResumePayload {
            token: Cow::Borrowed(self.config.token.expose()),
            session_id: Cow::Borrowed(session_id),
            seq: self.sequence.load(Ordering::SeqCst),
        };
        trace!(shard_id = self.id, "sending resume");
        self.send(OpCode::Resume, &resume, false)
    }

    fn queue_heartbeat(&self) -> Result<(), GatewayError> {
        let seq = self.sequence.load(Ordering::SeqCst);
        let frame = codec::encode(self.config.encoding, &heartbeat((seq > 0).then_some(seq)))?;
        let tx = self.command_tx.clone();
        self.global_bucket.queue(
            Box::new(move || {
                let _ = tx.send(ShardCommand::Frame(frame));
            }),
            true,
        );
        self.heartbeat.mark_sent();
        trace!(shard_id = self.id, seq, "heartbeat queued");
        Ok(())
    }

    /// Encode `data` under `op` and enqueue it on the global send bucket.
    fn send<T: serde::Serialize>(
        &self,
        op: OpCode,
        data: &T,
        priority: bool,
    ) -> Result<(), GatewayError> {
        let frame = codec::encode(self.config.encoding, &GatewayPayload::new(op, data))?;
        let tx = self.command_tx.clone();
        self.global_bucket.queue(
            Box::new(move || {
                let _ = tx.send(ShardCommand::Frame(frame));
            }),
            priority,
        );
        Ok(())
    }
}

enum ClosePolicy {
    /// Stop the shard; `Some` carries a fatal error to return.
    Stop(Option<GatewayError>),
    /// Reconnect; `quiet` suppresses the error event (clean closes).
    Reconnect { quiet: bool },
}

fn close_code_of(err: &GatewayError) -> Option<u16> {
    match err {
        GatewayError::Closed { code, .. } => Some(*code),
        _ => None,
    }
}

fn close_error(frame: Option<CloseFrame<'_>>) -> GatewayError {
    let (code, reason) = frame
        .map(|f| (u16::from(f.code), f.reason.to_string()))
        .unwrap_or((0, String::new()));
    GatewayError::Closed { code, reason }
}

fn ws_message(frame: WireFrame) -> WsMessage {
    match frame {
        WireFrame::Text(text) => WsMessage::Text(text),
        WireFrame::Binary(data) => WsMessage::Binary(data),
    }
}

async fn maybe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flume::unbounded;
    use serde_json::json;

    fn test_shard() -> Shard {
        Shard::new(0, 1, ShardConfig::new(Token::bot("test-token")))
    }

    async fn dispatch(shard: &Shard, envelope: serde_json::Value) -> Vec<ShardEvent> {
        let (tx, rx) = unbounded();
        let envelope: WireEnvelope = serde_json::from_value(envelope).unwrap();
        shard.handle_envelope(envelope, &tx).await.unwrap();
        rx.drain().collect()
    }

    #[tokio::test]
    async fn sequence_is_monotonic_and_gap_tolerant() {
        let shard = test_shard();
        dispatch(&shard, json!({"op": 0, "s": 1, "t": "RESUMED", "d": null})).await;
        assert_eq!(shard.sequence(), 1);

        // A gap warns but is accepted.
        dispatch(&shard, json!({"op": 0, "s": 5, "t": "RESUMED", "d": null})).await;
        assert_eq!(shard.sequence(), 5);

        // A stale sequence never regresses the counter.
        dispatch(&shard, json!({"op": 0, "s": 3, "t": "RESUMED", "d": null})).await;
        assert_eq!(shard.sequence(), 5);
    }

    #[tokio::test]
    async fn ready_stores_session_and_emits_pre_ready() {
        let shard = test_shard();
        let events = dispatch(
            &shard,
            json!({
                "op": 0,
                "s": 1,
                "t": "READY",
                "d": {
                    "v": 6,
                    "user": {"id": "1", "username": "bot"},
                    "guilds": [],
                    "session_id": "abc",
                }
            }),
        ).await;

        assert_eq!(shard.session_id().as_deref(), Some("abc"));
        assert!(events
            .iter()
            .any(|e| matches!(e, ShardEvent::PreReady)));
        // No unavailable guilds and nothing to drain: ready is immediate.
        assert!(events.iter().any(|e| matches!(e, ShardEvent::Ready)));
        assert_eq!(shard.state(), ShardState::Ready);
    }

    #[tokio::test]
    async fn ready_gate_waits_for_unavailable_guilds() {
        let shard = test_shard();
        let events = dispatch(
            &shard,
            json!({
                "op": 0,
                "s": 1,
                "t": "READY",
                "d": {
                    "v": 6,
                    "user": {"id": "1", "username": "bot"},
                    "guilds": [
                        {"id": "10", "unavailable": true},
                        {"id": "11", "unavailable": true},
                        {"id": "12", "unavailable": true},
                    ],
                    "session_id": "abc",
                }
            }),
        ).await;
        assert!(events.iter().any(|e| matches!(e, ShardEvent::PreReady)));
        assert!(!events.iter().any(|e| matches!(e, ShardEvent::Ready)));

        let events = dispatch(
            &shard,
            json!({"op": 0, "s": 2, "t": "GUILD_CREATE", "d": {"id": "10"}}),
        ).await;
        assert!(!events.iter().any(|e| matches!(e, ShardEvent::Ready)));

        dispatch(
            &shard,
            json!({"op": 0, "s": 3, "t": "GUILD_CREATE", "d": {"id": "11"}}),
        ).await;
        let events = dispatch(
            &shard,
            json!({"op": 0, "s": 4, "t": "GUILD_CREATE", "d": {"id": "12"}}),
        ).await;
        assert!(events.iter().any(|e| matches!(e, ShardEvent::Ready)));
    }

    #[tokio::test]
    async fn invalid_session_clears_state_and_schedules_identify() {
        let shard = test_shard();
        dispatch(
            &shard,
            json!({
                "op": 0,
                "s": 42,
                "t": "READY",
                "d": {
                    "v": 6,
                    "user": {"id": "1", "username": "bot"},
                    "guilds": [],
                    "session_id": "abc",
                }
            }),
        ).await;
        assert_eq!(shard.sequence(), 42);

        let (tx, _rx) = unbounded();
        let envelope: WireEnvelope =
            serde_json::from_value(json!({"op": 9, "d": false})).unwrap();
        let action = shard.handle_envelope(envelope, &tx).await.unwrap();

        assert!(matches!(action, Some(LoopAction::ScheduleIdentify(_))));
        assert!(shard.session_id().is_none());
        assert_eq!(shard.sequence(), 0);

        if let Some(LoopAction::ScheduleIdentify(delay)) = action {
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(5));
        }
    }

    #[tokio::test]
    async fn chunks_refresh_the_heartbeat_ack() {
        let shard = test_shard();
        shard.heartbeat.mark_sent();
        assert!(!shard.heartbeat.is_acked());

        dispatch(
            &shard,
            json!({
                "op": 0,
                "s": 2,
                "t": "GUILD_MEMBERS_CHUNK",
                "d": {"guild_id": "1", "members": [], "chunk_index": 0, "chunk_count": 1}
            }),
        ).await;
        assert!(shard.heartbeat.is_acked());
    }

    #[test]
    fn close_policy_on_4004_is_fatal_and_clears_session() {
        let shard = test_shard();
        *shard.session_id.write() = Some("abc".to_string());

        let (tx, _rx) = unbounded();
        let policy = shard.apply_close_policy(
            &GatewayError::Closed {
                code: 4004,
                reason: "authentication failed".to_string(),
            },
            &tx,
        );

        assert!(shard.session_id().is_none());
        match policy {
            ClosePolicy::Stop(Some(GatewayError::AuthenticationFailed(_))) => {}
            _ => panic!("4004 must stop with an authentication error"),
        }
    }

    #[test]
    fn close_policy_on_4007_resets_sequence() {
        let shard = test_shard();
        shard.sequence.store(10, Ordering::SeqCst);
        *shard.session_id.write() = Some("abc".to_string());

        let (tx, _rx) = unbounded();
        let policy = shard.apply_close_policy(
            &GatewayError::Closed {
                code: 4007,
                reason: String::new(),
            },
            &tx,
        );

        assert_eq!(shard.sequence(), 0);
        assert!(shard.session_id().is_some());
        assert!(matches!(policy, ClosePolicy::Reconnect { .. }));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let shard = test_shard();
        let first = shard.next_backoff();
        assert_eq!(first, Duration::from_millis(BACKOFF_BASE_MS));

        let mut last = first;
        for _ in 0..64 {
            let next = shard.next_backoff();
            assert!(next >= last, "backoff never shrinks");
            assert!(next <= Duration::from_millis(BACKOFF_CAP_MS));
            last = next;
        }
        assert_eq!(last, Duration::from_millis(BACKOFF_CAP_MS));
    }

    #[tokio::test]
    async fn disabled_events_are_dropped_before_demux() {
        let mut config = ShardConfig::new(Token::bot("t"));
        config.disabled_events.insert("TYPING_START".to_string());
        let shard = Shard::new(0, 1, config);

        let events = dispatch(
            &shard,
            json!({
                "op": 0,
                "s": 1,
                "t": "TYPING_START",
                "d": {"channel_id": "1", "user_id": "2"}
            }),
        ).await;
        assert!(events.is_empty());
    }
}
