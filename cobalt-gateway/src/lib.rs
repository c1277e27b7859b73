//! cobalt-gateway — Helselia gateway client.
#![deny(unsafe_code)]
//!
//! One [`Shard`] drives one gateway WebSocket session: handshake with
//! identify/resume, heartbeats with zombie detection, a per-connection
//! payload codec (JSON or binary terms, optionally zlib-stream
//! compressed), token-bucket send limiting with a reserved priority lane,
//! member-request batching and a readiness gate. The [`ShardManager`]
//! collects shards behind a serialized connect queue that honors the
//! platform's session-start limit.

mod bucket;
mod codec;
mod compression;
pub mod error;
pub mod etf;
pub mod event;
mod heartbeat;
mod members;
mod opcode;
mod payload;
mod queue;
mod shard;
mod shard_manager;

pub use bucket::{Bucket, SharedTask, Task};
pub use codec::{Encoding, FrameCodec, WireFrame};
pub use compression::ZlibInflater;
pub use error::{CloseCode, GatewayError};
pub use event::Event;
pub use heartbeat::Heartbeats;
pub use opcode::OpCode;
pub use payload::{
    ConnectionProperties, GatewayPayload, HelloPayload, IdentifyPayload, ResumePayload,
    WireEnvelope,
};
pub use queue::SessionStartLimiter;
pub use shard::{Shard, ShardConfig, ShardEvent, ShardState};
pub use shard_manager::{ShardManager, ShardManagerConfig};

/// Gateway protocol version spoken by this library.
pub const GATEWAY_VERSION: u8 = 6;

/// Default gateway URL, normally replaced by the gateway probe's answer.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.helselia.dev";
