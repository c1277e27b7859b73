//! Gateway error types.
//!
//! [`GatewayError`] covers every failure a shard can surface;
//! [`CloseCode`] encodes the reconnect decision table for server-initiated
//! closes.

use thiserror::Error;

/// Errors that can occur during gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// WebSocket connection or protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Failed to decode an inbound frame (JSON or ETF). The frame is
    /// dropped; the connection survives.
    #[error("decode error: {0}")]
    Decode(String),

    /// The shared decompression stream is corrupt. Unlike a plain decode
    /// failure this poisons every following frame, so the connection is
    /// dropped.
    #[error("decompression error: {0}")]
    Compression(String),

    /// Session was invalidated by the gateway.
    #[error("session invalidated, resumable: {resumable}")]
    InvalidSession {
        /// Whether the session can be resumed.
        resumable: bool,
    },

    /// Connection was closed.
    #[error("connection closed: code={code}, reason={reason}")]
    Closed {
        /// WebSocket close code, 0 when the stream simply ended.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// A heartbeat was due while the previous one was still unacknowledged.
    #[error("server didn't acknowledge previous heartbeat")]
    HeartbeatUnacknowledged,

    /// Token rejected or privileged intents disallowed. Not retried.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid shard count, too many guilds, or invalid intents. Not
    /// retried.
    #[error("invalid gateway configuration: {0}")]
    Configuration(String),

    /// The connection or handshake did not complete in time.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// The shard gave up reconnecting.
    #[error("reconnect attempts exhausted after {attempts}")]
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Failed to send through an internal channel.
    #[error("channel send error: {0}")]
    ChannelSend(String),

    /// URL construction failed.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires a connected shard.
    #[error("shard not connected")]
    NotConnected,
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

impl From<cobalt_model::json::JsonError> for GatewayError {
    fn from(err: cobalt_model::json::JsonError) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

impl<T> From<flume::SendError<T>> for GatewayError {
    fn from(err: flume::SendError<T>) -> Self {
        GatewayError::ChannelSend(err.to_string())
    }
}

/// Gateway close codes and the reconnect policy attached to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error.
    UnknownError = 4000,
    /// Invalid opcode sent by the client.
    UnknownOpcode = 4001,
    /// Payload failed to decode server-side.
    DecodeError = 4002,
    /// Payload sent before identifying.
    NotAuthenticated = 4003,
    /// Token rejected.
    AuthenticationFailed = 4004,
    /// Identify sent on an authenticated session.
    AlreadyAuthenticated = 4005,
    /// Session is no longer valid.
    InvalidSession = 4006,
    /// Invalid sequence number on resume.
    InvalidSequence = 4007,
    /// Payloads sent too quickly.
    RateLimited = 4008,
    /// Session timed out.
    SessionTimedOut = 4009,
    /// Invalid shard id or count.
    InvalidShard = 4010,
    /// Too many guilds for a single shard.
    ShardingRequired = 4011,
    /// Invalid gateway version.
    InvalidApiVersion = 4012,
    /// Invalid intent bits.
    InvalidIntents = 4013,
    /// Privileged intent not enabled for this application.
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Map a raw close code, if it is one the protocol defines.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            4000 => Self::UnknownError,
            4001 => Self::UnknownOpcode,
            4002 => Self::DecodeError,
            4003 => Self::NotAuthenticated,
            4004 => Self::AuthenticationFailed,
            4005 => Self::AlreadyAuthenticated,
            4006 => Self::InvalidSession,
            4007 => Self::InvalidSequence,
            4008 => Self::RateLimited,
            4009 => Self::SessionTimedOut,
            4010 => Self::InvalidShard,
            4011 => Self::ShardingRequired,
            4012 => Self::InvalidApiVersion,
            4013 => Self::InvalidIntents,
            4014 => Self::DisallowedIntents,
            _ => return None,
        })
    }

    /// Whether an automatic reconnect is allowed after this code.
    pub const fn should_reconnect(self) -> bool {
        !matches!(
            self,
            Self::AuthenticationFailed
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidApiVersion
                | Self::InvalidIntents
                | Self::DisallowedIntents
        )
    }

    /// Whether the held session id must be discarded.
    pub const fn invalidates_session(self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::AuthenticationFailed
                | Self::InvalidSession
                | Self::SessionTimedOut
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidIntents
                | Self::DisallowedIntents
        )
    }

    /// Whether the sequence counter resets to zero.
    pub const fn resets_sequence(self) -> bool {
        matches!(self, Self::InvalidSequence)
    }

    /// Whether this close is an authentication failure to surface as such.
    pub const fn is_authentication_failure(self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::DisallowedIntents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_is_fatal() {
        let code = CloseCode::from_code(4004).unwrap();
        assert!(!code.should_reconnect());
        assert!(code.invalidates_session());
        assert!(code.is_authentication_failure());
    }

    #[test]
    fn invalid_session_reconnects_fresh() {
        for raw in [4003, 4006, 4009] {
            let code = CloseCode::from_code(raw).unwrap();
            assert!(code.should_reconnect(), "{raw} should reconnect");
            assert!(code.invalidates_session(), "{raw} should clear session");
        }
    }

    #[test]
    fn invalid_sequence_resets_counter() {
        let code = CloseCode::from_code(4007).unwrap();
        assert!(code.resets_sequence());
        assert!(code.should_reconnect());
        assert!(!code.invalidates_session());
    }

    #[test]
    fn configuration_codes_do_not_reconnect() {
        for raw in [4010, 4011, 4013, 4014] {
            let code = CloseCode::from_code(raw).unwrap();
            assert!(!code.should_reconnect(), "{raw} must not reconnect");
            assert!(code.invalidates_session());
        }
    }

    #[test]
    fn transient_codes_keep_session() {
        for raw in [4000, 4001, 4002, 4005, 4008] {
            let code = CloseCode::from_code(raw).unwrap();
            assert!(code.should_reconnect());
            assert!(!code.invalidates_session(), "{raw} keeps the session");
        }
    }

    #[test]
    fn unknown_code_maps_to_none() {
        assert!(CloseCode::from_code(1000).is_none());
        assert!(CloseCode::from_code(4999).is_none());
    }

    #[test]
    fn zombie_error_names_the_missing_ack() {
        let message = GatewayError::HeartbeatUnacknowledged.to_string();
        assert!(message.contains("acknowledge"));
    }
}
