//! Voice error types.

use thiserror::Error;

/// Errors surfaced by voice joins and sessions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoiceError {
    /// No matching VOICE_SERVER_UPDATE arrived in time.
    #[error("voice connection timeout")]
    ConnectionTimeout,

    /// The session or its owning shard disconnected.
    #[error("voice connection disconnected")]
    Disconnected,

    /// The session reported an error.
    #[error("voice session error: {0}")]
    Session(String),

    /// No live session exists for the guild.
    #[error("not connected to voice in this guild")]
    NotConnected,
}
