//! Unified error type for the client façade.

use thiserror::Error;

/// Errors surfaced by the [`crate::Client`].
#[derive(Debug, Error)]
pub enum CobaltError {
    /// Gateway (WebSocket, sharding) failure.
    #[error("gateway error: {0}")]
    Gateway(#[from] cobalt_gateway::GatewayError),

    /// REST pipeline failure.
    #[error("HTTP error: {0}")]
    Http(#[from] cobalt_http::HttpError),

    /// Voice join or session failure.
    #[error("voice error: {0}")]
    Voice(#[from] cobalt_voice::VoiceError),

    /// The client has not connected yet.
    #[error("client is not connected")]
    NotConnected,
}
