//! cobalt-voice — voice session rendezvous.
#![deny(unsafe_code)]
//!
//! The [`VoiceManager`] matches gateway VOICE_SERVER_UPDATE events against
//! pending join requests and maintains one [`VoiceSession`] per guild.
//! The media transport itself (UDP, codecs, encryption) is outside this
//! crate; sessions expose the negotiated parameters and a
//! ready/disconnect/error lifecycle.

mod error;
mod manager;
mod session;

pub use error::VoiceError;
pub use manager::VoiceManager;
pub use session::{SessionEvent, VoiceConnectionParams, VoiceOptions, VoiceSession};
