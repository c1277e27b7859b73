//! Voice state and voice server payloads.

use crate::{Member, Snowflake};
use serde::{Deserialize, Serialize};

/// A user's voice state, delivered inside GUILD_CREATE and on
/// VOICE_STATE_UPDATE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    /// `None` when the user left voice.
    pub channel_id: Option<Snowflake>,

    pub user_id: Snowflake,

    #[serde(default)]
    pub member: Option<Member>,

    pub session_id: String,

    #[serde(default)]
    pub deaf: bool,

    #[serde(default)]
    pub mute: bool,

    #[serde(default)]
    pub self_deaf: bool,

    #[serde(default)]
    pub self_mute: bool,

    #[serde(default)]
    pub self_stream: bool,

    #[serde(default)]
    pub suppress: bool,
}

/// VOICE_SERVER_UPDATE payload: the credentials to negotiate a voice
/// session for a guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceServerUpdateEvent {
    pub token: String,

    pub guild_id: Snowflake,

    /// `None` while the voice server is being reallocated; a follow-up
    /// update carries the replacement.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_has_null_channel() {
        let state: VoiceState = serde_json::from_str(
            r#"{"guild_id":"1","channel_id":null,"user_id":"2","session_id":"s"}"#,
        )
        .unwrap();
        assert!(state.channel_id.is_none());
    }

    #[test]
    fn server_update_without_endpoint() {
        let update: VoiceServerUpdateEvent =
            serde_json::from_str(r#"{"token":"t","guild_id":"1","endpoint":null}"#).unwrap();
        assert!(update.endpoint.is_none());
    }
}
