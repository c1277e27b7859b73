//! Guilds and guild-scoped event payloads.

use crate::presence::Presence;
use crate::voice::VoiceState;
use crate::{Channel, Emoji, Member, Role, Snowflake, User, UserSettings};
use serde::{Deserialize, Serialize};

/// A guild as delivered by GUILD_CREATE / GUILD_UPDATE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub splash: Option<String>,

    #[serde(default)]
    pub owner_id: Option<Snowflake>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub afk_channel_id: Option<Snowflake>,

    #[serde(default)]
    pub afk_timeout: Option<u64>,

    #[serde(default)]
    pub verification_level: Option<u8>,

    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub emojis: Vec<Emoji>,

    #[serde(default)]
    pub features: Vec<String>,

    /// Whether the guild is unavailable due to an outage. GUILD_CREATE
    /// carries `unavailable: false` once the guild streams in.
    #[serde(default)]
    pub unavailable: bool,

    #[serde(default)]
    pub large: bool,

    #[serde(default)]
    pub member_count: Option<u64>,

    #[serde(default)]
    pub joined_at: Option<String>,

    #[serde(default)]
    pub members: Vec<Member>,

    #[serde(default)]
    pub channels: Vec<Channel>,

    #[serde(default)]
    pub presences: Vec<Presence>,

    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

/// A guild reference from READY or GUILD_DELETE: id plus availability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,

    #[serde(default)]
    pub unavailable: bool,
}

/// READY dispatch payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyEventData {
    /// Gateway protocol version.
    pub v: u8,

    pub user: User,

    /// Guilds for this shard; initially unavailable and streamed in via
    /// GUILD_CREATE.
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,

    pub session_id: String,

    #[serde(default)]
    pub private_channels: Vec<Channel>,

    /// User-account extras; absent on bot sessions.
    #[serde(default)]
    pub relationships: Vec<crate::user::Relationship>,

    #[serde(default)]
    pub presences: Vec<Presence>,

    #[serde(default)]
    pub user_settings: Option<UserSettings>,

    #[serde(default)]
    pub notes: Option<std::collections::HashMap<Snowflake, String>>,

    #[serde(default)]
    pub shard: Option<[u16; 2]>,

    #[serde(rename = "_trace", default)]
    pub trace: Option<Vec<String>>,
}

/// GUILD_SYNC dispatch payload (user-account sessions).
#[derive(Debug, Clone, Deserialize)]
pub struct GuildSyncEvent {
    pub id: Snowflake,

    #[serde(default)]
    pub members: Vec<Member>,

    #[serde(default)]
    pub presences: Vec<Presence>,

    #[serde(default)]
    pub large: bool,
}

/// GUILD_BAN_ADD / GUILD_BAN_REMOVE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildBanEvent {
    pub guild_id: Snowflake,
    pub user: User,
}

/// GUILD_EMOJIS_UPDATE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildEmojisUpdateEvent {
    pub guild_id: Snowflake,

    #[serde(default)]
    pub emojis: Vec<Emoji>,
}

/// GUILD_INTEGRATIONS_UPDATE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildIntegrationsUpdateEvent {
    pub guild_id: Snowflake,
}

/// GUILD_MEMBER_ADD payload: a member plus its guild.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberAddEvent {
    pub guild_id: Snowflake,

    #[serde(flatten)]
    pub member: Member,
}

/// GUILD_MEMBER_REMOVE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberRemoveEvent {
    pub guild_id: Snowflake,
    pub user: User,
}

/// GUILD_MEMBER_UPDATE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberUpdateEvent {
    pub guild_id: Snowflake,

    pub user: User,

    #[serde(default)]
    pub roles: Vec<Snowflake>,

    #[serde(default)]
    pub nick: Option<String>,

    #[serde(default)]
    pub premium_since: Option<String>,
}

/// GUILD_MEMBERS_CHUNK payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMembersChunkEvent {
    pub guild_id: Snowflake,

    #[serde(default)]
    pub members: Vec<Member>,

    /// Zero-based index of this chunk.
    #[serde(default)]
    pub chunk_index: u64,

    /// Total number of chunks for the request.
    #[serde(default = "one")]
    pub chunk_count: u64,

    #[serde(default)]
    pub not_found: Vec<Snowflake>,

    #[serde(default)]
    pub presences: Vec<Presence>,

    #[serde(default)]
    pub nonce: Option<String>,
}

fn one() -> u64 {
    1
}

/// GUILD_ROLE_CREATE / GUILD_ROLE_UPDATE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildRoleEvent {
    pub guild_id: Snowflake,
    pub role: Role,
}

/// GUILD_ROLE_DELETE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildRoleDeleteEvent {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_guild_from_ready() {
        let guild: UnavailableGuild =
            serde_json::from_str(r#"{"id":"10","unavailable":true}"#).unwrap();
        assert!(guild.unavailable);
    }

    #[test]
    fn chunk_defaults_to_single() {
        let chunk: GuildMembersChunkEvent =
            serde_json::from_str(r#"{"guild_id":"1","members":[]}"#).unwrap();
        assert_eq!(chunk.chunk_index, 0);
        assert_eq!(chunk.chunk_count, 1);
    }

    #[test]
    fn member_add_flattens() {
        let add: GuildMemberAddEvent = serde_json::from_str(
            r#"{"guild_id":"1","user":{"id":"2","username":"n"},"roles":[],"deaf":false,"mute":false}"#,
        )
        .unwrap();
        assert_eq!(add.guild_id.get(), 1);
        assert_eq!(add.member.user_id().unwrap().get(), 2);
    }
}
