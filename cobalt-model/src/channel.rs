//! Channels and channel-scoped event payloads.

use crate::{Permissions, Snowflake, User};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Channel type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ChannelType {
    GuildText = 0,
    Direct = 1,
    GuildVoice = 2,
    Group = 3,
    GuildCategory = 4,
    GuildNews = 5,
    GuildStore = 6,
}

/// A channel of any type. Guild-only and DM-only fields are optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,

    #[serde(rename = "type")]
    pub kind: ChannelType,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub topic: Option<String>,

    #[serde(default)]
    pub position: Option<i64>,

    #[serde(default)]
    pub parent_id: Option<Snowflake>,

    #[serde(default)]
    pub nsfw: bool,

    #[serde(default)]
    pub last_message_id: Option<Snowflake>,

    #[serde(default)]
    pub last_pin_timestamp: Option<String>,

    #[serde(default)]
    pub rate_limit_per_user: Option<u64>,

    #[serde(default)]
    pub bitrate: Option<u64>,

    #[serde(default)]
    pub user_limit: Option<u64>,

    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,

    /// DM / group recipients.
    #[serde(default)]
    pub recipients: Vec<User>,

    #[serde(default)]
    pub owner_id: Option<Snowflake>,

    #[serde(default)]
    pub icon: Option<String>,
}

impl Channel {
    /// Whether this channel lives inside a guild.
    pub fn is_guild_channel(&self) -> bool {
        !matches!(self.kind, ChannelType::Direct | ChannelType::Group)
    }
}

/// A role or member permission overwrite on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub id: Snowflake,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub allow: Permissions,

    #[serde(default)]
    pub deny: Permissions,
}

/// CHANNEL_PINS_UPDATE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPinsUpdateEvent {
    pub channel_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    #[serde(default)]
    pub last_pin_timestamp: Option<String>,
}

/// CHANNEL_RECIPIENT_ADD / CHANNEL_RECIPIENT_REMOVE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecipientEvent {
    pub channel_id: Snowflake,
    pub user: User,
}

/// WEBHOOKS_UPDATE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksUpdateEvent {
    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guild_text_channel() {
        let channel: Channel =
            serde_json::from_str(r#"{"id":"5","type":0,"guild_id":"1","name":"general"}"#)
                .unwrap();
        assert!(channel.is_guild_channel());
        assert_eq!(channel.name.as_deref(), Some("general"));
    }

    #[test]
    fn direct_channel() {
        let channel: Channel = serde_json::from_str(
            r#"{"id":"7","type":1,"recipients":[{"id":"2","username":"a"}]}"#,
        )
        .unwrap();
        assert!(!channel.is_guild_channel());
        assert_eq!(channel.recipients.len(), 1);
    }
}
