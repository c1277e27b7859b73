//! Message reaction event payloads.

use crate::{Member, Snowflake};
use serde::{Deserialize, Serialize};

/// The emoji part of a reaction: custom (id + name) or unicode (name only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEmoji {
    #[serde(default)]
    pub id: Option<Snowflake>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub animated: bool,
}

/// MESSAGE_REACTION_ADD payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionAddEvent {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    #[serde(default)]
    pub member: Option<Member>,

    pub emoji: ReactionEmoji,
}

/// MESSAGE_REACTION_REMOVE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRemoveEvent {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    pub emoji: ReactionEmoji,
}

/// MESSAGE_REACTION_REMOVE_ALL payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRemoveAllEvent {
    pub channel_id: Snowflake,
    pub message_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

/// MESSAGE_REACTION_REMOVE_EMOJI payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRemoveEmojiEvent {
    pub channel_id: Snowflake,
    pub message_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    pub emoji: ReactionEmoji,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicode_emoji() {
        let add: ReactionAddEvent = serde_json::from_str(
            r#"{"user_id":"1","channel_id":"2","message_id":"3","emoji":{"id":null,"name":"👍"}}"#,
        )
        .unwrap();
        assert!(add.emoji.id.is_none());
        assert_eq!(add.emoji.name.as_deref(), Some("👍"));
    }
}
