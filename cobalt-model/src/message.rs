//! Messages and message-scoped event payloads.

use crate::{Member, Snowflake, User};
use serde::{Deserialize, Serialize};

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,

    pub channel_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    pub author: User,

    #[serde(default)]
    pub member: Option<Member>,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub edited_timestamp: Option<String>,

    #[serde(default)]
    pub tts: bool,

    #[serde(default)]
    pub mention_everyone: bool,

    #[serde(default)]
    pub mentions: Vec<User>,

    #[serde(default)]
    pub mention_roles: Vec<Snowflake>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub embeds: Vec<Embed>,

    #[serde(default)]
    pub pinned: bool,

    #[serde(rename = "type", default)]
    pub kind: u8,

    #[serde(default)]
    pub nonce: Option<serde_json::Value>,
}

/// A file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Snowflake,

    pub filename: String,

    #[serde(default)]
    pub size: u64,

    pub url: String,

    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default)]
    pub height: Option<u64>,

    #[serde(default)]
    pub width: Option<u64>,
}

/// A message embed. Only the fields the dispatcher touches are modeled;
/// the rest round-trips as provided.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub color: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

/// MESSAGE_UPDATE payload. Everything except the ids may be absent, so the
/// update is applied as a partial diff against the cached message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdateEvent {
    pub id: Snowflake,

    pub channel_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    #[serde(default)]
    pub author: Option<User>,

    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub edited_timestamp: Option<String>,

    #[serde(default)]
    pub embeds: Option<Vec<Embed>>,

    #[serde(default)]
    pub pinned: Option<bool>,

    #[serde(default)]
    pub mentions: Option<Vec<User>>,
}

/// MESSAGE_DELETE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleteEvent {
    pub id: Snowflake,

    pub channel_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

/// MESSAGE_DELETE_BULK payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleteBulkEvent {
    pub ids: Vec<Snowflake>,

    pub channel_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

/// TYPING_START payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStartEvent {
    pub channel_id: Snowflake,

    pub user_id: Snowflake,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    #[serde(default)]
    pub timestamp: Option<u64>,

    #[serde(default)]
    pub member: Option<Member>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_event() {
        let update: MessageUpdateEvent =
            serde_json::from_str(r#"{"id":"1","channel_id":"2","content":"edited"}"#).unwrap();
        assert_eq!(update.content.as_deref(), Some("edited"));
        assert!(update.author.is_none());
        assert!(update.pinned.is_none());
    }

    #[test]
    fn bulk_delete_ids() {
        let bulk: MessageDeleteBulkEvent =
            serde_json::from_str(r#"{"ids":["1","2","3"],"channel_id":"9"}"#).unwrap();
        assert_eq!(bulk.ids.len(), 3);
    }
}
