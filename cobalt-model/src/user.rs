//! Users, user-account settings and relationships.

use crate::Snowflake;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// A platform user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,

    pub username: String,

    #[serde(default)]
    pub discriminator: Option<String>,

    #[serde(default)]
    pub avatar: Option<String>,

    #[serde(default)]
    pub bot: bool,

    #[serde(default)]
    pub system: bool,

    #[serde(default)]
    pub verified: Option<bool>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub flags: Option<u64>,
}

/// User-account client settings (absent for bot sessions).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub theme: Option<String>,

    #[serde(default)]
    pub status: Option<crate::presence::Status>,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default)]
    pub show_current_game: Option<bool>,

    #[serde(default)]
    pub message_display_compact: Option<bool>,

    #[serde(default)]
    pub guild_positions: Vec<Snowflake>,

    #[serde(default)]
    pub restricted_guilds: Vec<Snowflake>,
}

/// Per-guild notification settings for a user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGuildSettings {
    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    #[serde(default)]
    pub muted: bool,

    #[serde(default)]
    pub suppress_everyone: bool,

    #[serde(default)]
    pub mobile_push: bool,

    #[serde(default)]
    pub message_notifications: Option<u8>,

    #[serde(default)]
    pub channel_overrides: Vec<ChannelOverride>,
}

/// Channel-level notification override inside [`UserGuildSettings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub channel_id: Snowflake,

    #[serde(default)]
    pub muted: bool,

    #[serde(default)]
    pub message_notifications: Option<u8>,
}

/// Relationship kind between the session user and another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RelationshipType {
    None = 0,
    Friend = 1,
    Blocked = 2,
    IncomingRequest = 3,
    OutgoingRequest = 4,
}

/// A relationship entry (user accounts only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Snowflake,

    #[serde(rename = "type")]
    pub kind: RelationshipType,

    #[serde(default)]
    pub user: Option<User>,
}

/// RELATIONSHIP_REMOVE payload: only the id and kind survive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRemoveEvent {
    pub id: Snowflake,

    #[serde(rename = "type")]
    pub kind: RelationshipType,
}

/// A suggested friend (user accounts only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendSuggestion {
    pub suggested_user: User,

    #[serde(default)]
    pub reasons: Vec<FriendSuggestionReason>,
}

/// Why a friend suggestion was made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendSuggestionReason {
    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type", default)]
    pub kind: Option<u8>,
}

/// FRIEND_SUGGESTION_DELETE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendSuggestionDeleteEvent {
    pub suggested_user_id: Snowflake,
}

/// USER_NOTE_UPDATE payload: the note the session user keeps on `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNoteUpdateEvent {
    pub id: Snowflake,

    #[serde(default)]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_user() {
        let user: User = serde_json::from_str(r#"{"id":"1","username":"halcy"}"#).unwrap();
        assert_eq!(user.username, "halcy");
        assert!(!user.bot);
    }

    #[test]
    fn relationship_kind() {
        let rel: Relationship =
            serde_json::from_str(r#"{"id":"2","type":1,"user":{"id":"2","username":"x"}}"#)
                .unwrap();
        assert_eq!(rel.kind, RelationshipType::Friend);
    }
}
