//! Presence, status and activity types.

use crate::Snowflake;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// User status as sent to and received from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

/// Activity type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ActivityType {
    Playing = 0,
    Streaming = 1,
    Listening = 2,
    Watching = 3,
    Custom = 4,
}

/// An activity attached to a presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ActivityType,

    /// Stream URL, only meaningful for [`ActivityType::Streaming`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The client's own presence, replicated to every shard and sent with
/// IDENTIFY and STATUS_UPDATE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPresence {
    /// Unix milliseconds the client went idle, if any.
    #[serde(default)]
    pub since: Option<u64>,

    #[serde(default)]
    pub game: Option<Activity>,

    pub status: Status,

    #[serde(default)]
    pub afk: bool,
}

impl Default for ClientPresence {
    fn default() -> Self {
        Self {
            since: None,
            game: None,
            status: Status::Online,
            afk: false,
        }
    }
}

/// A user's presence as observed in a guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub user: PresenceUser,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    pub status: Status,

    #[serde(default)]
    pub game: Option<Activity>,

    #[serde(default)]
    pub activities: Vec<Activity>,
}

/// The partial user carried on presence payloads; only `id` is guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUser {
    pub id: Snowflake,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub discriminator: Option<String>,

    #[serde(default)]
    pub avatar: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_presence_user() {
        let presence: Presence = serde_json::from_str(
            r#"{"user":{"id":"42"},"status":"idle","game":null}"#,
        )
        .unwrap();
        assert_eq!(presence.user.id.get(), 42);
        assert_eq!(presence.status, Status::Idle);
        assert!(presence.game.is_none());
    }

    #[test]
    fn client_presence_defaults() {
        let presence = ClientPresence::default();
        assert_eq!(presence.status, Status::Online);
        assert!(!presence.afk);
    }
}
