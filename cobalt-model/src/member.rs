//! Guild members, roles and emoji.

use crate::{Permissions, Snowflake, User};
use serde::{Deserialize, Serialize};

/// A member of a guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    /// Absent inside some GUILD_MEMBER_UPDATE payloads where only the id
    /// travels alongside.
    #[serde(default)]
    pub user: Option<User>,

    #[serde(default)]
    pub nick: Option<String>,

    #[serde(default)]
    pub roles: Vec<Snowflake>,

    #[serde(default)]
    pub joined_at: Option<String>,

    #[serde(default)]
    pub premium_since: Option<String>,

    #[serde(default)]
    pub deaf: bool,

    #[serde(default)]
    pub mute: bool,

    /// Status merged from chunk presences; not part of the wire member.
    #[serde(skip)]
    pub status: Option<crate::presence::Status>,
}

impl Member {
    /// The member's user id, when the user object is present.
    pub fn user_id(&self) -> Option<Snowflake> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// A guild role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Snowflake,

    pub name: String,

    #[serde(default)]
    pub color: u32,

    #[serde(default)]
    pub hoist: bool,

    #[serde(default)]
    pub position: i64,

    #[serde(default)]
    pub permissions: Permissions,

    #[serde(default)]
    pub managed: bool,

    #[serde(default)]
    pub mentionable: bool,
}

/// A guild emoji.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emoji {
    #[serde(default)]
    pub id: Option<Snowflake>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub roles: Vec<Snowflake>,

    #[serde(default)]
    pub require_colons: bool,

    #[serde(default)]
    pub managed: bool,

    #[serde(default)]
    pub animated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_without_user() {
        let member: Member = serde_json::from_str(r#"{"roles":[],"deaf":false,"mute":false}"#)
            .unwrap();
        assert!(member.user.is_none());
        assert!(member.user_id().is_none());
    }

    #[test]
    fn role_defaults() {
        let role: Role = serde_json::from_str(r#"{"id":"9","name":"mods"}"#).unwrap();
        assert_eq!(role.position, 0);
        assert!(role.permissions.is_empty());
    }
}
