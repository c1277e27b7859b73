//! Invite event payloads.

use crate::{Snowflake, User};
use serde::{Deserialize, Serialize};

/// INVITE_CREATE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCreateEvent {
    pub channel_id: Snowflake,

    pub code: String,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,

    #[serde(default)]
    pub inviter: Option<User>,

    #[serde(default)]
    pub max_age: Option<u64>,

    #[serde(default)]
    pub max_uses: Option<u64>,

    #[serde(default)]
    pub temporary: bool,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub uses: Option<u64>,
}

/// INVITE_DELETE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteDeleteEvent {
    pub channel_id: Snowflake,

    pub code: String,

    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_event_minimal() {
        let invite: InviteCreateEvent =
            serde_json::from_str(r#"{"channel_id":"1","code":"abcdef"}"#).unwrap();
        assert_eq!(invite.code, "abcdef");
        assert!(!invite.temporary);
    }
}
