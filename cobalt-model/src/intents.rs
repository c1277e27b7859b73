//! Gateway intents.
//!
//! Intents are a bitfield declaring which event families the gateway
//! delivers to a session. Sessions that omit them fall back to the
//! `guild_subscriptions` behavior.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Event families a session subscribes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        /// Guild create/update/delete, roles, channels.
        const GUILDS = 1 << 0;

        /// Member joins, updates, removes, and member chunk requests.
        /// Privileged.
        const GUILD_MEMBERS = 1 << 1;

        /// Guild bans.
        const GUILD_BANS = 1 << 2;

        /// Emoji updates.
        const GUILD_EMOJIS = 1 << 3;

        /// Integration updates.
        const GUILD_INTEGRATIONS = 1 << 4;

        /// Webhook updates.
        const GUILD_WEBHOOKS = 1 << 5;

        /// Invite create/delete.
        const GUILD_INVITES = 1 << 6;

        /// Voice state updates.
        const GUILD_VOICE_STATES = 1 << 7;

        /// Presence updates. Privileged.
        const GUILD_PRESENCES = 1 << 8;

        /// Messages in guild channels.
        const GUILD_MESSAGES = 1 << 9;

        /// Reactions in guild channels.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;

        /// Typing indicators in guild channels.
        const GUILD_MESSAGE_TYPING = 1 << 11;

        /// Direct messages.
        const DIRECT_MESSAGES = 1 << 12;

        /// Reactions in direct messages.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;

        /// Typing indicators in direct messages.
        const DIRECT_MESSAGE_TYPING = 1 << 14;

        /// All intents that do not require platform approval.
        const NON_PRIVILEGED = Self::GUILDS.bits()
            | Self::GUILD_BANS.bits()
            | Self::GUILD_EMOJIS.bits()
            | Self::GUILD_INTEGRATIONS.bits()
            | Self::GUILD_WEBHOOKS.bits()
            | Self::GUILD_INVITES.bits()
            | Self::GUILD_VOICE_STATES.bits()
            | Self::GUILD_MESSAGES.bits()
            | Self::GUILD_MESSAGE_REACTIONS.bits()
            | Self::GUILD_MESSAGE_TYPING.bits()
            | Self::DIRECT_MESSAGES.bits()
            | Self::DIRECT_MESSAGE_REACTIONS.bits()
            | Self::DIRECT_MESSAGE_TYPING.bits();

        /// Privileged intents requiring approval.
        const PRIVILEGED = Self::GUILD_MEMBERS.bits() | Self::GUILD_PRESENCES.bits();
    }
}

impl Intents {
    /// Resolve a single intent by its wire name, e.g. `"guildMembers"` or
    /// `"GUILD_MEMBERS"`.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Some(match normalized.as_str() {
            "guilds" => Self::GUILDS,
            "guildmembers" => Self::GUILD_MEMBERS,
            "guildbans" => Self::GUILD_BANS,
            "guildemojis" => Self::GUILD_EMOJIS,
            "guildintegrations" => Self::GUILD_INTEGRATIONS,
            "guildwebhooks" => Self::GUILD_WEBHOOKS,
            "guildinvites" => Self::GUILD_INVITES,
            "guildvoicestates" => Self::GUILD_VOICE_STATES,
            "guildpresences" => Self::GUILD_PRESENCES,
            "guildmessages" => Self::GUILD_MESSAGES,
            "guildmessagereactions" => Self::GUILD_MESSAGE_REACTIONS,
            "guildmessagetyping" => Self::GUILD_MESSAGE_TYPING,
            "directmessages" => Self::DIRECT_MESSAGES,
            "directmessagereactions" => Self::DIRECT_MESSAGE_REACTIONS,
            "directmessagetyping" => Self::DIRECT_MESSAGE_TYPING,
            _ => return None,
        })
    }

    /// Whether this set includes any privileged intent.
    pub fn has_privileged(self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::NON_PRIVILEGED
    }
}

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u64::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_number() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
        assert_eq!(serde_json::to_string(&intents).unwrap(), "513");
    }

    #[test]
    fn name_resolution() {
        assert_eq!(
            Intents::from_wire_name("guildMembers"),
            Some(Intents::GUILD_MEMBERS)
        );
        assert_eq!(
            Intents::from_wire_name("GUILD_VOICE_STATES"),
            Some(Intents::GUILD_VOICE_STATES)
        );
        assert_eq!(Intents::from_wire_name("nonsense"), None);
    }

    #[test]
    fn privileged_detection() {
        assert!(!Intents::NON_PRIVILEGED.has_privileged());
        assert!((Intents::GUILDS | Intents::GUILD_PRESENCES).has_privileged());
    }
}
