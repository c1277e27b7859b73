//! Gateway event demultiplexing.
//!
//! DISPATCH frames are decoded by event name into the typed [`Event`]
//! enum. Unrecognized names surface as [`Event::Unknown`] rather than
//! being dropped.

use crate::error::GatewayError;
use cobalt_model::guild::{GuildMembersChunkEvent, GuildSyncEvent, ReadyEventData};
use cobalt_model::*;

/// A decoded dispatch event.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Event {
    // Session lifecycle
    /// Received after a successful IDENTIFY.
    Ready(Box<ReadyEventData>),

    /// Received after a successful RESUME.
    Resumed,

    // Guild lifecycle
    GuildCreate(Box<Guild>),
    GuildUpdate(Box<Guild>),
    GuildDelete(UnavailableGuild),
    /// Member/presence sync for a guild (user-account sessions).
    GuildSync(Box<GuildSyncEvent>),
    GuildBanAdd(Box<GuildBanEvent>),
    GuildBanRemove(Box<GuildBanEvent>),
    GuildEmojisUpdate(Box<GuildEmojisUpdateEvent>),
    GuildIntegrationsUpdate(GuildIntegrationsUpdateEvent),

    // Membership
    GuildMemberAdd(Box<GuildMemberAddEvent>),
    GuildMemberUpdate(Box<GuildMemberUpdateEvent>),
    GuildMemberRemove(Box<GuildMemberRemoveEvent>),
    /// Response to REQUEST_GUILD_MEMBERS.
    GuildMembersChunk(Box<GuildMembersChunkEvent>),

    // Roles
    GuildRoleCreate(Box<GuildRoleEvent>),
    GuildRoleUpdate(Box<GuildRoleEvent>),
    GuildRoleDelete(GuildRoleDeleteEvent),

    // Channels
    ChannelCreate(Box<Channel>),
    ChannelUpdate(Box<Channel>),
    ChannelDelete(Box<Channel>),
    ChannelPinsUpdate(ChannelPinsUpdateEvent),
    ChannelRecipientAdd(Box<ChannelRecipientEvent>),
    ChannelRecipientRemove(Box<ChannelRecipientEvent>),

    // Messages
    MessageCreate(Box<Message>),
    MessageUpdate(Box<MessageUpdateEvent>),
    MessageDelete(MessageDeleteEvent),
    MessageDeleteBulk(MessageDeleteBulkEvent),

    // Reactions
    ReactionAdd(Box<ReactionAddEvent>),
    ReactionRemove(Box<ReactionRemoveEvent>),
    ReactionRemoveAll(ReactionRemoveAllEvent),
    ReactionRemoveEmoji(ReactionRemoveEmojiEvent),

    // Users and presence
    PresenceUpdate(Box<Presence>),
    /// Wholesale presence replacement (user-account sessions).
    PresencesReplace(Vec<Presence>),
    TypingStart(Box<TypingStartEvent>),
    UserUpdate(Box<User>),
    UserNoteUpdate(UserNoteUpdateEvent),
    UserSettingsUpdate(Box<UserSettings>),
    UserGuildSettingsUpdate(Box<UserGuildSettings>),
    RelationshipAdd(Box<Relationship>),
    RelationshipRemove(RelationshipRemoveEvent),
    FriendSuggestionCreate(Box<FriendSuggestion>),
    FriendSuggestionDelete(FriendSuggestionDeleteEvent),

    // Voice
    VoiceStateUpdate(Box<VoiceState>),
    VoiceServerUpdate(VoiceServerUpdateEvent),

    // Invites
    InviteCreate(Box<InviteCreateEvent>),
    InviteDelete(InviteDeleteEvent),

    // Misc
    WebhooksUpdate(WebhooksUpdateEvent),

    /// An event this library does not model; emitted, never dropped.
    Unknown {
        name: String,
        data: serde_json::Value,
    },
}

fn decode<T: serde::de::DeserializeOwned>(data: serde_json::Value) -> Result<T, GatewayError> {
    serde_json::from_value(data).map_err(GatewayError::from)
}

/// Decode a dispatch payload by event name.
pub fn parse_event(name: &str, data: serde_json::Value) -> Result<Event, GatewayError> {
    Ok(match name {
        "READY" => Event::Ready(Box::new(decode(data)?)),
        "RESUMED" => Event::Resumed,

        "GUILD_CREATE" => Event::GuildCreate(Box::new(decode(data)?)),
        "GUILD_UPDATE" => Event::GuildUpdate(Box::new(decode(data)?)),
        "GUILD_DELETE" => Event::GuildDelete(decode(data)?),
        "GUILD_SYNC" => Event::GuildSync(Box::new(decode(data)?)),
        "GUILD_BAN_ADD" => Event::GuildBanAdd(Box::new(decode(data)?)),
        "GUILD_BAN_REMOVE" => Event::GuildBanRemove(Box::new(decode(data)?)),
        "GUILD_EMOJIS_UPDATE" => Event::GuildEmojisUpdate(Box::new(decode(data)?)),
        "GUILD_INTEGRATIONS_UPDATE" => Event::GuildIntegrationsUpdate(decode(data)?),

        "GUILD_MEMBER_ADD" => Event::GuildMemberAdd(Box::new(decode(data)?)),
        "GUILD_MEMBER_UPDATE" => Event::GuildMemberUpdate(Box::new(decode(data)?)),
        "GUILD_MEMBER_REMOVE" => Event::GuildMemberRemove(Box::new(decode(data)?)),
        "GUILD_MEMBERS_CHUNK" => Event::GuildMembersChunk(Box::new(decode(data)?)),

        "GUILD_ROLE_CREATE" => Event::GuildRoleCreate(Box::new(decode(data)?)),
        "GUILD_ROLE_UPDATE" => Event::GuildRoleUpdate(Box::new(decode(data)?)),
        "GUILD_ROLE_DELETE" => Event::GuildRoleDelete(decode(data)?),

        "CHANNEL_CREATE" => Event::ChannelCreate(Box::new(decode(data)?)),
        "CHANNEL_UPDATE" => Event::ChannelUpdate(Box::new(decode(data)?)),
        "CHANNEL_DELETE" => Event::ChannelDelete(Box::new(decode(data)?)),
        "CHANNEL_PINS_UPDATE" => Event::ChannelPinsUpdate(decode(data)?),
        "CHANNEL_RECIPIENT_ADD" => Event::ChannelRecipientAdd(Box::new(decode(data)?)),
        "CHANNEL_RECIPIENT_REMOVE" => Event::ChannelRecipientRemove(Box::new(decode(data)?)),

        "MESSAGE_CREATE" => Event::MessageCreate(Box::new(decode(data)?)),
        "MESSAGE_UPDATE" => Event::MessageUpdate(Box::new(decode(data)?)),
        "MESSAGE_DELETE" => Event::MessageDelete(decode(data)?),
        "MESSAGE_DELETE_BULK" => Event::MessageDeleteBulk(decode(data)?),

        "MESSAGE_REACTION_ADD" => Event::ReactionAdd(Box::new(decode(data)?)),
        "MESSAGE_REACTION_REMOVE" => Event::ReactionRemove(Box::new(decode(data)?)),
        "MESSAGE_REACTION_REMOVE_ALL" => Event::ReactionRemoveAll(decode(data)?),
        "MESSAGE_REACTION_REMOVE_EMOJI" => Event::ReactionRemoveEmoji(decode(data)?),

        "PRESENCE_UPDATE" => Event::PresenceUpdate(Box::new(decode(data)?)),
        "PRESENCES_REPLACE" => Event::PresencesReplace(decode(data)?),
        "TYPING_START" => Event::TypingStart(Box::new(decode(data)?)),
        "USER_UPDATE" => Event::UserUpdate(Box::new(decode(data)?)),
        "USER_NOTE_UPDATE" => Event::UserNoteUpdate(decode(data)?),
        "USER_SETTINGS_UPDATE" => Event::UserSettingsUpdate(Box::new(decode(data)?)),
        "USER_GUILD_SETTINGS_UPDATE" => Event::UserGuildSettingsUpdate(Box::new(decode(data)?)),
        "RELATIONSHIP_ADD" => Event::RelationshipAdd(Box::new(decode(data)?)),
        "RELATIONSHIP_REMOVE" => Event::RelationshipRemove(decode(data)?),
        "FRIEND_SUGGESTION_CREATE" => Event::FriendSuggestionCreate(Box::new(decode(data)?)),
        "FRIEND_SUGGESTION_DELETE" => Event::FriendSuggestionDelete(decode(data)?),

        "VOICE_STATE_UPDATE" => Event::VoiceStateUpdate(Box::new(decode(data)?)),
        "VOICE_SERVER_UPDATE" => Event::VoiceServerUpdate(decode(data)?),

        "INVITE_CREATE" => Event::InviteCreate(Box::new(decode(data)?)),
        "INVITE_DELETE" => Event::InviteDelete(decode(data)?),

        "WEBHOOKS_UPDATE" => Event::WebhooksUpdate(decode(data)?),

        _ => Event::Unknown {
            name: name.to_owned(),
            data,
        },
    })
}

impl Event {
    /// The wire name of this event, for logging and filters.
    pub fn name(&self) -> &str {
        match self {
            Event::Ready(_) => "READY",
            Event::Resumed => "RESUMED",
            Event::GuildCreate(_) => "GUILD_CREATE",
            Event::GuildUpdate(_) => "GUILD_UPDATE",
            Event::GuildDelete(_) => "GUILD_DELETE",
            Event::GuildSync(_) => "GUILD_SYNC",
            Event::GuildBanAdd(_) => "GUILD_BAN_ADD",
            Event::GuildBanRemove(_) => "GUILD_BAN_REMOVE",
            Event::GuildEmojisUpdate(_) => "GUILD_EMOJIS_UPDATE",
            Event::GuildIntegrationsUpdate(_) => "GUILD_INTEGRATIONS_UPDATE",
            Event::GuildMemberAdd(_) => "GUILD_MEMBER_ADD",
            Event::GuildMemberUpdate(_) => "GUILD_MEMBER_UPDATE",
            Event::GuildMemberRemove(_) => "GUILD_MEMBER_REMOVE",
            Event::GuildMembersChunk(_) => "GUILD_MEMBERS_CHUNK",
            Event::GuildRoleCreate(_) => "GUILD_ROLE_CREATE",
            Event::GuildRoleUpdate(_) => "GUILD_ROLE_UPDATE",
            Event::GuildRoleDelete(_) => "GUILD_ROLE_DELETE",
            Event::ChannelCreate(_) => "CHANNEL_CREATE",
            Event::ChannelUpdate(_) => "CHANNEL_UPDATE",
            Event::ChannelDelete(_) => "CHANNEL_DELETE",
            Event::ChannelPinsUpdate(_) => "CHANNEL_PINS_UPDATE",
            Event::ChannelRecipientAdd(_) => "CHANNEL_RECIPIENT_ADD",
            Event::ChannelRecipientRemove(_) => "CHANNEL_RECIPIENT_REMOVE",
            Event::MessageCreate(_) => "MESSAGE_CREATE",
            Event::MessageUpdate(_) => "MESSAGE_UPDATE",
            Event::MessageDelete(_) => "MESSAGE_DELETE",
            Event::MessageDeleteBulk(_) => "MESSAGE_DELETE_BULK",
            Event::ReactionAdd(_) => "MESSAGE_REACTION_ADD",
            Event::ReactionRemove(_) => "MESSAGE_REACTION_REMOVE",
            Event::ReactionRemoveAll(_) => "MESSAGE_REACTION_REMOVE_ALL",
            Event::ReactionRemoveEmoji(_) => "MESSAGE_REACTION_REMOVE_EMOJI",
            Event::PresenceUpdate(_) => "PRESENCE_UPDATE",
            Event::PresencesReplace(_) => "PRESENCES_REPLACE",
            Event::TypingStart(_) => "TYPING_START",
            Event::UserUpdate(_) => "USER_UPDATE",
            Event::UserNoteUpdate(_) => "USER_NOTE_UPDATE",
            Event::UserSettingsUpdate(_) => "USER_SETTINGS_UPDATE",
            Event::UserGuildSettingsUpdate(_) => "USER_GUILD_SETTINGS_UPDATE",
            Event::RelationshipAdd(_) => "RELATIONSHIP_ADD",
            Event::RelationshipRemove(_) => "RELATIONSHIP_REMOVE",
            Event::FriendSuggestionCreate(_) => "FRIEND_SUGGESTION_CREATE",
            Event::FriendSuggestionDelete(_) => "FRIEND_SUGGESTION_DELETE",
            Event::VoiceStateUpdate(_) => "VOICE_STATE_UPDATE",
            Event::VoiceServerUpdate(_) => "VOICE_SERVER_UPDATE",
            Event::InviteCreate(_) => "INVITE_CREATE",
            Event::InviteDelete(_) => "INVITE_DELETE",
            Event::WebhooksUpdate(_) => "WEBHOOKS_UPDATE",
            Event::Unknown { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ready() {
        let data = json!({
            "v": 6,
            "user": {"id": "1", "username": "bot"},
            "guilds": [{"id": "10", "unavailable": true}],
            "session_id": "abc",
        });

        match parse_event("READY", data).unwrap() {
            Event::Ready(ready) => {
                assert_eq!(ready.session_id, "abc");
                assert_eq!(ready.guilds.len(), 1);
            }
            other => panic!("expected Ready, got {}", other.name()),
        }
    }

    #[test]
    fn parses_voice_server_update() {
        let data = json!({"token": "t", "guild_id": "5", "endpoint": "voice.example"});
        match parse_event("VOICE_SERVER_UPDATE", data).unwrap() {
            Event::VoiceServerUpdate(update) => {
                assert_eq!(update.guild_id.get(), 5);
                assert_eq!(update.endpoint.as_deref(), Some("voice.example"));
            }
            other => panic!("expected VoiceServerUpdate, got {}", other.name()),
        }
    }

    #[test]
    fn unknown_events_are_kept() {
        let data = json!({"anything": true});
        match parse_event("SOME_FUTURE_EVENT", data).unwrap() {
            Event::Unknown { name, data } => {
                assert_eq!(name, "SOME_FUTURE_EVENT");
                assert_eq!(data["anything"], true);
            }
            other => panic!("expected Unknown, got {}", other.name()),
        }
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let data = json!({"not": "a message"});
        assert!(parse_event("MESSAGE_CREATE", data).is_err());
    }
}
