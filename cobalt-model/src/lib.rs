//! cobalt-model — core types for the cobalt Helselia client library.
#![deny(unsafe_code)]
#![allow(clippy::struct_excessive_bools)]
//!
//! Entity and gateway event payload types shared by the gateway, HTTP,
//! voice, cache and client crates, plus the [`Token`] credential wrapper
//! and the [`json`] parsing helpers.
//!
//! Dynamic wire payloads are decoded into these typed structures at the
//! gateway demux layer; nothing downstream inspects raw JSON maps.

pub mod channel;
pub mod guild;
pub mod intents;
pub mod invite;
pub mod json;
pub mod member;
pub mod message;
pub mod permissions;
pub mod presence;
pub mod reaction;
pub mod snowflake;
pub mod token;
pub mod user;
pub mod voice;

pub use channel::{
    Channel, ChannelPinsUpdateEvent, ChannelRecipientEvent, ChannelType, PermissionOverwrite,
    WebhooksUpdateEvent,
};
pub use guild::{
    Guild, GuildBanEvent, GuildEmojisUpdateEvent, GuildIntegrationsUpdateEvent,
    GuildMemberAddEvent, GuildMemberRemoveEvent, GuildMemberUpdateEvent, GuildMembersChunkEvent,
    GuildRoleDeleteEvent, GuildRoleEvent, GuildSyncEvent, ReadyEventData, UnavailableGuild,
};
pub use intents::Intents;
pub use invite::{InviteCreateEvent, InviteDeleteEvent};
pub use member::{Emoji, Member, Role};
pub use message::{
    Attachment, Embed, Message, MessageDeleteBulkEvent, MessageDeleteEvent, MessageUpdateEvent,
    TypingStartEvent,
};
pub use permissions::Permissions;
pub use presence::{Activity, ActivityType, ClientPresence, Presence, PresenceUser, Status};
pub use reaction::{
    ReactionAddEvent, ReactionEmoji, ReactionRemoveAllEvent, ReactionRemoveEmojiEvent,
    ReactionRemoveEvent,
};
pub use snowflake::Snowflake;
pub use token::Token;
pub use user::{
    FriendSuggestion, FriendSuggestionDeleteEvent, Relationship, RelationshipRemoveEvent,
    RelationshipType, User, UserGuildSettings, UserNoteUpdateEvent, UserSettings,
};
pub use voice::{VoiceServerUpdateEvent, VoiceState};
