//! Event handler trait and per-event context.
//!
//! Update-family callbacks receive the previous cached entity alongside
//! the new one; `None` means the entity was not cached when the event
//! arrived. Handlers run inline on the dispatch task, preserving the
//! per-shard wire order of events.

use async_trait::async_trait;
use cobalt_cache::InMemoryCache;
use cobalt_gateway::error::GatewayError;
use cobalt_gateway::Shard;
use cobalt_http::HttpClient;
use cobalt_model::guild::{
    GuildBanEvent, GuildEmojisUpdateEvent, GuildIntegrationsUpdateEvent, GuildMemberAddEvent,
    GuildMemberRemoveEvent, GuildMemberUpdateEvent, GuildMembersChunkEvent, GuildRoleDeleteEvent,
    GuildSyncEvent, ReadyEventData,
};
use cobalt_model::*;
use cobalt_voice::VoiceManager;
use std::sync::Arc;

/// Per-event context: the subsystems a handler needs to act on an event.
#[derive(Clone)]
pub struct Context {
    pub http: Arc<HttpClient>,
    pub cache: Arc<InMemoryCache>,
    pub voice: Arc<VoiceManager>,
    pub shard: Arc<Shard>,
}

impl Context {
    /// The shard this event arrived on.
    pub fn shard_id(&self) -> u16 {
        self.shard.id()
    }
}

/// Receiver for everything the gateway surfaces.
///
/// Every method has a no-op default; implement the ones you care about.
#[allow(unused_variables)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    // Session lifecycle
    async fn ready(&self, ctx: Context, ready: ReadyEventData) {}
    async fn resumed(&self, ctx: Context) {}
    /// The shard finished its readiness gate.
    async fn shard_ready(&self, ctx: Context) {}
    async fn shard_disconnected(&self, shard_id: u16, code: Option<u16>, reconnecting: bool) {}
    async fn shard_error(&self, shard_id: u16, error: GatewayError) {}

    // Guild lifecycle
    async fn guild_create(&self, ctx: Context, guild: Guild) {}
    async fn guild_available(&self, ctx: Context, guild: Guild) {}
    async fn guild_update(&self, ctx: Context, guild: Guild, old: Option<Guild>) {}
    async fn guild_delete(&self, ctx: Context, guild: UnavailableGuild, old: Option<Guild>) {}
    async fn guild_unavailable(&self, ctx: Context, guild: UnavailableGuild) {}
    async fn guild_sync(&self, ctx: Context, sync: GuildSyncEvent) {}
    async fn guild_ban_add(&self, ctx: Context, ban: GuildBanEvent) {}
    async fn guild_ban_remove(&self, ctx: Context, ban: GuildBanEvent) {}
    async fn guild_emojis_update(
        &self,
        ctx: Context,
        update: GuildEmojisUpdateEvent,
        old: Option<Vec<Emoji>>,
    ) {
    }
    async fn guild_integrations_update(&self, ctx: Context, update: GuildIntegrationsUpdateEvent) {
    }

    // Membership
    async fn guild_member_add(&self, ctx: Context, added: GuildMemberAddEvent) {}
    async fn guild_member_update(
        &self,
        ctx: Context,
        update: GuildMemberUpdateEvent,
        old: Option<Member>,
    ) {
    }
    async fn guild_member_remove(
        &self,
        ctx: Context,
        removed: GuildMemberRemoveEvent,
        old: Option<Member>,
    ) {
    }
    async fn guild_members_chunk(&self, ctx: Context, chunk: GuildMembersChunkEvent) {}

    // Roles
    async fn guild_role_create(&self, ctx: Context, guild_id: Snowflake, role: Role) {}
    async fn guild_role_update(
        &self,
        ctx: Context,
        guild_id: Snowflake,
        role: Role,
        old: Option<Role>,
    ) {
    }
    async fn guild_role_delete(
        &self,
        ctx: Context,
        delete: GuildRoleDeleteEvent,
        old: Option<Role>,
    ) {
    }

    // Channels
    async fn channel_create(&self, ctx: Context, channel: Channel) {}
    async fn channel_update(&self, ctx: Context, channel: Channel, old: Option<Channel>) {}
    async fn channel_delete(&self, ctx: Context, channel: Channel) {}
    async fn channel_pins_update(&self, ctx: Context, update: ChannelPinsUpdateEvent) {}
    async fn channel_recipient_add(&self, ctx: Context, event: ChannelRecipientEvent) {}
    async fn channel_recipient_remove(&self, ctx: Context, event: ChannelRecipientEvent) {}

    // Messages
    async fn message_create(&self, ctx: Context, message: Message) {}
    async fn message_update(
        &self,
        ctx: Context,
        update: MessageUpdateEvent,
        old: Option<Message>,
    ) {
    }
    async fn message_delete(&self, ctx: Context, delete: MessageDeleteEvent, old: Option<Message>) {
    }
    async fn message_delete_bulk(&self, ctx: Context, delete: MessageDeleteBulkEvent) {}

    // Reactions
    async fn reaction_add(&self, ctx: Context, reaction: ReactionAddEvent) {}
    async fn reaction_remove(&self, ctx: Context, reaction: ReactionRemoveEvent) {}
    async fn reaction_remove_all(&self, ctx: Context, removal: ReactionRemoveAllEvent) {}
    async fn reaction_remove_emoji(&self, ctx: Context, removal: ReactionRemoveEmojiEvent) {}

    // Users and presence
    async fn presence_update(&self, ctx: Context, presence: Presence, old: Option<Presence>) {}
    async fn presences_replace(&self, ctx: Context, presences: Vec<Presence>) {}
    async fn typing_start(&self, ctx: Context, typing: TypingStartEvent) {}
    async fn user_update(&self, ctx: Context, user: User, old: Option<User>) {}
    async fn user_note_update(&self, ctx: Context, note: UserNoteUpdateEvent) {}
    async fn user_settings_update(&self, ctx: Context, settings: UserSettings) {}
    async fn user_guild_settings_update(&self, ctx: Context, settings: UserGuildSettings) {}
    async fn relationship_add(&self, ctx: Context, relationship: Relationship) {}
    async fn relationship_remove(&self, ctx: Context, removal: RelationshipRemoveEvent) {}
    async fn friend_suggestion_create(&self, ctx: Context, suggestion: FriendSuggestion) {}
    async fn friend_suggestion_delete(&self, ctx: Context, delete: FriendSuggestionDeleteEvent) {}

    // Voice
    async fn voice_state_update(&self, ctx: Context, state: VoiceState, old: Option<VoiceState>) {
    }
    async fn voice_server_update(&self, ctx: Context, update: VoiceServerUpdateEvent) {}

    // Invites
    async fn invite_create(&self, ctx: Context, invite: InviteCreateEvent) {}
    async fn invite_delete(&self, ctx: Context, invite: InviteDeleteEvent) {}

    // Misc
    async fn webhooks_update(&self, ctx: Context, update: WebhooksUpdateEvent) {}
    /// An event this library does not model. Never dropped silently.
    async fn unknown(&self, ctx: Context, name: String, data: serde_json::Value) {}
}
