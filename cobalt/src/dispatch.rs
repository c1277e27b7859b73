//! Cache maintenance and event fan-out.
//!
//! The dispatcher consumes the shard manager's aggregate event stream,
//! applies each event to the cache (capturing the previous entity for
//! update families), wires voice traffic into the voice manager, and then
//! invokes the handler inline so listeners observe events in per-shard
//! wire order. A missing cached parent downgrades to a debug log, never a
//! failure.

use crate::handler::{Context, EventHandler};
use cobalt_cache::{Cache, InMemoryCache};
use cobalt_gateway::{Event, Shard, ShardEvent, ShardManager};
use cobalt_http::HttpClient;
use cobalt_model::{Member, Snowflake, User, VoiceState};
use cobalt_voice::{VoiceManager, VoiceOptions};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct Dispatcher {
    pub http: Arc<HttpClient>,
    pub cache: Arc<InMemoryCache>,
    pub voice: Arc<VoiceManager>,
    pub manager: Arc<ShardManager>,
    pub handler: Arc<dyn EventHandler>,
    pub current_user: Arc<RwLock<Option<User>>>,
    pub seed_voice_connections: bool,
    pub total_shards: u16,
}

impl Dispatcher {
    pub async fn run(self, events: flume::Receiver<(u16, ShardEvent)>) {
        while let Ok((shard_id, event)) = events.recv_async().await {
            self.handle(shard_id, event).await;
        }
        debug!("event stream ended, dispatcher stopping");
    }

    fn context(&self, shard: Arc<Shard>) -> Context {
        Context {
            http: Arc::clone(&self.http),
            cache: Arc::clone(&self.cache),
            voice: Arc::clone(&self.voice),
            shard,
        }
    }

    fn current_user_id(&self) -> Option<Snowflake> {
        self.current_user.read().as_ref().map(|u| u.id)
    }

    async fn handle(&self, shard_id: u16, event: ShardEvent) {
        let Some(shard) = self.manager.shard(shard_id) else {
            debug!(shard_id, "event from untracked shard");
            return;
        };
        let ctx = self.context(shard);

        match event {
            ShardEvent::Dispatch(event) => self.handle_dispatch(ctx, shard_id, event).await,
            ShardEvent::PreReady => {
                debug!(shard_id, "shard handshake complete");
            }
            ShardEvent::Ready => {
                if self.seed_voice_connections {
                    self.seed_voice(shard_id, &ctx);
                }
                self.handler.shard_ready(ctx).await;
            }
            ShardEvent::Resumed => {
                self.handler.resumed(ctx).await;
            }
            ShardEvent::Disconnected { code, reconnecting } => {
                self.voice.reject_pending_for_shard(shard_id);
                self.handler
                    .shard_disconnected(shard_id, code, reconnecting)
                    .await;
            }
            ShardEvent::Error(error) => {
                self.handler.shard_error(shard_id, error).await;
            }
        }
    }

    /// Re-establish voice sessions recorded in the initial voice states
    /// of this shard's guilds for the session user.
    fn seed_voice(&self, shard_id: u16, ctx: &Context) {
        let Some(me) = self.current_user_id() else {
            return;
        };

        for state in self.cache.voice_states_of(me) {
            let (Some(guild_id), Some(channel_id)) = (state.guild_id, state.channel_id) else {
                continue;
            };
            if (guild_id.get() % u64::from(self.total_shards.max(1))) as u16 != shard_id {
                continue;
            }

            debug!(shard_id, guild_id = %guild_id, "seeding voice connection");
            if let Err(err) =
                ctx.shard
                    .update_voice_state(guild_id, Some(channel_id), state.self_mute, state.self_deaf)
            {
                warn!(guild_id = %guild_id, error = %err, "failed to seed voice state");
                continue;
            }

            let voice = Arc::clone(&self.voice);
            let options = VoiceOptions {
                self_mute: state.self_mute,
                self_deaf: state.self_deaf,
                ..VoiceOptions::default()
            };
            tokio::spawn(async move {
                if let Err(err) = voice.join(guild_id, channel_id, options, shard_id).await {
                    warn!(guild_id = %guild_id, error = %err, "seeded voice join failed");
                }
            });
        }
    }

    async fn handle_dispatch(&self, ctx: Context, shard_id: u16, event: Event) {
        let handler = Arc::clone(&self.handler);
        let cache = &self.cache;

        match event {
            Event::Ready(ready) => {
                cache.insert_user(ready.user.clone());
                *self.current_user.write() = Some(ready.user.clone());
                for channel in &ready.private_channels {
                    cache.insert_channel(channel.clone());
                }
                for presence in &ready.presences {
                    if let Some(guild_id) = presence.guild_id {
                        cache.insert_presence(guild_id, presence.clone());
                    }
                }
                handler.ready(ctx, *ready).await;
            }
            Event::Resumed => {
                // The shard-level Resumed signal carries this to the
                // handler; the dispatch itself needs no cache work.
            }

            Event::GuildCreate(guild) => {
                let old = cache.insert_guild((*guild).clone());
                if guild.unavailable {
                    let reference = cobalt_model::UnavailableGuild {
                        id: guild.id,
                        unavailable: true,
                    };
                    handler.guild_unavailable(ctx, reference).await;
                } else if old.as_ref().is_some_and(|g| g.unavailable) {
                    handler.guild_available(ctx, *guild).await;
                } else {
                    handler.guild_create(ctx, *guild).await;
                }
            }
            Event::GuildUpdate(guild) => {
                let old = cache.insert_guild((*guild).clone());
                handler.guild_update(ctx, *guild, old).await;
            }
            Event::GuildDelete(reference) => {
                if reference.unavailable {
                    // Outage: keep the guild cached, flagged unavailable.
                    if let Some(mut guild) = cache.guild(reference.id) {
                        guild.unavailable = true;
                        cache.insert_guild(guild);
                    }
                    handler.guild_unavailable(ctx, reference).await;
                } else {
                    let old = cache.remove_guild(reference.id);
                    handler.guild_delete(ctx, reference, old).await;
                }
            }
            Event::GuildSync(sync) => {
                for member in &sync.members {
                    cache.insert_member(sync.id, member.clone());
                }
                for presence in &sync.presences {
                    cache.insert_presence(sync.id, presence.clone());
                }
                handler.guild_sync(ctx, *sync).await;
            }
            Event::GuildBanAdd(ban) => handler.guild_ban_add(ctx, *ban).await,
            Event::GuildBanRemove(ban) => handler.guild_ban_remove(ctx, *ban).await,
            Event::GuildEmojisUpdate(update) => {
                let old = match cache.guild(update.guild_id) {
                    Some(mut guild) => {
                        let old = std::mem::replace(&mut guild.emojis, update.emojis.clone());
                        cache.insert_guild(guild);
                        Some(old)
                    }
                    None => {
                        debug!(guild_id = %update.guild_id, "emoji update for uncached guild");
                        None
                    }
                };
                handler.guild_emojis_update(ctx, *update, old).await;
            }
            Event::GuildIntegrationsUpdate(update) => {
                handler.guild_integrations_update(ctx, update).await;
            }

            Event::GuildMemberAdd(added) => {
                cache.insert_member(added.guild_id, added.member.clone());
                if let Some(mut guild) = cache.guild(added.guild_id) {
                    guild.member_count = guild.member_count.map(|c| c + 1);
                    cache.insert_guild(guild);
                }
                handler.guild_member_add(ctx, *added).await;
            }
            Event::GuildMemberUpdate(update) => {
                let old = cache.member(update.guild_id, update.user.id);
                let merged = match old.clone() {
                    Some(mut member) => {
                        member.user = Some(update.user.clone());
                        member.roles = update.roles.clone();
                        member.nick = update.nick.clone();
                        member.premium_since = update.premium_since.clone();
                        member
                    }
                    None => {
                        debug!(
                            guild_id = %update.guild_id,
                            user_id = %update.user.id,
                            "member update for uncached member"
                        );
                        Member {
                            user: Some(update.user.clone()),
                            nick: update.nick.clone(),
                            roles: update.roles.clone(),
                            joined_at: None,
                            premium_since: update.premium_since.clone(),
                            deaf: false,
                            mute: false,
                            status: None,
                        }
                    }
                };
                cache.insert_member(update.guild_id, merged);
                handler.guild_member_update(ctx, *update, old).await;
            }
            Event::GuildMemberRemove(removed) => {
                let old = cache.remove_member(removed.guild_id, removed.user.id);
                if let Some(mut guild) = cache.guild(removed.guild_id) {
                    guild.member_count = guild.member_count.map(|c| c.saturating_sub(1));
                    cache.insert_guild(guild);
                }
                handler.guild_member_remove(ctx, *removed, old).await;
            }
            Event::GuildMembersChunk(chunk) => {
                for member in &chunk.members {
                    cache.insert_member(chunk.guild_id, member.clone());
                }
                for presence in &chunk.presences {
                    cache.insert_presence(chunk.guild_id, presence.clone());
                }
                handler.guild_members_chunk(ctx, *chunk).await;
            }

            Event::GuildRoleCreate(event) => {
                cache.insert_role(event.guild_id, event.role.clone());
                handler.guild_role_create(ctx, event.guild_id, event.role).await;
            }
            Event::GuildRoleUpdate(event) => {
                let old = cache.insert_role(event.guild_id, event.role.clone());
                handler
                    .guild_role_update(ctx, event.guild_id, event.role, old)
                    .await;
            }
            Event::GuildRoleDelete(event) => {
                let old = cache.remove_role(event.role_id);
                handler.guild_role_delete(ctx, event, old).await;
            }

            Event::ChannelCreate(channel) => {
                cache.insert_channel((*channel).clone());
                handler.channel_create(ctx, *channel).await;
            }
            Event::ChannelUpdate(channel) => {
                let old = cache.insert_channel((*channel).clone());
                handler.channel_update(ctx, *channel, old).await;
            }
            Event::ChannelDelete(channel) => {
                cache.remove_channel(channel.id);
                handler.channel_delete(ctx, *channel).await;
            }
            Event::ChannelPinsUpdate(update) => {
                match cache.channel(update.channel_id) {
                    Some(mut channel) => {
                        channel.last_pin_timestamp = update.last_pin_timestamp.clone();
                        cache.insert_channel(channel);
                    }
                    None => {
                        debug!(channel_id = %update.channel_id, "pins update for uncached channel");
                    }
                }
                handler.channel_pins_update(ctx, update).await;
            }
            Event::ChannelRecipientAdd(event) => {
                match cache.channel(event.channel_id) {
                    Some(mut channel) => {
                        channel.recipients.retain(|u| u.id != event.user.id);
                        channel.recipients.push(event.user.clone());
                        cache.insert_channel(channel);
                    }
                    None => {
                        debug!(channel_id = %event.channel_id, "recipient add for uncached channel");
                    }
                }
                handler.channel_recipient_add(ctx, *event).await;
            }
            Event::ChannelRecipientRemove(event) => {
                match cache.channel(event.channel_id) {
                    Some(mut channel) => {
                        channel.recipients.retain(|u| u.id != event.user.id);
                        cache.insert_channel(channel);
                    }
                    None => {
                        debug!(
                            channel_id = %event.channel_id,
                            "recipient remove for uncached channel"
                        );
                    }
                }
                handler.channel_recipient_remove(ctx, *event).await;
            }

            Event::MessageCreate(message) => {
                cache.insert_user(message.author.clone());
                cache.insert_message((*message).clone());
                handler.message_create(ctx, *message).await;
            }
            Event::MessageUpdate(update) => {
                let old = cache.message(update.id);
                if let Some(mut cached) = old.clone() {
                    if let Some(content) = &update.content {
                        cached.content = content.clone();
                    }
                    if update.edited_timestamp.is_some() {
                        cached.edited_timestamp = update.edited_timestamp.clone();
                    }
                    if let Some(embeds) = &update.embeds {
                        cached.embeds = embeds.clone();
                    }
                    if let Some(pinned) = update.pinned {
                        cached.pinned = pinned;
                    }
                    if let Some(mentions) = &update.mentions {
                        cached.mentions = mentions.clone();
                    }
                    cache.insert_message(cached);
                }
                handler.message_update(ctx, *update, old).await;
            }
            Event::MessageDelete(delete) => {
                let old = cache.remove_message(delete.id);
                handler.message_delete(ctx, delete, old).await;
            }
            Event::MessageDeleteBulk(delete) => {
                for id in &delete.ids {
                    cache.remove_message(*id);
                }
                handler.message_delete_bulk(ctx, delete).await;
            }

            Event::ReactionAdd(reaction) => handler.reaction_add(ctx, *reaction).await,
            Event::ReactionRemove(reaction) => handler.reaction_remove(ctx, *reaction).await,
            Event::ReactionRemoveAll(removal) => handler.reaction_remove_all(ctx, removal).await,
            Event::ReactionRemoveEmoji(removal) => {
                handler.reaction_remove_emoji(ctx, removal).await;
            }

            Event::PresenceUpdate(presence) => {
                let old = match presence.guild_id {
                    Some(guild_id) => cache.insert_presence(guild_id, (*presence).clone()),
                    None => {
                        debug!(user_id = %presence.user.id, "presence update without guild");
                        None
                    }
                };
                handler.presence_update(ctx, *presence, old).await;
            }
            Event::PresencesReplace(presences) => {
                for presence in &presences {
                    if let Some(guild_id) = presence.guild_id {
                        cache.insert_presence(guild_id, presence.clone());
                    }
                }
                handler.presences_replace(ctx, presences).await;
            }
            Event::TypingStart(typing) => handler.typing_start(ctx, *typing).await,
            Event::UserUpdate(user) => {
                let old = cache.insert_user((*user).clone());
                {
                    let mut me = self.current_user.write();
                    if me.as_ref().is_some_and(|m| m.id == user.id) {
                        *me = Some((*user).clone());
                    }
                }
                handler.user_update(ctx, *user, old).await;
            }
            Event::UserNoteUpdate(note) => handler.user_note_update(ctx, note).await,
            Event::UserSettingsUpdate(settings) => {
                handler.user_settings_update(ctx, *settings).await;
            }
            Event::UserGuildSettingsUpdate(settings) => {
                handler.user_guild_settings_update(ctx, *settings).await;
            }
            Event::RelationshipAdd(relationship) => {
                handler.relationship_add(ctx, *relationship).await;
            }
            Event::RelationshipRemove(removal) => {
                handler.relationship_remove(ctx, removal).await;
            }
            Event::FriendSuggestionCreate(suggestion) => {
                handler.friend_suggestion_create(ctx, *suggestion).await;
            }
            Event::FriendSuggestionDelete(delete) => {
                handler.friend_suggestion_delete(ctx, delete).await;
            }

            Event::VoiceStateUpdate(state) => {
                let old = self.cache.update_voice_state(&state);
                self.route_own_voice_state(&state);
                handler.voice_state_update(ctx, *state, old).await;
            }
            Event::VoiceServerUpdate(update) => {
                self.route_voice_server_update(&ctx, shard_id, &update);
                handler.voice_server_update(ctx, update).await;
            }

            Event::InviteCreate(invite) => handler.invite_create(ctx, *invite).await,
            Event::InviteDelete(invite) => handler.invite_delete(ctx, invite).await,

            Event::WebhooksUpdate(update) => handler.webhooks_update(ctx, update).await,

            Event::Unknown { name, data } => {
                debug!(event = %name, "unknown dispatch event");
                handler.unknown(ctx, name, data).await;
            }

            // `Event` is non-exhaustive; anything new surfaces above as
            // `Unknown` until it is modeled.
            _ => {}
        }
    }

    /// A voice state for the session user moves or tears down the active
    /// session of that guild.
    fn route_own_voice_state(&self, state: &VoiceState) {
        let Some(me) = self.current_user_id() else {
            return;
        };
        if state.user_id != me {
            return;
        }
        let Some(guild_id) = state.guild_id else {
            return;
        };

        match state.channel_id {
            Some(channel_id) => {
                if let Some(session) = self.voice.get(guild_id) {
                    if session.channel_id() != channel_id {
                        session.switch_channel(channel_id);
                    }
                }
            }
            None => self.voice.leave(guild_id),
        }
    }

    /// Forward a voice server update to the rendezvous table with the
    /// session id from the bot's own voice state and the shard identity.
    fn route_voice_server_update(
        &self,
        ctx: &Context,
        shard_id: u16,
        update: &cobalt_model::VoiceServerUpdateEvent,
    ) {
        let Some(me) = self.current_user_id() else {
            debug!(guild_id = %update.guild_id, "voice server update before READY");
            return;
        };

        let session_id = self
            .cache
            .voice_state(update.guild_id, me)
            .map(|state| state.session_id)
            .or_else(|| ctx.shard.session_id());

        match session_id {
            Some(session_id) => {
                self.voice
                    .voice_server_update(update, &session_id, me, shard_id);
            }
            None => {
                debug!(
                    guild_id = %update.guild_id,
                    "voice server update without a session id"
                );
            }
        }
    }
}
