//! cobalt-cache — gateway-fed entity cache.
#![deny(unsafe_code)]
//!
//! Concurrent snowflake-keyed maps over the entities the dispatcher
//! maintains. Inserts return the previous value so the dispatch layer can
//! emit before/after pairs for update events. Entries are invalidated by
//! gateway events, not by time.

use cobalt_model::{
    Channel, Guild, Member, Message, Presence, Role, Snowflake, User, VoiceState,
};
use dashmap::DashMap;

/// Read/write surface the dispatcher and REST hooks rely on.
pub trait Cache: Send + Sync {
    fn guild(&self, id: Snowflake) -> Option<Guild>;
    fn channel(&self, id: Snowflake) -> Option<Channel>;
    fn user(&self, id: Snowflake) -> Option<User>;
    fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member>;
    fn role(&self, id: Snowflake) -> Option<Role>;

    /// Each insert returns the entity it replaced, if any.
    fn insert_guild(&self, guild: Guild) -> Option<Guild>;
    fn insert_channel(&self, channel: Channel) -> Option<Channel>;
    fn insert_user(&self, user: User) -> Option<User>;
    fn insert_member(&self, guild_id: Snowflake, member: Member) -> Option<Member>;
    fn insert_role(&self, guild_id: Snowflake, role: Role) -> Option<Role>;

    fn remove_guild(&self, id: Snowflake) -> Option<Guild>;
    fn remove_channel(&self, id: Snowflake) -> Option<Channel>;
    fn remove_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member>;
    fn remove_role(&self, id: Snowflake) -> Option<Role>;
}

/// DashMap-backed cache.
pub struct InMemoryCache {
    guilds: DashMap<Snowflake, Guild>,
    channels: DashMap<Snowflake, Channel>,
    users: DashMap<Snowflake, User>,
    members: DashMap<(Snowflake, Snowflake), Member>,
    roles: DashMap<Snowflake, Role>,
    messages: DashMap<Snowflake, Message>,
    presences: DashMap<(Snowflake, Snowflake), Presence>,
    voice_states: DashMap<(Snowflake, Snowflake), VoiceState>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            guilds: DashMap::new(),
            channels: DashMap::new(),
            users: DashMap::new(),
            members: DashMap::new(),
            roles: DashMap::new(),
            messages: DashMap::new(),
            presences: DashMap::new(),
            voice_states: DashMap::new(),
        }
    }

    // Messages, presences and voice states sit outside the `Cache` trait;
    // only the dispatcher touches them.

    pub fn message(&self, id: Snowflake) -> Option<Message> {
        self.messages.get(&id).map(|m| m.clone())
    }

    pub fn insert_message(&self, message: Message) -> Option<Message> {
        self.messages.insert(message.id, message)
    }

    pub fn remove_message(&self, id: Snowflake) -> Option<Message> {
        self.messages.remove(&id).map(|(_, m)| m)
    }

    pub fn presence(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Presence> {
        self.presences.get(&(guild_id, user_id)).map(|p| p.clone())
    }

    pub fn insert_presence(
        &self,
        guild_id: Snowflake,
        presence: Presence,
    ) -> Option<Presence> {
        self.presences.insert((guild_id, presence.user.id), presence)
    }

    pub fn voice_state(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<VoiceState> {
        self.voice_states
            .get(&(guild_id, user_id))
            .map(|v| v.clone())
    }

    /// Store or clear one user's voice state; a `None` channel removes it.
    pub fn update_voice_state(&self, state: &VoiceState) -> Option<VoiceState> {
        let Some(guild_id) = state.guild_id else {
            return None;
        };
        if state.channel_id.is_some() {
            self.voice_states
                .insert((guild_id, state.user_id), state.clone())
        } else {
            self.voice_states
                .remove(&(guild_id, state.user_id))
                .map(|(_, v)| v)
        }
    }

    /// Voice states of `user_id` across all cached guilds.
    pub fn voice_states_of(&self, user_id: Snowflake) -> Vec<VoiceState> {
        self.voice_states
            .iter()
            .filter(|entry| entry.key().1 == user_id)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Cache for InMemoryCache {
    fn guild(&self, id: Snowflake) -> Option<Guild> {
        self.guilds.get(&id).map(|g| g.clone())
    }

    fn channel(&self, id: Snowflake) -> Option<Channel> {
        self.channels.get(&id).map(|c| c.clone())
    }

    fn user(&self, id: Snowflake) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.members.get(&(guild_id, user_id)).map(|m| m.clone())
    }

    fn role(&self, id: Snowflake) -> Option<Role> {
        self.roles.get(&id).map(|r| r.clone())
    }

    fn insert_guild(&self, guild: Guild) -> Option<Guild> {
        for role in &guild.roles {
            self.roles.insert(role.id, role.clone());
        }
        for channel in &guild.channels {
            self.channels.insert(channel.id, channel.clone());
        }
        for member in &guild.members {
            if let Some(user_id) = member.user_id() {
                self.members.insert((guild.id, user_id), member.clone());
            }
        }
        for state in &guild.voice_states {
            if state.channel_id.is_some() {
                self.voice_states
                    .insert((guild.id, state.user_id), state.clone());
            }
        }
        self.guilds.insert(guild.id, guild)
    }

    fn insert_channel(&self, channel: Channel) -> Option<Channel> {
        self.channels.insert(channel.id, channel)
    }

    fn insert_user(&self, user: User) -> Option<User> {
        self.users.insert(user.id, user)
    }

    fn insert_member(&self, guild_id: Snowflake, member: Member) -> Option<Member> {
        let user_id = member.user_id()?;
        if let Some(user) = member.user.clone() {
            self.users.insert(user.id, user);
        }
        self.members.insert((guild_id, user_id), member)
    }

    fn insert_role(&self, _guild_id: Snowflake, role: Role) -> Option<Role> {
        self.roles.insert(role.id, role)
    }

    fn remove_guild(&self, id: Snowflake) -> Option<Guild> {
        self.members.retain(|(guild_id, _), _| *guild_id != id);
        self.presences.retain(|(guild_id, _), _| *guild_id != id);
        self.voice_states.retain(|(guild_id, _), _| *guild_id != id);
        self.guilds.remove(&id).map(|(_, g)| g)
    }

    fn remove_channel(&self, id: Snowflake) -> Option<Channel> {
        self.channels.remove(&id).map(|(_, c)| c)
    }

    fn remove_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.members.remove(&(guild_id, user_id)).map(|(_, m)| m)
    }

    fn remove_role(&self, id: Snowflake) -> Option<Role> {
        self.roles.remove(&id).map(|(_, r)| r)
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64) -> User {
        serde_json::from_value(serde_json::json!({"id": id.to_string(), "username": "u"}))
            .unwrap()
    }

    #[test]
    fn insert_returns_previous_entity() {
        let cache = InMemoryCache::new();
        assert!(cache.insert_user(user(1)).is_none());

        let mut updated = user(1);
        updated.username = "renamed".to_string();
        let old = cache.insert_user(updated).expect("previous user");
        assert_eq!(old.username, "u");
        assert_eq!(cache.user(Snowflake::new(1)).unwrap().username, "renamed");
    }

    #[test]
    fn guild_insert_indexes_contents() {
        let cache = InMemoryCache::new();
        let guild: Guild = serde_json::from_value(serde_json::json!({
            "id": "9",
            "name": "g",
            "roles": [{"id": "90", "name": "r"}],
            "channels": [{"id": "91", "type": 0}],
            "members": [{"user": {"id": "92", "username": "m"}}],
        }))
        .unwrap();

        cache.insert_guild(guild);
        assert!(cache.role(Snowflake::new(90)).is_some());
        assert!(cache.channel(Snowflake::new(91)).is_some());
        assert!(cache
            .member(Snowflake::new(9), Snowflake::new(92))
            .is_some());
    }

    #[test]
    fn voice_state_with_null_channel_clears() {
        let cache = InMemoryCache::new();
        let joined: VoiceState = serde_json::from_str(
            r#"{"guild_id":"1","channel_id":"2","user_id":"3","session_id":"s"}"#,
        )
        .unwrap();
        cache.update_voice_state(&joined);
        assert!(cache.voice_state(Snowflake::new(1), Snowflake::new(3)).is_some());

        let left: VoiceState = serde_json::from_str(
            r#"{"guild_id":"1","channel_id":null,"user_id":"3","session_id":"s"}"#,
        )
        .unwrap();
        let old = cache.update_voice_state(&left).expect("previous state");
        assert_eq!(old.channel_id, Some(Snowflake::new(2)));
        assert!(cache.voice_state(Snowflake::new(1), Snowflake::new(3)).is_none());
    }
}
