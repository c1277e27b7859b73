//! Convenience re-exports for client code.

pub use crate::client::{Client, ClientBuilder, ClientOptions, MaxShards};
pub use crate::error::CobaltError;
pub use crate::handler::{Context, EventHandler};

pub use cobalt_gateway::{Event, ShardState};
pub use cobalt_model::{
    Activity, ActivityType, Channel, ClientPresence, Guild, Intents, Member, Message, Role,
    Snowflake, Status, Token, User,
};
pub use cobalt_voice::{VoiceOptions, VoiceSession};

pub use async_trait::async_trait;
