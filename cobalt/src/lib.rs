//! cobalt — a Helselia client library.
//!
//! The façade over the cobalt ecosystem:
//! - `cobalt-gateway`: shard state machines and the shard manager
//! - `cobalt-http`: REST pipeline with bucketed rate limiting
//! - `cobalt-model`: entity and event payload types
//! - `cobalt-cache`: gateway-fed entity cache
//! - `cobalt-voice`: voice session rendezvous
//!
//! # Example
//!
//! ```no_run
//! use cobalt::prelude::*;
//!
//! struct Handler;
//!
//! #[async_trait]
//! impl EventHandler for Handler {
//!     async fn message_create(&self, _ctx: Context, msg: Message) {
//!         println!("{}: {}", msg.author.username, msg.content);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CobaltError> {
//!     let client = Client::builder(std::env::var("HELSELIA_TOKEN").unwrap())
//!         .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
//!         .event_handler(Handler)
//!         .build()?;
//!
//!     client.start().await
//! }
//! ```

pub mod client;
mod dispatch;
pub mod error;
pub mod handler;
pub mod prelude;

// Re-exports
pub use cobalt_cache as cache;
pub use cobalt_gateway as gateway;
pub use cobalt_http as http;
pub use cobalt_model as model;
pub use cobalt_voice as voice;

pub use client::{Client, ClientBuilder, ClientOptions, MaxShards};
pub use error::CobaltError;
pub use handler::{Context, EventHandler};

#[cfg(feature = "performance")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
