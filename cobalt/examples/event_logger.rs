//! Connects a client and logs messages plus shard health.
//!
//! ```sh
//! HELSELIA_TOKEN=... cargo run --example event_logger
//! ```

use cobalt::model::guild::ReadyEventData;
use cobalt::prelude::*;

struct Logger;

#[async_trait]
impl EventHandler for Logger {
    async fn ready(&self, _ctx: Context, ready: ReadyEventData) {
        println!(
            "logged in as {} ({} guilds pending)",
            ready.user.username,
            ready.guilds.len()
        );
    }

    async fn shard_ready(&self, ctx: Context) {
        println!("shard {} fully ready", ctx.shard_id());
    }

    async fn message_create(&self, ctx: Context, msg: Message) {
        if msg.content == "!latency" {
            println!(
                "shard {} heartbeat latency: {:?}",
                ctx.shard_id(),
                ctx.shard.latency()
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CobaltError> {
    tracing_subscriber::fmt::init();

    let token = std::env::var("HELSELIA_TOKEN").expect("HELSELIA_TOKEN not set");
    let client = Client::builder(token)
        .intents(Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::GUILD_VOICE_STATES)
        .event_handler(Logger)
        .build()?;

    client.start().await
}
