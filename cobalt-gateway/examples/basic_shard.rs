//! Minimal single-shard connection printing dispatched events.
//!
//! ```sh
//! HELSELIA_TOKEN=... cargo run --example basic_shard
//! ```

use cobalt_gateway::{Shard, ShardConfig, ShardEvent};
use cobalt_model::{Intents, Token};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let token = Token::bot(std::env::var("HELSELIA_TOKEN")?);
    let config = ShardConfig::new(token)
        .with_intents(Some(Intents::GUILDS | Intents::GUILD_MESSAGES));
    let shard = Shard::new(0, 1, config);

    let (tx, rx) = flume::unbounded();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv_async().await {
            match event {
                ShardEvent::Dispatch(event) => println!("event: {}", event.name()),
                ShardEvent::Ready => println!("shard ready"),
                other => println!("signal: {other:?}"),
            }
        }
    });

    shard.run(tx).await?;
    Ok(())
}
