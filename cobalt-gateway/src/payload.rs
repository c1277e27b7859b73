//! Gateway payload structures.
//!
//! Inbound frames are decoded into [`WireEnvelope`]; outbound payloads are
//! wrapped in [`GatewayPayload`] and encoded per the connection's codec.

use crate::opcode::OpCode;
use cobalt_model::{ClientPresence, Intents, Snowflake};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// An inbound gateway frame after codec normalization.
#[derive(Debug, Deserialize)]
pub struct WireEnvelope {
    /// Opcode.
    pub op: OpCode,

    /// Payload body; deferred to the event demux.
    #[serde(default)]
    pub d: Option<serde_json::Value>,

    /// Sequence number, present on dispatches.
    #[serde(default)]
    pub s: Option<u64>,

    /// Event name, present on dispatches.
    #[serde(default)]
    pub t: Option<String>,
}

/// An outbound gateway frame.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayPayload<D> {
    pub op: OpCode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<D>,
}

impl<D: Serialize> GatewayPayload<D> {
    /// Wrap `data` under `op`.
    pub fn new(op: OpCode, data: D) -> Self {
        Self { op, d: Some(data) }
    }
}

/// A heartbeat frame: `{"op":1,"d":<seq|null>}`. The `d` field is always
/// present, null when no dispatch has been seen yet.
pub fn heartbeat(sequence: Option<u64>) -> GatewayPayload<Option<u64>> {
    GatewayPayload {
        op: OpCode::Heartbeat,
        d: Some(sequence),
    }
}

/// HELLO (op 10) body.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat cadence in milliseconds.
    pub heartbeat_interval: u64,

    #[serde(rename = "_trace", default)]
    pub trace: Option<Vec<String>>,
}

/// IDENTIFY (op 2) body.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload<'a> {
    pub token: Cow<'a, str>,

    pub properties: ConnectionProperties<'a>,

    pub compress: bool,

    pub large_threshold: u8,

    /// `[shard_id, total_shards]`.
    pub shard: [u16; 2],

    /// Intent bits; omitted entirely for sessions using
    /// `guild_subscriptions` semantics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intents: Option<Intents>,

    /// Presence/typing subscription flag, only sent when intents are
    /// absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_subscriptions: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<ClientPresence>,
}

/// Client properties sent with IDENTIFY.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProperties<'a> {
    pub os: Cow<'a, str>,
    pub browser: Cow<'a, str>,
    pub device: Cow<'a, str>,
}

impl Default for ConnectionProperties<'_> {
    fn default() -> Self {
        Self {
            os: Cow::Owned(std::env::consts::OS.to_string()),
            browser: Cow::Borrowed("cobalt"),
            device: Cow::Borrowed("cobalt"),
        }
    }
}

/// RESUME (op 6) body.
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload<'a> {
    pub token: Cow<'a, str>,

    pub session_id: Cow<'a, str>,

    pub seq: u64,
}

/// The guild target of a member request: one guild or a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GuildSelector {
    One(Snowflake),
    Many(Vec<Snowflake>),
}

/// REQUEST_GUILD_MEMBERS (op 8) body.
#[derive(Debug, Clone, Serialize)]
pub struct RequestGuildMembersPayload {
    pub guild_id: GuildSelector,

    pub query: String,

    pub limit: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presences: Option<bool>,

    pub nonce: String,
}

/// VOICE_STATE_UPDATE (op 4) body.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceStateUpdatePayload {
    pub guild_id: Snowflake,

    /// `None` leaves the current channel.
    pub channel_id: Option<Snowflake>,

    pub self_mute: bool,

    pub self_deaf: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_with_and_without_sequence() {
        let json = serde_json::to_string(&heartbeat(Some(42))).unwrap();
        assert_eq!(json, r#"{"op":1,"d":42}"#);

        let json = serde_json::to_string(&heartbeat(None)).unwrap();
        assert_eq!(json, r#"{"op":1,"d":null}"#);
    }

    #[test]
    fn identify_with_intents_omits_subscriptions() {
        let identify = IdentifyPayload {
            token: Cow::Borrowed("abc"),
            properties: ConnectionProperties::default(),
            compress: false,
            large_threshold: 250,
            shard: [0, 1],
            intents: Some(Intents::GUILDS | Intents::GUILD_MESSAGES),
            guild_subscriptions: None,
            presence: None,
        };

        let json = serde_json::to_string(&identify).unwrap();
        assert!(json.contains(r#""intents":513"#));
        assert!(!json.contains("guild_subscriptions"));
    }

    #[test]
    fn guild_selector_forms() {
        let one = serde_json::to_string(&GuildSelector::One(Snowflake::new(1))).unwrap();
        assert_eq!(one, r#""1""#);

        let many = serde_json::to_string(&GuildSelector::Many(vec![
            Snowflake::new(1),
            Snowflake::new(2),
        ]))
        .unwrap();
        assert_eq!(many, r#"["1","2"]"#);
    }

    #[test]
    fn envelope_decodes_dispatch() {
        let envelope: WireEnvelope =
            serde_json::from_str(r#"{"op":0,"s":3,"t":"RESUMED","d":{}}"#).unwrap();
        assert_eq!(envelope.op, OpCode::Dispatch);
        assert_eq!(envelope.s, Some(3));
        assert_eq!(envelope.t.as_deref(), Some("RESUMED"));
    }
}
