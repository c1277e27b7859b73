//! Gateway opcodes.

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Operation codes for gateway payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// An event was dispatched. Receive.
    Dispatch = 0,

    /// Keep the connection alive. Send/receive.
    Heartbeat = 1,

    /// Start a new session. Send.
    Identify = 2,

    /// Update the client's presence. Send.
    StatusUpdate = 3,

    /// Join, leave or move between voice channels. Send.
    VoiceStateUpdate = 4,

    /// Resume a previous session. Send.
    Resume = 6,

    /// Server requested a reconnect. Receive.
    Reconnect = 7,

    /// Request guild member chunks. Send.
    RequestGuildMembers = 8,

    /// Session has been invalidated. Receive.
    InvalidSession = 9,

    /// Sent after connecting, carries the heartbeat interval. Receive.
    Hello = 10,

    /// Acknowledgment of a client heartbeat. Receive.
    HeartbeatAck = 11,

    /// Request member/presence sync for guilds (user sessions). Send.
    SyncGuild = 12,
}

impl OpCode {
    /// Whether this opcode is only ever received.
    pub const fn is_receive_only(self) -> bool {
        matches!(
            self,
            Self::Dispatch
                | Self::Reconnect
                | Self::InvalidSession
                | Self::Hello
                | Self::HeartbeatAck
        )
    }

    /// Whether this opcode is only ever sent.
    pub const fn is_send_only(self) -> bool {
        matches!(
            self,
            Self::Identify
                | Self::StatusUpdate
                | Self::VoiceStateUpdate
                | Self::Resume
                | Self::RequestGuildMembers
                | Self::SyncGuild
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        assert_eq!(serde_json::to_string(&OpCode::Hello).unwrap(), "10");
        let op: OpCode = serde_json::from_str("12").unwrap();
        assert_eq!(op, OpCode::SyncGuild);
    }

    #[test]
    fn directions() {
        assert!(OpCode::Dispatch.is_receive_only());
        assert!(OpCode::SyncGuild.is_send_only());
        assert!(!OpCode::Heartbeat.is_receive_only());
        assert!(!OpCode::Heartbeat.is_send_only());
    }
}
