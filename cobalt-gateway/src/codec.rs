//! Per-connection frame codec.
//!
//! A connection fixes two choices at handshake time: the payload encoding
//! (JSON text or binary external terms) and whether inbound traffic is
//! zlib-stream compressed. The codec normalizes every inbound frame into a
//! [`WireEnvelope`] and renders outbound payloads in the connection's
//! encoding.

use crate::compression::ZlibInflater;
use crate::error::GatewayError;
use crate::etf;
use crate::payload::WireEnvelope;
use serde::Serialize;

/// Payload encoding negotiated via the gateway URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text frames.
    #[default]
    Json,
    /// Binary external-term frames.
    Etf,
}

impl Encoding {
    /// Query-parameter value for the gateway URL.
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Etf => "etf",
        }
    }
}

/// An outbound frame ready for the socket.
#[derive(Debug, Clone)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Encode an outbound payload in the connection's encoding.
pub fn encode<T: Serialize>(encoding: Encoding, payload: &T) -> Result<WireFrame, GatewayError> {
    match encoding {
        Encoding::Json => Ok(WireFrame::Text(serde_json::to_string(payload)?)),
        Encoding::Etf => {
            let value = serde_json::to_value(payload)?;
            Ok(WireFrame::Binary(etf::encode_json(&value)))
        }
    }
}

/// Inbound decoder state for one connection.
pub struct FrameCodec {
    encoding: Encoding,
    inflater: Option<ZlibInflater>,
}

impl FrameCodec {
    pub fn new(encoding: Encoding, compress: bool) -> Self {
        Self {
            encoding,
            inflater: compress.then(ZlibInflater::new),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Drop buffered decompression state for a fresh connection.
    pub fn reset(&mut self) {
        if let Some(inflater) = &mut self.inflater {
            inflater.reset();
        }
    }

    /// Decode a text frame. Text frames are always JSON, whatever the
    /// negotiated binary encoding.
    pub fn decode_text(&mut self, text: &str) -> Result<Option<WireEnvelope>, GatewayError> {
        let mut bytes = text.as_bytes().to_vec();
        let envelope = cobalt_model::json::from_slice(&mut bytes)?;
        Ok(Some(envelope))
    }

    /// Decode a binary frame, transparently reassembling compressed
    /// fragments. Returns `None` while a compressed message is incomplete.
    pub fn decode_binary(&mut self, data: &[u8]) -> Result<Option<WireEnvelope>, GatewayError> {
        let complete = match &mut self.inflater {
            Some(inflater) => match inflater
                .push(data)
                .map_err(|e| GatewayError::Compression(e.to_string()))?
            {
                Some(bytes) => bytes.to_vec(),
                None => return Ok(None),
            },
            None => data.to_vec(),
        };

        self.decode_bytes(complete).map(Some)
    }

    fn decode_bytes(&self, mut bytes: Vec<u8>) -> Result<WireEnvelope, GatewayError> {
        match self.encoding {
            Encoding::Json => Ok(cobalt_model::json::from_slice(&mut bytes)?),
            Encoding::Etf => {
                let value = etf::decode_to_json(&bytes)?;
                serde_json::from_value(value).map_err(GatewayError::from)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;
    use crate::payload::heartbeat;

    #[test]
    fn json_text_round_trip() {
        let mut codec = FrameCodec::new(Encoding::Json, false);

        let frame = encode(Encoding::Json, &heartbeat(Some(7))).unwrap();
        let text = match frame {
            WireFrame::Text(text) => text,
            WireFrame::Binary(_) => panic!("JSON encodes as text"),
        };

        let envelope = codec.decode_text(&text).unwrap().unwrap();
        assert_eq!(envelope.op, OpCode::Heartbeat);
        assert_eq!(envelope.d, Some(serde_json::json!(7)));
    }

    #[test]
    fn etf_binary_round_trip() {
        let mut codec = FrameCodec::new(Encoding::Etf, false);

        let frame = encode(Encoding::Etf, &heartbeat(None)).unwrap();
        let bytes = match frame {
            WireFrame::Binary(bytes) => bytes,
            WireFrame::Text(_) => panic!("ETF encodes as binary"),
        };

        let envelope = codec.decode_binary(&bytes).unwrap().unwrap();
        assert_eq!(envelope.op, OpCode::Heartbeat);
    }

    #[test]
    fn compressed_fragments_reassemble() {
        use flate2::{Compress, Compression, FlushCompress};

        let mut compressor = Compress::new(Compression::default(), true);
        let msg = br#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let mut deflated = vec![0u8; msg.len() + 256];
        compressor
            .compress(msg, &mut deflated, FlushCompress::Sync)
            .unwrap();
        deflated.truncate(compressor.total_out() as usize);

        let mut codec = FrameCodec::new(Encoding::Json, true);
        let (head, tail) = deflated.split_at(deflated.len() / 2);

        assert!(codec.decode_binary(head).unwrap().is_none());
        let envelope = codec.decode_binary(tail).unwrap().unwrap();
        assert_eq!(envelope.op, OpCode::Hello);
    }
}
