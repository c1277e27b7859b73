//! JSON parsing helpers with optional SIMD acceleration.
//!
//! The gateway and HTTP crates route all payload decoding through these
//! functions so the `simd` feature swaps the parser in one place.
//!
//! simd-json parses in place, which is why the byte-slice entry points take
//! `&mut [u8]`.
#![allow(unsafe_code)]

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure to decode or encode a JSON payload.
#[derive(Debug, Error)]
#[error("JSON error: {0}")]
pub struct JsonError(String);

impl From<serde_json::Error> for JsonError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

#[cfg(feature = "simd")]
impl From<simd_json::Error> for JsonError {
    fn from(err: simd_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Deserialize from a mutable byte buffer.
#[cfg(feature = "simd")]
pub fn from_slice<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T, JsonError> {
    simd_json::from_slice(bytes).map_err(JsonError::from)
}

/// Deserialize from a mutable byte buffer.
#[cfg(not(feature = "simd"))]
pub fn from_slice<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T, JsonError> {
    serde_json::from_slice(bytes).map_err(JsonError::from)
}

/// Deserialize from a string slice.
pub fn from_str<T: DeserializeOwned>(json: &str) -> Result<T, JsonError> {
    serde_json::from_str(json).map_err(JsonError::from)
}

/// Deserialize from an owned string, letting simd-json parse in place.
#[cfg(feature = "simd")]
pub fn from_string<T: DeserializeOwned>(mut json: String) -> Result<T, JsonError> {
    // simd-json mutates the buffer; the string is consumed so the
    // scribbled-over contents are never observable.
    unsafe { simd_json::from_str(json.as_mut_str()).map_err(JsonError::from) }
}

/// Deserialize from an owned string.
#[cfg(not(feature = "simd"))]
pub fn from_string<T: DeserializeOwned>(json: String) -> Result<T, JsonError> {
    serde_json::from_str(&json).map_err(JsonError::from)
}

/// Serialize to a JSON string. Serialization always uses serde_json.
pub fn to_string<T: serde::Serialize>(value: &T) -> Result<String, JsonError> {
    serde_json::to_string(value).map_err(JsonError::from)
}

/// Serialize to a JSON byte vector.
pub fn to_vec<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, JsonError> {
    serde_json::to_vec(value).map_err(JsonError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Envelope {
        op: u8,
        d: Option<Inner>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Inner {
        heartbeat_interval: u64,
    }

    #[test]
    fn parse_envelope() {
        let payload: Envelope =
            from_string(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#.to_string()).unwrap();
        assert_eq!(payload.op, 10);
        assert_eq!(payload.d.unwrap().heartbeat_interval, 41250);
    }

    #[test]
    fn parse_null_data() {
        let payload: Envelope = from_str(r#"{"op":11,"d":null}"#).unwrap();
        assert_eq!(payload.op, 11);
        assert!(payload.d.is_none());
    }

    #[test]
    fn parse_from_bytes() {
        let mut buf = br#"{"op":1,"d":null}"#.to_vec();
        let payload: Envelope = from_slice(&mut buf).unwrap();
        assert_eq!(payload.op, 1);
    }
}
