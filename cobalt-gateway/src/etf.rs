//! External-term binary encoding for gateway payloads.
//!
//! When a connection selects the binary encoding, frames are Erlang
//! external term format instead of JSON text. The gateway uses a small
//! subset: atoms, integers (small/32-bit/big), floats, binaries, lists,
//! maps and nil. Terms bridge to `serde_json::Value` so the demux layer is
//! encoding-agnostic.

use crate::error::GatewayError;

/// Format version tag leading every term.
const FORMAT_VERSION: u8 = 131;

mod tag {
    pub const NEW_FLOAT: u8 = 70;
    pub const SMALL_INTEGER: u8 = 97;
    pub const INTEGER: u8 = 98;
    pub const ATOM: u8 = 100;
    pub const SMALL_TUPLE: u8 = 104;
    pub const LARGE_TUPLE: u8 = 105;
    pub const NIL: u8 = 106;
    pub const STRING: u8 = 107;
    pub const LIST: u8 = 108;
    pub const BINARY: u8 = 109;
    pub const SMALL_BIG: u8 = 110;
    pub const MAP: u8 = 116;
    pub const ATOM_UTF8: u8 = 118;
    pub const SMALL_ATOM_UTF8: u8 = 119;
}

/// A decoded term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    SmallInt(u8),
    Int(i32),
    BigInt(i128),
    Float(f64),
    Atom(String),
    Tuple(Vec<Term>),
    Nil,
    String(String),
    List(Vec<Term>),
    Binary(Vec<u8>),
    Map(Vec<(Term, Term)>),
}

/// Streaming reader over an encoded term.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, GatewayError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| GatewayError::Decode("truncated term".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], GatewayError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| GatewayError::Decode("truncated term".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, GatewayError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, GatewayError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, GatewayError> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn term(&mut self) -> Result<Term, GatewayError> {
        let tag = self.u8()?;
        match tag {
            tag::SMALL_INTEGER => Ok(Term::SmallInt(self.u8()?)),
            tag::INTEGER => Ok(Term::Int(self.i32()?)),
            tag::NEW_FLOAT => {
                let b = self.bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(Term::Float(f64::from_be_bytes(raw)))
            }
            tag::ATOM | tag::ATOM_UTF8 => {
                let len = self.u16()? as usize;
                let b = self.bytes(len)?;
                Ok(Term::Atom(String::from_utf8_lossy(b).into_owned()))
            }
            tag::SMALL_ATOM_UTF8 => {
                let len = self.u8()? as usize;
                let b = self.bytes(len)?;
                Ok(Term::Atom(String::from_utf8_lossy(b).into_owned()))
            }
            tag::SMALL_TUPLE => {
                let arity = self.u8()? as usize;
                let mut items = Vec::with_capacity(arity);
                for _ in 0..arity {
                    items.push(self.term()?);
                }
                Ok(Term::Tuple(items))
            }
            tag::LARGE_TUPLE => {
                let arity = self.u32()? as usize;
                let mut items = Vec::with_capacity(arity);
                for _ in 0..arity {
                    items.push(self.term()?);
                }
                Ok(Term::Tuple(items))
            }
            tag::NIL => Ok(Term::Nil),
            tag::STRING => {
                let len = self.u16()? as usize;
                let b = self.bytes(len)?;
                Ok(Term::String(String::from_utf8_lossy(b).into_owned()))
            }
            tag::LIST => {
                let len = self.u32()? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.term()?);
                }
                // Proper lists carry a nil tail.
                let _tail = self.term()?;
                Ok(Term::List(items))
            }
            tag::BINARY => {
                let len = self.u32()? as usize;
                Ok(Term::Binary(self.bytes(len)?.to_vec()))
            }
            tag::SMALL_BIG => {
                let n = self.u8()? as usize;
                let sign = self.u8()?;
                let b = self.bytes(n)?;
                if n > 16 {
                    return Err(GatewayError::Decode("big integer too wide".into()));
                }
                let mut value: i128 = 0;
                for (i, byte) in b.iter().enumerate() {
                    value |= (*byte as i128) << (i * 8);
                }
                if sign != 0 {
                    value = -value;
                }
                Ok(Term::BigInt(value))
            }
            tag::MAP => {
                let arity = self.u32()? as usize;
                let mut pairs = Vec::with_capacity(arity);
                for _ in 0..arity {
                    let key = self.term()?;
                    let value = self.term()?;
                    pairs.push((key, value));
                }
                Ok(Term::Map(pairs))
            }
            other => Err(GatewayError::Decode(format!(
                "unknown term tag {other} at offset {}",
                self.pos - 1
            ))),
        }
    }
}

/// Decode an encoded payload into a [`Term`].
pub fn decode(data: &[u8]) -> Result<Term, GatewayError> {
    let mut reader = Reader { data, pos: 0 };
    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(GatewayError::Decode(format!(
            "unsupported term format version {version}"
        )));
    }
    reader.term()
}

/// Decode an encoded payload straight to a JSON value.
pub fn decode_to_json(data: &[u8]) -> Result<serde_json::Value, GatewayError> {
    to_json(&decode(data)?)
}

/// Bridge a [`Term`] into the JSON value space the demux consumes.
pub fn to_json(term: &Term) -> Result<serde_json::Value, GatewayError> {
    use serde_json::Value;

    Ok(match term {
        Term::SmallInt(n) => Value::Number((*n as i64).into()),
        Term::Int(n) => Value::Number((*n as i64).into()),
        Term::BigInt(n) => {
            // Snowflakes travel as big integers; keep precision by going
            // through the string form the JSON model already accepts.
            if let Ok(v) = i64::try_from(*n) {
                Value::Number(v.into())
            } else {
                Value::String(n.to_string())
            }
        }
        Term::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| GatewayError::Decode("non-finite float".into()))?,
        Term::Atom(name) => match name.as_str() {
            "nil" | "null" => Value::Null,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(name.clone()),
        },
        Term::Tuple(items) | Term::List(items) => Value::Array(
            items
                .iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Term::Nil => Value::Null,
        Term::String(s) => Value::String(s.clone()),
        Term::Binary(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::String(s.to_owned()),
            Err(_) => {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        },
        Term::Map(pairs) => {
            let mut map = serde_json::Map::with_capacity(pairs.len());
            for (key, value) in pairs {
                let key = match key {
                    Term::Atom(s) | Term::String(s) => s.clone(),
                    Term::Binary(b) => String::from_utf8_lossy(b).into_owned(),
                    other => to_json(other)?.to_string(),
                };
                map.insert(key, to_json(value)?);
            }
            Value::Object(map)
        }
    })
}

/// Encode a JSON value as an external term, for outbound binary frames.
pub fn encode_json(value: &serde_json::Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.push(FORMAT_VERSION);
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &serde_json::Value) {
    use serde_json::Value;

    match value {
        Value::Null => write_atom(out, "nil"),
        Value::Bool(true) => write_atom(out, "true"),
        Value::Bool(false) => write_atom(out, "false"),
        Value::Number(n) => {
            if let Some(u) = n.as_u64().filter(|u| *u <= u8::MAX as u64) {
                out.push(tag::SMALL_INTEGER);
                out.push(u as u8);
            } else if let Some(i) = n.as_i64().filter(|i| i32::try_from(*i).is_ok()) {
                out.push(tag::INTEGER);
                out.extend_from_slice(&(i as i32).to_be_bytes());
            } else if let Some(i) = n.as_i64() {
                write_small_big(out, i);
            } else {
                out.push(tag::NEW_FLOAT);
                out.extend_from_slice(&n.as_f64().unwrap_or(0.0).to_be_bytes());
            }
        }
        Value::String(s) => {
            out.push(tag::BINARY);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push(tag::NIL);
            } else {
                out.push(tag::LIST);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    write_value(out, item);
                }
                out.push(tag::NIL);
            }
        }
        Value::Object(map) => {
            out.push(tag::MAP);
            out.extend_from_slice(&(map.len() as u32).to_be_bytes());
            for (key, item) in map {
                out.push(tag::BINARY);
                out.extend_from_slice(&(key.len() as u32).to_be_bytes());
                out.extend_from_slice(key.as_bytes());
                write_value(out, item);
            }
        }
    }
}

fn write_atom(out: &mut Vec<u8>, name: &str) {
    out.push(tag::SMALL_ATOM_UTF8);
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
}

fn write_small_big(out: &mut Vec<u8>, value: i64) {
    let sign = u8::from(value < 0);
    let mut magnitude = value.unsigned_abs();
    let mut digits = Vec::with_capacity(8);
    while magnitude > 0 {
        digits.push((magnitude & 0xFF) as u8);
        magnitude >>= 8;
    }
    out.push(tag::SMALL_BIG);
    out.push(digits.len() as u8);
    out.push(sign);
    out.extend_from_slice(&digits);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_small_integer() {
        assert_eq!(decode(&[131, 97, 42]).unwrap(), Term::SmallInt(42));
    }

    #[test]
    fn decode_integer() {
        assert_eq!(decode(&[131, 98, 0, 0, 1, 0]).unwrap(), Term::Int(256));
    }

    #[test]
    fn decode_binary_string() {
        let data = [131, 109, 0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(decode(&data).unwrap(), Term::Binary(b"hello".to_vec()));
    }

    #[test]
    fn decode_map_of_atoms() {
        let data = [
            131, 116, 0, 0, 0, 1, // map, one pair
            119, 2, b'o', b'p', // atom "op"
            97, 10, // small int 10
        ];
        let json = decode_to_json(&data).unwrap();
        assert_eq!(json["op"], 10);
    }

    #[test]
    fn atoms_bridge_to_json_scalars() {
        assert_eq!(to_json(&Term::Atom("nil".into())).unwrap(), json!(null));
        assert_eq!(to_json(&Term::Atom("true".into())).unwrap(), json!(true));
        assert_eq!(to_json(&Term::Atom("false".into())).unwrap(), json!(false));
    }

    #[test]
    fn truncated_input_errors() {
        assert!(decode(&[131, 109, 0, 0, 0, 9, b'x']).is_err());
        assert!(decode(&[131]).is_err());
    }

    #[test]
    fn encode_decode_round_trip() {
        let value = json!({
            "op": 1,
            "d": 42,
            "nested": {"flag": true, "name": "shard", "none": null},
            "list": [1, 2, 3],
            "big": 175928847299117063u64,
        });

        let encoded = encode_json(&value);
        let decoded = decode_to_json(&encoded).unwrap();

        assert_eq!(decoded["op"], 1);
        assert_eq!(decoded["nested"]["flag"], true);
        assert_eq!(decoded["nested"]["none"], json!(null));
        assert_eq!(decoded["list"], json!([1, 2, 3]));
        assert_eq!(decoded["big"], json!(175_928_847_299_117_063_u64));
    }

    #[test]
    fn empty_array_encodes_as_nil() {
        let encoded = encode_json(&json!([]));
        assert_eq!(decode(&encoded[..]).unwrap(), Term::Nil);
    }
}
