//! Tagged-union runtime value, used as the in-memory representation of a
//! field argument and as the wire encoding for the relational backend's
//! BLOB columns (spec §7, §9 "Dynamic field values").
//!
//! File-based backends keep the schema packer's native bytes instead; this
//! type exists so arbitrary field values can round-trip through a SQL BLOB
//! without the relational backend needing to know the DC schema's exact
//! binary layout.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// A tagged-union value. Composite tags carry a `uint32` length prefix and
/// recursively encoded children; `Dict` alternates key/value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    Str(String),
    Blob(Bytes),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

const TAG_NONE: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_U64: u8 = 2;
const TAG_I64: u8 = 3;
const TAG_F64: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_BLOB: u8 = 6;
const TAG_TUPLE: u8 = 7;
const TAG_LIST: u8 = 8;
const TAG_DICT: u8 = 9;

impl Value {
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Value::None => out.put_u8(TAG_NONE),
            Value::Bool(b) => {
                out.put_u8(TAG_BOOL);
                out.put_u8(*b as u8);
            }
            Value::U64(v) => {
                out.put_u8(TAG_U64);
                out.put_u64_le(*v);
            }
            Value::I64(v) => {
                out.put_u8(TAG_I64);
                out.put_i64_le(*v);
            }
            Value::F64(v) => {
                out.put_u8(TAG_F64);
                out.put_f64_le(*v);
            }
            Value::Str(s) => {
                out.put_u8(TAG_STR);
                out.put_u32_le(s.len() as u32);
                out.put_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                out.put_u8(TAG_BLOB);
                out.put_u32_le(b.len() as u32);
                out.put_slice(b);
            }
            Value::Tuple(items) => {
                out.put_u8(TAG_TUPLE);
                out.put_u32_le(items.len() as u32);
                for item in items {
                    item.encode(out);
                }
            }
            Value::List(items) => {
                out.put_u8(TAG_LIST);
                out.put_u32_le(items.len() as u32);
                for item in items {
                    item.encode(out);
                }
            }
            Value::Dict(pairs) => {
                out.put_u8(TAG_DICT);
                out.put_u32_le(pairs.len() as u32);
                for (k, v) in pairs {
                    k.encode(out);
                    v.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(buf: &mut Bytes) -> Result<Value, WireError> {
        if buf.is_empty() {
            return Err(WireError::Truncated {
                expected: 1,
                got: 0,
            });
        }
        let tag = buf.get_u8();
        Ok(match tag {
            TAG_NONE => Value::None,
            TAG_BOOL => Value::Bool(take_u8(buf)? != 0),
            TAG_U64 => Value::U64(take_u64(buf)?),
            TAG_I64 => Value::I64(take_i64(buf)?),
            TAG_F64 => Value::F64(take_f64(buf)?),
            TAG_STR => {
                let len = take_u32(buf)? as usize;
                let bytes = take_n(buf, len)?;
                Value::Str(String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)?)
            }
            TAG_BLOB => {
                let len = take_u32(buf)? as usize;
                Value::Blob(Bytes::from(take_n(buf, len)?))
            }
            TAG_TUPLE => Value::Tuple(decode_seq(buf)?),
            TAG_LIST => Value::List(decode_seq(buf)?),
            TAG_DICT => {
                let count = take_u32(buf)? as usize;
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let k = Value::decode(buf)?;
                    let v = Value::decode(buf)?;
                    pairs.push((k, v));
                }
                Value::Dict(pairs)
            }
            other => return Err(WireError::MalformedValue(other)),
        })
    }
}

fn decode_seq(buf: &mut Bytes) -> Result<Vec<Value>, WireError> {
    let count = take_u32(buf)? as usize;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(Value::decode(buf)?);
    }
    Ok(items)
}

fn take_u8(buf: &mut Bytes) -> Result<u8, WireError> {
    if buf.is_empty() {
        return Err(WireError::Truncated {
            expected: 1,
            got: 0,
        });
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut Bytes) -> Result<u32, WireError> {
    if buf.len() < 4 {
        return Err(WireError::Truncated {
            expected: 4,
            got: buf.len(),
        });
    }
    Ok(buf.get_u32_le())
}

fn take_u64(buf: &mut Bytes) -> Result<u64, WireError> {
    if buf.len() < 8 {
        return Err(WireError::Truncated {
            expected: 8,
            got: buf.len(),
        });
    }
    Ok(buf.get_u64_le())
}

fn take_i64(buf: &mut Bytes) -> Result<i64, WireError> {
    if buf.len() < 8 {
        return Err(WireError::Truncated {
            expected: 8,
            got: buf.len(),
        });
    }
    Ok(buf.get_i64_le())
}

fn take_f64(buf: &mut Bytes) -> Result<f64, WireError> {
    if buf.len() < 8 {
        return Err(WireError::Truncated {
            expected: 8,
            got: buf.len(),
        });
    }
    Ok(buf.get_f64_le())
}

fn take_n(buf: &mut Bytes, n: usize) -> Result<Vec<u8>, WireError> {
    if buf.len() < n {
        return Err(WireError::Truncated {
            expected: n,
            got: buf.len(),
        });
    }
    Ok(buf.split_to(n).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let mut bytes = v.to_bytes();
        let decoded = Value::decode(&mut bytes).unwrap();
        assert_eq!(v, decoded);
        assert!(bytes.is_empty());
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Value::None);
        round_trip(Value::Bool(true));
        round_trip(Value::U64(42));
        round_trip(Value::I64(-7));
        round_trip(Value::F64(1.5));
        round_trip(Value::Str("mickey".into()));
        round_trip(Value::Blob(Bytes::from_static(b"\x00\x01\x02")));
    }

    #[test]
    fn composites_round_trip() {
        round_trip(Value::Tuple(vec![Value::U64(1), Value::Str("a".into())]));
        round_trip(Value::List(vec![Value::U64(1), Value::U64(2)]));
        round_trip(Value::Dict(vec![(
            Value::Str("k".into()),
            Value::U64(1),
        )]));
    }

    #[test]
    fn nested_composites_round_trip() {
        round_trip(Value::List(vec![Value::Tuple(vec![
            Value::U64(7),
            Value::List(vec![Value::Bool(false)]),
        ])]));
    }
}
