//! Value codec for field records.
//!
//! Each document field is stored as its own record, so the unit of encoding
//! is a single scalar value: one tag byte followed by the payload.

use crate::error::Error;
use dagdb_proto::Value;

/// Type tag for encoded values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueTag {
    Null = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Bytes = 5,
}

impl TryFrom<u8> for ValueTag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ValueTag::Null),
            1 => Ok(ValueTag::Bool),
            2 => Ok(ValueTag::Int),
            3 => Ok(ValueTag::Float),
            4 => Ok(ValueTag::String),
            5 => Ok(ValueTag::Bytes),
            _ => Err(Error::Deserialization(format!("unknown value tag: {}", value))),
        }
    }
}

/// Encode a scalar value.
///
/// Format: tag (1 byte), then for fixed-width kinds the little-endian payload,
/// and for strings and bytes a 4-byte little-endian length plus content.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    match value {
        Value::Null => buf.push(ValueTag::Null as u8),
        Value::Bool(b) => {
            buf.push(ValueTag::Bool as u8);
            buf.push(u8::from(*b));
        }
        Value::Int(n) => {
            buf.push(ValueTag::Int as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float(f) => {
            buf.push(ValueTag::Float as u8);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::String(s) => {
            buf.push(ValueTag::String as u8);
            write_len_prefixed(&mut buf, s.as_bytes())?;
        }
        Value::Bytes(b) => {
            buf.push(ValueTag::Bytes as u8);
            write_len_prefixed(&mut buf, b)?;
        }
        Value::Doc(_) | Value::Docs(_) => {
            return Err(Error::Serialization(format!(
                "cannot store {} value in a field record",
                value.type_name()
            )));
        }
    }
    Ok(buf)
}

/// Decode a scalar value. The whole slice must be consumed.
pub fn decode_value(data: &[u8]) -> Result<Value, Error> {
    let (&tag, payload) = data
        .split_first()
        .ok_or_else(|| Error::Deserialization("empty value record".into()))?;

    let value = match ValueTag::try_from(tag)? {
        ValueTag::Null => {
            expect_len(payload, 0)?;
            Value::Null
        }
        ValueTag::Bool => {
            expect_len(payload, 1)?;
            Value::Bool(payload[0] != 0)
        }
        ValueTag::Int => Value::Int(i64::from_le_bytes(fixed8(payload)?)),
        ValueTag::Float => Value::Float(f64::from_le_bytes(fixed8(payload)?)),
        ValueTag::String => {
            let bytes = read_len_prefixed(payload)?;
            let s = String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::Deserialization("invalid UTF-8 in string value".into()))?;
            Value::String(s)
        }
        ValueTag::Bytes => Value::Bytes(read_len_prefixed(payload)?.to_vec()),
    };
    Ok(value)
}

/// Encode a list of fields, used to derive content-based document keys.
pub fn encode_fields(fields: &[(String, Value)]) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(fields.len() as u32).to_le_bytes());
    for (name, value) in fields {
        write_len_prefixed(&mut buf, name.as_bytes())?;
        let encoded = encode_value(value)?;
        write_len_prefixed(&mut buf, &encoded)?;
    }
    Ok(buf)
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Serialization("value too long".into()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_len_prefixed(payload: &[u8]) -> Result<&[u8], Error> {
    if payload.len() < 4 {
        return Err(Error::Deserialization("value too short for length".into()));
    }
    let (len_bytes, rest) = payload.split_at(4);
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(len_bytes);
    let len = u32::from_le_bytes(len_buf) as usize;
    expect_len(rest, len)?;
    Ok(rest)
}

fn fixed8(payload: &[u8]) -> Result<[u8; 8], Error> {
    payload
        .try_into()
        .map_err(|_| Error::Deserialization(format!("expected 8 bytes, got {}", payload.len())))
}

fn expect_len(payload: &[u8], len: usize) -> Result<(), Error> {
    if payload.len() != len {
        return Err(Error::Deserialization(format!(
            "expected {} payload bytes, got {}",
            len,
            payload.len()
        )));
    }
    Ok(())
}
