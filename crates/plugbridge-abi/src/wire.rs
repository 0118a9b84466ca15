//! Compact tagged value codec.

use thiserror::Error;

use crate::value::{Value, ValueKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("Unknown value kind 0x{0:02x}")]
    UnknownKind(u8),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Trailing bytes: {0} unread")]
    TrailingBytes(usize),
}

/// Bounds applied while decoding untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Limits {
    pub max_buffer_size: usize,
    pub max_sequence_len: usize,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_size: 16 * 1024 * 1024,
            max_sequence_len: 1_000_000,
            max_depth: 128,
        }
    }
}

/// Encode a single value.
pub fn encode(value: &Value) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// Decode exactly one value using the default limits.
pub fn decode(bytes: &[u8]) -> Result<Value, WireError> {
    decode_with_limits(bytes, &Limits::default())
}

/// Decode exactly one value; trailing bytes are an error.
pub fn decode_with_limits(bytes: &[u8], limits: &Limits) -> Result<Value, WireError> {
    let mut reader = ValueReader::new(bytes, limits)?;
    let value = reader.read_value()?;
    reader.finish()?;
    Ok(value)
}

/// Append the encoding of `value` to `out`.
pub fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<(), WireError> {
    out.push(value.kind() as u8);
    match value {
        Value::Unit => {}
        Value::Bool(v) => out.push(u8::from(*v)),
        Value::U8(v) => out.push(*v),
        Value::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::S8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::S16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::S32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::S64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::F32(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::F64(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::String(s) => write_bytes(out, s.as_bytes())?,
        Value::Bytes(b) => write_bytes(out, b)?,
        Value::Option(inner) => match inner {
            Some(inner) => {
                out.push(1);
                write_value(out, inner)?;
            }
            None => out.push(0),
        },
        Value::List(items) | Value::Record(items) => {
            write_len(out, items.len())?;
            for item in items {
                write_value(out, item)?;
            }
        }
        Value::Map(entries) => {
            write_len(out, entries.len())?;
            for (key, value) in entries {
                write_value(out, key)?;
                write_value(out, value)?;
            }
        }
        Value::Variant { tag, payload } => {
            out.extend_from_slice(&tag.to_le_bytes());
            match payload {
                Some(payload) => {
                    out.push(1);
                    write_value(out, payload)?;
                }
                None => out.push(0),
            }
        }
        Value::Handle(id) => out.extend_from_slice(&id.to_le_bytes()),
    }
    Ok(())
}

pub(crate) fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), WireError> {
    let len = u32::try_from(len)
        .map_err(|_| WireError::LimitExceeded(format!("length {len} exceeds u32")))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

pub(crate) fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), WireError> {
    write_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

pub(crate) fn write_str(out: &mut Vec<u8>, s: &str) -> Result<(), WireError> {
    write_bytes(out, s.as_bytes())
}

/// Sequential reader over a buffer holding one or more encoded values.
///
/// The dispatcher reads call arguments one at a time with this so a bad
/// argument can be reported by position.
pub struct ValueReader<'a> {
    cursor: Cursor<'a>,
    limits: Limits,
}

impl<'a> ValueReader<'a> {
    pub fn new(bytes: &'a [u8], limits: &Limits) -> Result<Self, WireError> {
        if bytes.len() > limits.max_buffer_size {
            return Err(WireError::LimitExceeded(format!(
                "buffer of {} bytes exceeds {}",
                bytes.len(),
                limits.max_buffer_size
            )));
        }
        Ok(Self {
            cursor: Cursor::new(bytes),
            limits: *limits,
        })
    }

    pub fn read_value(&mut self) -> Result<Value, WireError> {
        self.read_at_depth(0)
    }

    pub fn is_eof(&self) -> bool {
        self.cursor.is_eof()
    }

    pub fn finish(self) -> Result<(), WireError> {
        match self.cursor.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }

    fn read_at_depth(&mut self, depth: usize) -> Result<Value, WireError> {
        if depth > self.limits.max_depth {
            return Err(WireError::LimitExceeded(format!(
                "nesting deeper than {}",
                self.limits.max_depth
            )));
        }
        let byte = self.cursor.read_u8()?;
        let kind = ValueKind::from_u8(byte).ok_or(WireError::UnknownKind(byte))?;
        let value = match kind {
            ValueKind::Unit => Value::Unit,
            ValueKind::Bool => match self.cursor.read_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(WireError::InvalidEncoding(format!(
                        "invalid bool byte {other}"
                    )))
                }
            },
            ValueKind::U8 => Value::U8(self.cursor.read_u8()?),
            ValueKind::U16 => Value::U16(u16::from_le_bytes(self.cursor.read_array()?)),
            ValueKind::U32 => Value::U32(self.cursor.read_u32()?),
            ValueKind::U64 => Value::U64(self.cursor.read_u64()?),
            ValueKind::S8 => Value::S8(i8::from_le_bytes(self.cursor.read_array()?)),
            ValueKind::S16 => Value::S16(i16::from_le_bytes(self.cursor.read_array()?)),
            ValueKind::S32 => Value::S32(i32::from_le_bytes(self.cursor.read_array()?)),
            ValueKind::S64 => Value::S64(i64::from_le_bytes(self.cursor.read_array()?)),
            ValueKind::F32 => Value::F32(f32::from_bits(self.cursor.read_u32()?)),
            ValueKind::F64 => Value::F64(f64::from_bits(self.cursor.read_u64()?)),
            ValueKind::String => Value::String(self.cursor.read_string()?),
            ValueKind::Bytes => Value::Bytes(self.cursor.read_len_prefixed()?.to_vec()),
            ValueKind::Option => match self.cursor.read_u8()? {
                0 => Value::Option(None),
                1 => Value::Option(Some(Box::new(self.read_at_depth(depth + 1)?))),
                other => {
                    return Err(WireError::InvalidEncoding(format!(
                        "invalid option presence byte {other}"
                    )))
                }
            },
            ValueKind::List | ValueKind::Record => {
                let count = self.read_count()?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read_at_depth(depth + 1)?);
                }
                if kind == ValueKind::List {
                    Value::List(items)
                } else {
                    Value::Record(items)
                }
            }
            ValueKind::Map => {
                let count = self.read_count()?;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key = self.read_at_depth(depth + 1)?;
                    let value = self.read_at_depth(depth + 1)?;
                    entries.push((key, value));
                }
                Value::Map(entries)
            }
            ValueKind::Variant => {
                let tag = self.cursor.read_u32()?;
                let payload = match self.cursor.read_u8()? {
                    0 => None,
                    1 => Some(Box::new(self.read_at_depth(depth + 1)?)),
                    other => {
                        return Err(WireError::InvalidEncoding(format!(
                            "invalid variant payload byte {other}"
                        )))
                    }
                };
                Value::Variant { tag, payload }
            }
            ValueKind::Handle => Value::Handle(self.cursor.read_u64()?),
        };
        Ok(value)
    }

    fn read_count(&mut self) -> Result<usize, WireError> {
        let count = self.cursor.read_u32()? as usize;
        if count > self.limits.max_sequence_len {
            return Err(WireError::LimitExceeded(format!(
                "sequence of {count} exceeds {}",
                self.limits.max_sequence_len
            )));
        }
        Ok(count)
    }
}

/// Little-endian byte cursor.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if len > self.remaining() {
            return Err(WireError::BufferTooSmall {
                need: self.pos + len,
                have: self.bytes.len(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..self.pos])
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_len_prefixed(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    pub(crate) fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_len_prefixed()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| WireError::InvalidEncoding("invalid UTF-8 string".to_string()))
    }
}
