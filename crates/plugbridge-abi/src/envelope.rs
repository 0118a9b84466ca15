//! Call/response envelopes and the frames that carry them.
//!
//! ```text
//! frame := magic:"PBRG" version:u8 tag:u8 body
//! ```
//!
//! Arguments and results stay as encoded value bytes inside the envelope so
//! the dispatcher can decode them one parameter at a time.

use std::fmt;

use crate::hash::InterfaceHash;
use crate::wire::{write_bytes, write_str, Cursor, WireError};

pub const FRAME_MAGIC: [u8; 4] = *b"PBRG";
pub const FRAME_VERSION: u8 = 1;

const TAG_HELLO: u8 = 0x01;
const TAG_CALL: u8 = 0x02;
const TAG_RESPONSE: u8 = 0x03;
const TAG_CANCEL: u8 = 0x04;
const TAG_GOODBYE: u8 = 0x05;

/// What a call is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Top-level function by generator-assigned index.
    Function { index: u32 },
    /// Object constructor; mints a new handle.
    Constructor { object: u32 },
    /// Method `index` of the object behind `handle`.
    Method { handle: u64, index: u32 },
    /// Reserved lifecycle call removing `handle` from the handle table.
    Release { handle: u64 },
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Function { index } => write!(f, "fn#{index}"),
            CallTarget::Constructor { object } => write!(f, "obj#{object}.new"),
            CallTarget::Method { handle, index } => write!(f, "handle#{handle}.m#{index}"),
            CallTarget::Release { handle } => write!(f, "handle#{handle}.release"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnvelope {
    pub call_id: u64,
    pub target: CallTarget,
    /// Concatenated encoded argument values, in parameter order.
    pub args: Vec<u8>,
    /// Advisory: the dispatcher checks it before invoking, never after.
    pub cancelled: bool,
}

impl CallEnvelope {
    pub fn new(call_id: u64, target: CallTarget, args: Vec<u8>) -> Self {
        Self {
            call_id,
            target,
            args,
            cancelled: false,
        }
    }
}

/// Failure categories that cross the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ArgumentDecode,
    InvalidHandle,
    Cancelled,
    UnknownTarget,
    /// The implementation faulted (panic) or broke its declared contract.
    Internal,
    /// Domain error: the case name of the function's declared error enum.
    Domain(String),
}

impl ErrorKind {
    fn tag(&self) -> u8 {
        match self {
            ErrorKind::ArgumentDecode => 0x01,
            ErrorKind::InvalidHandle => 0x02,
            ErrorKind::Cancelled => 0x03,
            ErrorKind::UnknownTarget => 0x04,
            ErrorKind::Internal => 0x05,
            ErrorKind::Domain(_) => 0x06,
        }
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, ErrorKind::Domain(_))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ArgumentDecode => f.write_str("argument-decode"),
            ErrorKind::InvalidHandle => f.write_str("invalid-handle"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
            ErrorKind::UnknownTarget => f.write_str("unknown-target"),
            ErrorKind::Internal => f.write_str("internal"),
            ErrorKind::Domain(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    /// Encoded structured payload, passed through untouched.
    pub payload: Option<Vec<u8>>,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Encoded return value (`unit` for void functions).
    Success(Vec<u8>),
    Failure(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub call_id: u64,
    pub outcome: Outcome,
}

impl ResponseEnvelope {
    pub fn success(call_id: u64, value: Vec<u8>) -> Self {
        Self {
            call_id,
            outcome: Outcome::Success(value),
        }
    }

    pub fn failure(call_id: u64, failure: Failure) -> Self {
        Self {
            call_id,
            outcome: Outcome::Failure(failure),
        }
    }
}

/// Unit of exchange on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Hello {
        schema: String,
        version: u32,
        hash: InterfaceHash,
    },
    Call(CallEnvelope),
    Response(ResponseEnvelope),
    Cancel { call_id: u64 },
    Goodbye,
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        out.extend_from_slice(&FRAME_MAGIC);
        out.push(FRAME_VERSION);
        match self {
            Frame::Hello {
                schema,
                version,
                hash,
            } => {
                out.push(TAG_HELLO);
                write_str(&mut out, schema)?;
                out.extend_from_slice(&version.to_le_bytes());
                out.extend_from_slice(hash.as_bytes());
            }
            Frame::Call(call) => {
                out.push(TAG_CALL);
                write_call(&mut out, call)?;
            }
            Frame::Response(response) => {
                out.push(TAG_RESPONSE);
                write_response(&mut out, response)?;
            }
            Frame::Cancel { call_id } => {
                out.push(TAG_CANCEL);
                out.extend_from_slice(&call_id.to_le_bytes());
            }
            Frame::Goodbye => out.push(TAG_GOODBYE),
        }
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        if cursor.read_array::<4>()? != FRAME_MAGIC {
            return Err(WireError::InvalidEncoding("invalid frame magic".to_string()));
        }
        let version = cursor.read_u8()?;
        if version != FRAME_VERSION {
            return Err(WireError::InvalidEncoding(format!(
                "unsupported frame version {version}"
            )));
        }
        let frame = match cursor.read_u8()? {
            TAG_HELLO => Frame::Hello {
                schema: cursor.read_string()?,
                version: cursor.read_u32()?,
                hash: InterfaceHash::from_bytes(cursor.read_array()?),
            },
            TAG_CALL => Frame::Call(read_call(&mut cursor)?),
            TAG_RESPONSE => Frame::Response(read_response(&mut cursor)?),
            TAG_CANCEL => Frame::Cancel {
                call_id: cursor.read_u64()?,
            },
            TAG_GOODBYE => Frame::Goodbye,
            other => {
                return Err(WireError::InvalidEncoding(format!(
                    "unknown frame tag 0x{other:02x}"
                )))
            }
        };
        match cursor.remaining() {
            0 => Ok(frame),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

impl CallEnvelope {
    /// Standalone encoding used by the in-process path (no frame header).
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        write_call(&mut out, self)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let call = read_call(&mut cursor)?;
        match cursor.remaining() {
            0 => Ok(call),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

impl ResponseEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        write_response(&mut out, self)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let response = read_response(&mut cursor)?;
        match cursor.remaining() {
            0 => Ok(response),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

fn write_call(out: &mut Vec<u8>, call: &CallEnvelope) -> Result<(), WireError> {
    out.extend_from_slice(&call.call_id.to_le_bytes());
    out.push(u8::from(call.cancelled));
    match call.target {
        CallTarget::Function { index } => {
            out.push(0x01);
            out.extend_from_slice(&index.to_le_bytes());
        }
        CallTarget::Constructor { object } => {
            out.push(0x02);
            out.extend_from_slice(&object.to_le_bytes());
        }
        CallTarget::Method { handle, index } => {
            out.push(0x03);
            out.extend_from_slice(&handle.to_le_bytes());
            out.extend_from_slice(&index.to_le_bytes());
        }
        CallTarget::Release { handle } => {
            out.push(0x04);
            out.extend_from_slice(&handle.to_le_bytes());
        }
    }
    write_bytes(out, &call.args)
}

fn read_call(cursor: &mut Cursor<'_>) -> Result<CallEnvelope, WireError> {
    let call_id = cursor.read_u64()?;
    let cancelled = match cursor.read_u8()? {
        0 => false,
        1 => true,
        other => {
            return Err(WireError::InvalidEncoding(format!(
                "invalid cancel flag {other}"
            )))
        }
    };
    let target = match cursor.read_u8()? {
        0x01 => CallTarget::Function {
            index: cursor.read_u32()?,
        },
        0x02 => CallTarget::Constructor {
            object: cursor.read_u32()?,
        },
        0x03 => CallTarget::Method {
            handle: cursor.read_u64()?,
            index: cursor.read_u32()?,
        },
        0x04 => CallTarget::Release {
            handle: cursor.read_u64()?,
        },
        other => {
            return Err(WireError::InvalidEncoding(format!(
                "unknown call target 0x{other:02x}"
            )))
        }
    };
    let args = cursor.read_len_prefixed()?.to_vec();
    Ok(CallEnvelope {
        call_id,
        target,
        args,
        cancelled,
    })
}

fn write_response(out: &mut Vec<u8>, response: &ResponseEnvelope) -> Result<(), WireError> {
    out.extend_from_slice(&response.call_id.to_le_bytes());
    match &response.outcome {
        Outcome::Success(value) => {
            out.push(0x00);
            write_bytes(out, value)?;
        }
        Outcome::Failure(failure) => {
            out.push(0x01);
            out.push(failure.kind.tag());
            if let ErrorKind::Domain(name) = &failure.kind {
                write_str(out, name)?;
            }
            write_str(out, &failure.message)?;
            match &failure.payload {
                Some(payload) => {
                    out.push(1);
                    write_bytes(out, payload)?;
                }
                None => out.push(0),
            }
        }
    }
    Ok(())
}

fn read_response(cursor: &mut Cursor<'_>) -> Result<ResponseEnvelope, WireError> {
    let call_id = cursor.read_u64()?;
    let outcome = match cursor.read_u8()? {
        0x00 => Outcome::Success(cursor.read_len_prefixed()?.to_vec()),
        0x01 => {
            let kind = match cursor.read_u8()? {
                0x01 => ErrorKind::ArgumentDecode,
                0x02 => ErrorKind::InvalidHandle,
                0x03 => ErrorKind::Cancelled,
                0x04 => ErrorKind::UnknownTarget,
                0x05 => ErrorKind::Internal,
                0x06 => ErrorKind::Domain(cursor.read_string()?),
                other => {
                    return Err(WireError::InvalidEncoding(format!(
                        "unknown error kind 0x{other:02x}"
                    )))
                }
            };
            let message = cursor.read_string()?;
            let payload = match cursor.read_u8()? {
                0 => None,
                1 => Some(cursor.read_len_prefixed()?.to_vec()),
                other => {
                    return Err(WireError::InvalidEncoding(format!(
                        "invalid payload flag {other}"
                    )))
                }
            };
            Outcome::Failure(Failure {
                kind,
                message,
                payload,
            })
        }
        other => {
            return Err(WireError::InvalidEncoding(format!(
                "unknown outcome 0x{other:02x}"
            )))
        }
    };
    Ok(ResponseEnvelope { call_id, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_failure_keeps_kind_and_payload() {
        let response = ResponseEnvelope::failure(
            9,
            Failure {
                kind: ErrorKind::Domain("unbalanced".into()),
                message: "postings sum to 5".into(),
                payload: Some(vec![0x12, 1, 0, 0, 0, 0]),
            },
        );
        let bytes = Frame::Response(response.clone()).to_bytes().unwrap();
        assert_eq!(Frame::from_bytes(&bytes).unwrap(), Frame::Response(response));
    }

    #[test]
    fn rejects_bad_magic_and_trailing_bytes() {
        let mut bytes = Frame::Goodbye.to_bytes().unwrap();
        bytes.push(0);
        assert_eq!(Frame::from_bytes(&bytes), Err(WireError::TrailingBytes(1)));

        bytes[0] = b'X';
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(WireError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn error_kind_display_matches_schema_names() {
        assert_eq!(ErrorKind::InvalidHandle.to_string(), "invalid-handle");
        assert_eq!(ErrorKind::Domain("not-found".into()).to_string(), "not-found");
    }
}
