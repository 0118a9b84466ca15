//! Plugbridge ABI
//!
//! The pieces of the bridge that both sides of the boundary must agree on
//! byte-for-byte:
//!
//! - [`Value`] - the dynamic value model every schema type maps onto
//! - [`wire`] - the compact tagged codec for values
//! - [`envelope`] - call/response envelopes and channel frames
//! - [`hash`] - interface hashes used to detect mismatched bindings
//!
//! ## Value encoding
//!
//! ```text
//! value  := kind:u8 body
//! string := len:u32 utf8*
//! list   := count:u32 value*
//! record := count:u32 value*          (positional fields)
//! variant:= tag:u32 has_payload:u8 value?
//! ```
//!
//! All integers are little-endian.

pub mod envelope;
pub mod hash;
mod value;
pub mod wire;

pub use envelope::{
    CallEnvelope, CallTarget, ErrorKind, Failure, Frame, Outcome, ResponseEnvelope,
};
pub use hash::{InterfaceHash, InterfaceHasher};
pub use value::{Bytes, FromValue, IntoValue, Value, ValueKind};
pub use wire::{decode, decode_with_limits, encode, Limits, ValueReader, WireError};

use thiserror::Error;

/// Error converting between a [`Value`] and a Rust type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("missing field {0}")]
    MissingField(String),

    #[error("unknown variant tag {tag} for {type_name}")]
    UnknownTag { type_name: String, tag: u32 },

    #[error("integer {value} out of range for {target}")]
    OutOfRange { value: String, target: &'static str },
}
