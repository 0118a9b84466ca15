//! Runtime values

use std::collections::HashMap;
use std::hash::Hash;

use crate::ConversionError;

/// Wire discriminant written before every encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Unit = 0x00,
    Bool = 0x01,
    U8 = 0x02,
    U16 = 0x03,
    U32 = 0x04,
    U64 = 0x05,
    S8 = 0x06,
    S16 = 0x07,
    S32 = 0x08,
    S64 = 0x09,
    F32 = 0x0A,
    F64 = 0x0B,
    String = 0x0C,
    Bytes = 0x0D,
    Option = 0x0E,
    List = 0x0F,
    Map = 0x10,
    Record = 0x11,
    Variant = 0x12,
    Handle = 0x13,
}

impl ValueKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        let kind = match byte {
            0x00 => ValueKind::Unit,
            0x01 => ValueKind::Bool,
            0x02 => ValueKind::U8,
            0x03 => ValueKind::U16,
            0x04 => ValueKind::U32,
            0x05 => ValueKind::U64,
            0x06 => ValueKind::S8,
            0x07 => ValueKind::S16,
            0x08 => ValueKind::S32,
            0x09 => ValueKind::S64,
            0x0A => ValueKind::F32,
            0x0B => ValueKind::F64,
            0x0C => ValueKind::String,
            0x0D => ValueKind::Bytes,
            0x0E => ValueKind::Option,
            0x0F => ValueKind::List,
            0x10 => ValueKind::Map,
            0x11 => ValueKind::Record,
            0x12 => ValueKind::Variant,
            0x13 => ValueKind::Handle,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Unit => "unit",
            ValueKind::Bool => "bool",
            ValueKind::U8 => "u8",
            ValueKind::U16 => "u16",
            ValueKind::U32 => "u32",
            ValueKind::U64 => "u64",
            ValueKind::S8 => "s8",
            ValueKind::S16 => "s16",
            ValueKind::S32 => "s32",
            ValueKind::S64 => "s64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Option => "option",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Record => "record",
            ValueKind::Variant => "variant",
            ValueKind::Handle => "handle",
        }
    }
}

/// A value that can cross the bridge.
///
/// Records are positional: field names live in the schema, not on the wire.
/// Enum values are a `Variant` whose `tag` is the case's declaration position.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Unit,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Option(Option<Box<Value>>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(Vec<Value>),
    Variant {
        tag: u32,
        payload: Option<Box<Value>>,
    },
    /// Opaque object handle minted by the native handle table.
    Handle(u64),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Unit => ValueKind::Unit,
            Value::Bool(_) => ValueKind::Bool,
            Value::U8(_) => ValueKind::U8,
            Value::U16(_) => ValueKind::U16,
            Value::U32(_) => ValueKind::U32,
            Value::U64(_) => ValueKind::U64,
            Value::S8(_) => ValueKind::S8,
            Value::S16(_) => ValueKind::S16,
            Value::S32(_) => ValueKind::S32,
            Value::S64(_) => ValueKind::S64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Option(_) => ValueKind::Option,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Record(_) => ValueKind::Record,
            Value::Variant { .. } => ValueKind::Variant,
            Value::Handle(_) => ValueKind::Handle,
        }
    }

    /// Build an enum case value with no payload.
    pub fn case(tag: u32) -> Self {
        Value::Variant { tag, payload: None }
    }

    /// Build an enum case value carrying a payload.
    pub fn case_with(tag: u32, payload: impl Into<Value>) -> Self {
        Value::Variant {
            tag,
            payload: Some(Box::new(payload.into())),
        }
    }

    pub fn as_handle(&self) -> Option<u64> {
        match self {
            Value::Handle(id) => Some(*id),
            _ => None,
        }
    }

    /// Take field `index` out of a record value.
    pub fn field(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.get(index),
            _ => None,
        }
    }
}

/// Byte sequence newtype so `Vec<u8>` maps onto `bytes` rather than `list<u8>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes(bytes)
    }
}

/// Conversion of a Rust value into a bridge [`Value`].
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// Conversion of a bridge [`Value`] back into a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

fn mismatch(expected: &str, got: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        expected: expected.to_string(),
        got: got.kind().name().to_string(),
    }
}

macro_rules! primitive_conversions {
    ($($ty:ty => $variant:ident, $name:literal;)*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, ConversionError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch($name, &other)),
                    }
                }
            }
        )*
    };
}

primitive_conversions! {
    bool => Bool, "bool";
    u8 => U8, "u8";
    u16 => U16, "u16";
    u32 => U32, "u32";
    u64 => U64, "u64";
    i8 => S8, "s8";
    i16 => S16, "s16";
    i32 => S32, "s32";
    i64 => S64, "s64";
    f32 => F32, "f32";
    f64 => F64, "f64";
    String => String, "string";
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Unit
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Unit => Ok(()),
            other => Err(mismatch("unit", &other)),
        }
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        Ok(value)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v.0)
    }
}

impl IntoValue for Bytes {
    fn into_value(self) -> Value {
        Value::Bytes(self.0)
    }
}

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bytes(v) => Ok(Bytes(v)),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        Value::Option(self.map(|v| Box::new(v.into_value())))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Option(inner) => inner.map(|v| T::from_value(*v)).transpose(),
            other => Err(mismatch("option", &other)),
        }
    }
}

impl<K, V> IntoValue for HashMap<K, V>
where
    K: IntoValue,
    V: IntoValue,
{
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }
}

impl<K, V> FromValue for HashMap<K, V>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
{
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}
