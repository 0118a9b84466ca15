//! Interface Descriptor Model
//!
//! The declarative description of what a native core exports:
//! - **Records** - named fields, positional on the wire
//! - **Enums** - tagged cases with an optional payload each
//! - **Functions** - ordered typed params, optional return, optional error enum
//! - **Objects** - opaque handles with a constructor and methods
//!
//! Everything derives `Serialize`/`Deserialize` so a schema can be written
//! as JSON as well as in the text format handled by [`crate::parser`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// A complete interface description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name; prefixes every generated symbol.
    pub name: String,
    /// Description format version.
    pub version: u32,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub objects: Vec<ObjectDef>,
}

impl Schema {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            types: Vec::new(),
            functions: Vec::new(),
            objects: Vec::new(),
        }
    }

    pub fn add_type(&mut self, typedef: TypeDef) {
        self.types.push(typedef);
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn add_object(&mut self, object: ObjectDef) {
        self.objects.push(object);
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name() == name)
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_object(&self, name: &str) -> Option<&ObjectDef> {
        self.objects.iter().find(|o| o.name == name)
    }
}

// ============================================================================
// Functions and Objects
// ============================================================================

/// A function or method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Pinned dispatch index (`@N`); assigned during normalization if absent.
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub params: Vec<Param>,
    /// `None` for void.
    #[serde(default)]
    pub returns: Option<Type>,
    /// Name of the enum listing this function's domain errors.
    #[serde(default)]
    pub throws: Option<String>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
            params: Vec::new(),
            returns: None,
            throws: None,
        }
    }

    pub fn with_signature(
        name: impl Into<String>,
        params: Vec<Param>,
        returns: Option<Type>,
    ) -> Self {
        Self {
            name: name.into(),
            index: None,
            params,
            returns,
            throws: None,
        }
    }

    pub fn at(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn throws(mut self, error_enum: impl Into<String>) -> Self {
        self.throws = Some(error_enum.into());
        self
    }

    pub fn is_fallible(&self) -> bool {
        self.throws.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// `constructor(params) throws e`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constructor {
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub throws: Option<String>,
}

/// An object type: instances live in the native handle table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDef {
    pub name: String,
    #[serde(default)]
    pub index: Option<u32>,
    /// Objects without a constructor can only be minted by functions.
    #[serde(default)]
    pub constructor: Option<Constructor>,
    #[serde(default)]
    pub methods: Vec<Function>,
}

impl ObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
            constructor: None,
            methods: Vec::new(),
        }
    }

    pub fn with_constructor(mut self, params: Vec<Param>) -> Self {
        self.constructor = Some(Constructor {
            params,
            throws: None,
        });
        self
    }

    pub fn with_method(mut self, method: Function) -> Self {
        self.methods.push(method);
        self
    }
}

// ============================================================================
// TypeDef - Named Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDef {
    /// `type foo = bar`
    Alias { name: String, ty: Type },

    /// `record foo { field: type, ... }`
    Record { name: String, fields: Vec<Field> },

    /// `enum foo { case, case(payload), ... }`
    Enum { name: String, cases: Vec<Case> },
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Alias { name, .. } => name,
            TypeDef::Record { name, .. } => name,
            TypeDef::Enum { name, .. } => name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeDef::Alias { .. } => "alias",
            TypeDef::Record { .. } => "record",
            TypeDef::Enum { .. } => "enum",
        }
    }

    pub fn alias(name: impl Into<String>, ty: Type) -> Self {
        TypeDef::Alias {
            name: name.into(),
            ty,
        }
    }

    pub fn record(name: impl Into<String>, fields: Vec<Field>) -> Self {
        TypeDef::Record {
            name: name.into(),
            fields,
        }
    }

    pub fn enumeration(name: impl Into<String>, cases: Vec<Case>) -> Self {
        TypeDef::Enum {
            name: name.into(),
            cases,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Case {
    pub name: String,
    #[serde(default)]
    pub payload: Option<Type>,
}

impl Case {
    pub fn new(name: impl Into<String>, payload: Option<Type>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn unit(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }
}

// ============================================================================
// Type - Type References
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Bool,
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    F32,
    F64,
    String,
    Bytes,

    Option(Box<Type>),
    List(Box<Type>),
    Map { key: Box<Type>, value: Box<Type> },
    /// Explicit indirection; the only way besides `option` and objects for
    /// a record or enum to contain itself.
    Boxed(Box<Type>),

    /// Reference to a record, enum or alias.
    Named(String),
    /// Handle to an object instance.
    Object(String),
}

impl Type {
    pub fn option(inner: Type) -> Self {
        Type::Option(Box::new(inner))
    }

    pub fn list(inner: Type) -> Self {
        Type::List(Box::new(inner))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Type::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn boxed(inner: Type) -> Self {
        Type::Boxed(Box::new(inner))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Type::Named(name.into())
    }

    pub fn object(name: impl Into<String>) -> Self {
        Type::Object(name.into())
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            Type::Option(_)
                | Type::List(_)
                | Type::Map { .. }
                | Type::Boxed(_)
                | Type::Named(_)
                | Type::Object(_)
        )
    }

    /// Allowed as a map key.
    pub fn is_hashable_primitive(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::U8
                | Type::U16
                | Type::U32
                | Type::U64
                | Type::S8
                | Type::S16
                | Type::S32
                | Type::S64
                | Type::String
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => f.write_str("bool"),
            Type::U8 => f.write_str("u8"),
            Type::U16 => f.write_str("u16"),
            Type::U32 => f.write_str("u32"),
            Type::U64 => f.write_str("u64"),
            Type::S8 => f.write_str("s8"),
            Type::S16 => f.write_str("s16"),
            Type::S32 => f.write_str("s32"),
            Type::S64 => f.write_str("s64"),
            Type::F32 => f.write_str("f32"),
            Type::F64 => f.write_str("f64"),
            Type::String => f.write_str("string"),
            Type::Bytes => f.write_str("bytes"),
            Type::Option(inner) => write!(f, "option<{inner}>"),
            Type::List(inner) => write!(f, "list<{inner}>"),
            Type::Map { key, value } => write!(f, "map<{key}, {value}>"),
            Type::Boxed(inner) => write!(f, "box<{inner}>"),
            Type::Named(name) => f.write_str(name),
            Type::Object(name) => write!(f, "own<{name}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_text_format() {
        let ty = Type::map(Type::String, Type::list(Type::option(Type::named("posting"))));
        assert_eq!(ty.to_string(), "map<string, list<option<posting>>>");
        assert_eq!(Type::object("ledger").to_string(), "own<ledger>");
    }

    #[test]
    fn floats_and_bytes_are_not_keys() {
        assert!(Type::S64.is_hashable_primitive());
        assert!(!Type::F64.is_hashable_primitive());
        assert!(!Type::Bytes.is_hashable_primitive());
        assert!(Type::Bytes.is_primitive());
    }

    #[test]
    fn schema_json_round_trip() {
        let mut schema = Schema::new("math", 1);
        schema.add_function(Function::with_signature(
            "add",
            vec![Param::new("a", Type::S32), Param::new("b", Type::S32)],
            Some(Type::S32),
        ));
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
        assert!(back.find_function("add").is_some());
    }
}
