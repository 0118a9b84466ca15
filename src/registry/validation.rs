//! Schema-aware checking of decoded values.

use plugbridge_abi::Value;
use thiserror::Error;

use super::Registry;
use crate::types::{Type, TypeDef};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("{path}: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("{path}: record {record} has {expected} fields, got {actual}")]
    FieldCount {
        path: String,
        record: String,
        expected: usize,
        actual: usize,
    },
    #[error("{path}: enum {name} has no case {tag}")]
    UnknownCase { path: String, name: String, tag: u32 },
    #[error("{path}: case {case} payload mismatch")]
    PayloadMismatch { path: String, case: String },
    #[error("{path}: handle {handle} rejected: {reason}")]
    Handle {
        path: String,
        handle: u64,
        reason: String,
    },
}

/// Walks a [`Value`] alongside its declared [`Type`].
///
/// Handles found along the way are passed to a caller-supplied hook so the
/// dispatcher can check them against its handle table.
pub struct TypeChecker<'a> {
    registry: &'a Registry,
}

type HandleHook<'h> = dyn FnMut(u64, &str) -> Result<(), String> + 'h;

impl<'a> TypeChecker<'a> {
    pub(super) fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Structural check only; every handle is accepted.
    pub fn check(&self, value: &Value, ty: &Type) -> Result<(), ValueError> {
        self.check_with(value, ty, "value", &mut |_, _| Ok(()))
    }

    /// Structural check plus `on_handle(id, object)` for every handle.
    pub fn check_with(
        &self,
        value: &Value,
        ty: &Type,
        path: &str,
        on_handle: &mut HandleHook<'_>,
    ) -> Result<(), ValueError> {
        let mut path = path.to_string();
        self.walk(value, ty, &mut path, on_handle)
    }

    fn walk(
        &self,
        value: &Value,
        ty: &Type,
        path: &mut String,
        on_handle: &mut HandleHook<'_>,
    ) -> Result<(), ValueError> {
        match (value, ty) {
            (Value::Bool(_), Type::Bool)
            | (Value::U8(_), Type::U8)
            | (Value::U16(_), Type::U16)
            | (Value::U32(_), Type::U32)
            | (Value::U64(_), Type::U64)
            | (Value::S8(_), Type::S8)
            | (Value::S16(_), Type::S16)
            | (Value::S32(_), Type::S32)
            | (Value::S64(_), Type::S64)
            | (Value::F32(_), Type::F32)
            | (Value::F64(_), Type::F64)
            | (Value::String(_), Type::String)
            | (Value::Bytes(_), Type::Bytes) => Ok(()),
            (Value::Option(option), Type::Option(inner)) => match option.as_deref() {
                Some(item) => self.nested(item, inner, path, "?", on_handle),
                None => Ok(()),
            },
            (Value::List(items), Type::List(inner)) => {
                for (i, item) in items.iter().enumerate() {
                    self.nested(item, inner, path, &format!("[{i}]"), on_handle)?;
                }
                Ok(())
            }
            (Value::Map(entries), Type::Map { key, value: val }) => {
                for (i, (k, v)) in entries.iter().enumerate() {
                    self.nested(k, key, path, &format!("{{key {i}}}"), on_handle)?;
                    self.nested(v, val, path, &format!("{{value {i}}}"), on_handle)?;
                }
                Ok(())
            }
            // box has no wire form of its own
            (value, Type::Boxed(inner)) => self.walk(value, inner, path, on_handle),
            (Value::Handle(handle), Type::Object(object)) => {
                on_handle(*handle, object).map_err(|reason| ValueError::Handle {
                    path: path.clone(),
                    handle: *handle,
                    reason,
                })
            }
            (value, Type::Named(name)) => match self.registry.typedef(name) {
                Some(def) => self.walk_named(value, def, path, on_handle),
                None => Err(mismatch(path, name, value)),
            },
            (value, ty) => Err(mismatch(path, &ty.to_string(), value)),
        }
    }

    fn walk_named(
        &self,
        value: &Value,
        def: &TypeDef,
        path: &mut String,
        on_handle: &mut HandleHook<'_>,
    ) -> Result<(), ValueError> {
        match (def, value) {
            (TypeDef::Record { name, fields }, Value::Record(values)) => {
                if values.len() != fields.len() {
                    return Err(ValueError::FieldCount {
                        path: path.clone(),
                        record: name.clone(),
                        expected: fields.len(),
                        actual: values.len(),
                    });
                }
                for (field, value) in fields.iter().zip(values) {
                    self.nested(value, &field.ty, path, &format!(".{}", field.name), on_handle)?;
                }
                Ok(())
            }
            (TypeDef::Enum { name, cases }, Value::Variant { tag, payload }) => {
                let case = cases.get(*tag as usize).ok_or_else(|| ValueError::UnknownCase {
                    path: path.clone(),
                    name: name.clone(),
                    tag: *tag,
                })?;
                match (&case.payload, payload.as_deref()) {
                    (None, None) => Ok(()),
                    (Some(ty), Some(payload)) => {
                        self.nested(payload, ty, path, &format!("({})", case.name), on_handle)
                    }
                    _ => Err(ValueError::PayloadMismatch {
                        path: path.clone(),
                        case: case.name.clone(),
                    }),
                }
            }
            (TypeDef::Alias { ty, .. }, value) => self.walk(value, ty, path, on_handle),
            (def, value) => Err(mismatch(path, def.name(), value)),
        }
    }

    fn nested(
        &self,
        value: &Value,
        ty: &Type,
        path: &mut String,
        segment: &str,
        on_handle: &mut HandleHook<'_>,
    ) -> Result<(), ValueError> {
        let len = path.len();
        path.push_str(segment);
        let result = self.walk(value, ty, path, on_handle);
        path.truncate(len);
        result
    }
}

fn mismatch(path: &str, expected: &str, value: &Value) -> ValueError {
    ValueError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        actual: value.kind().name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn ledger() -> Registry {
        Registry::new(
            parse_schema(
                r#"
                schema ledger version 1 {
                    record posting { account: string, amount: s64 }
                    enum outcome { ok, failed(string) }
                    object book { }
                    post: func(p: list<posting>, o: outcome, b: option<book>)
                }
                "#,
            )
            .expect("parse"),
        )
        .expect("valid")
    }

    fn posting(account: &str, amount: i64) -> Value {
        Value::Record(vec![Value::String(account.into()), Value::S64(amount)])
    }

    #[test]
    fn accepts_well_typed_values() {
        let reg = ledger();
        let checker = reg.checker();
        let post = reg.function_by_name("post").unwrap();
        checker
            .check(&Value::List(vec![posting("cash", 5)]), &post.params[0].ty)
            .expect("postings");
        checker
            .check(&Value::case_with(1, "boom"), &post.params[1].ty)
            .expect("outcome");
    }

    #[test]
    fn mismatch_reports_path() {
        let reg = ledger();
        let post = reg.function_by_name("post").unwrap();
        let bad = Value::List(vec![posting("cash", 5), Value::Record(vec![
            Value::String("rent".into()),
            Value::S32(5),
        ])]);
        let err = reg.checker().check(&bad, &post.params[0].ty).unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                path: "value[1].amount".into(),
                expected: "s64".into(),
                actual: "s32".into(),
            }
        );
    }

    #[test]
    fn enum_tags_and_payloads_checked() {
        let reg = ledger();
        let ty = Type::named("outcome");
        assert!(matches!(
            reg.checker().check(&Value::case(5), &ty),
            Err(ValueError::UnknownCase { tag: 5, .. })
        ));
        assert!(matches!(
            reg.checker().check(&Value::case(1), &ty),
            Err(ValueError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn handle_hook_sees_object_name() {
        let reg = ledger();
        let mut seen = Vec::new();
        let value = Value::Option(Some(Box::new(Value::Handle(9))));
        reg.checker()
            .check_with(&value, &Type::option(Type::object("book")), "b", &mut |id, object| {
                seen.push((id, object.to_string()));
                Ok(())
            })
            .expect("valid");
        assert_eq!(seen, vec![(9, "book".to_string())]);

        let err = reg
            .checker()
            .check_with(&Value::Handle(4), &Type::object("book"), "b", &mut |_, _| {
                Err("stale".into())
            })
            .unwrap_err();
        assert!(matches!(err, ValueError::Handle { handle: 4, .. }));
    }
}
