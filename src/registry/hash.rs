//! Interface hash over a normalized schema.
//!
//! Names participate: renaming a field changes the generated bindings, so it
//! has to change the hash too. Declaration order of types does not matter
//! for the wire, but it is part of the input and kept stable by the parser.

use plugbridge_abi::{InterfaceHash, InterfaceHasher};

use crate::types::{Constructor, Function, Schema, Type, TypeDef};

pub(super) fn interface_hash(schema: &Schema) -> InterfaceHash {
    let mut hasher = InterfaceHasher::new();
    hasher
        .tag("schema")
        .str(&schema.name)
        .u32(schema.version);

    for def in &schema.types {
        match def {
            TypeDef::Record { name, fields } => {
                hasher.tag("record").str(name).u32(fields.len() as u32);
                for field in fields {
                    hasher.str(&field.name);
                    hash_type(&mut hasher, &field.ty);
                }
            }
            TypeDef::Enum { name, cases } => {
                hasher.tag("enum").str(name).u32(cases.len() as u32);
                for case in cases {
                    hasher.str(&case.name);
                    match &case.payload {
                        Some(ty) => hash_type(&mut hasher, ty),
                        None => {
                            hasher.tag("none");
                        }
                    }
                }
            }
            // normalized schemas carry no aliases
            TypeDef::Alias { .. } => {}
        }
    }

    for func in &schema.functions {
        hasher.tag("func");
        hash_function(&mut hasher, func);
    }

    for object in &schema.objects {
        hasher
            .tag("object")
            .str(&object.name)
            .u32(object.index.unwrap_or(0));
        match &object.constructor {
            Some(ctor) => hash_constructor(&mut hasher, ctor),
            None => {
                hasher.tag("none");
            }
        }
        hasher.u32(object.methods.len() as u32);
        for method in &object.methods {
            hasher.tag("method");
            hash_function(&mut hasher, method);
        }
    }

    hasher.finish()
}

fn hash_function(hasher: &mut InterfaceHasher, func: &Function) {
    hasher
        .str(&func.name)
        .u32(func.index.unwrap_or(0))
        .u32(func.params.len() as u32);
    for param in &func.params {
        hasher.str(&param.name);
        hash_type(hasher, &param.ty);
    }
    match &func.returns {
        Some(ty) => hash_type(hasher, ty),
        None => {
            hasher.tag("void");
        }
    }
    match &func.throws {
        Some(name) => {
            hasher.tag("throws").str(name);
        }
        None => {
            hasher.tag("none");
        }
    }
}

fn hash_constructor(hasher: &mut InterfaceHasher, ctor: &Constructor) {
    hasher.tag("constructor").u32(ctor.params.len() as u32);
    for param in &ctor.params {
        hasher.str(&param.name);
        hash_type(hasher, &param.ty);
    }
    match &ctor.throws {
        Some(name) => {
            hasher.tag("throws").str(name);
        }
        None => {
            hasher.tag("none");
        }
    }
}

fn hash_type(hasher: &mut InterfaceHasher, ty: &Type) {
    match ty {
        Type::Option(inner) => {
            hasher.tag("option");
            hash_type(hasher, inner);
        }
        Type::List(inner) => {
            hasher.tag("list");
            hash_type(hasher, inner);
        }
        Type::Boxed(inner) => {
            hasher.tag("box");
            hash_type(hasher, inner);
        }
        Type::Map { key, value } => {
            hasher.tag("map");
            hash_type(hasher, key);
            hash_type(hasher, value);
        }
        Type::Named(name) => {
            hasher.tag("named").str(name);
        }
        Type::Object(name) => {
            hasher.tag("own").str(name);
        }
        primitive => {
            hasher.tag(&primitive.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_schema;
    use crate::registry::Registry;

    fn hash(src: &str) -> String {
        Registry::new(parse_schema(src).unwrap())
            .unwrap()
            .hash()
            .to_hex()
    }

    #[test]
    fn alias_spelling_does_not_change_hash() {
        let direct = hash("schema s version 1 { f: func(a: list<string>) }");
        let aliased = hash("schema s version 1 { type names = list<string> f: func(a: names) }");
        assert_eq!(direct, aliased);
    }

    #[test]
    fn signature_changes_change_hash() {
        let base = hash("schema s version 1 { f: func(a: s32) -> s32 }");
        assert_ne!(base, hash("schema s version 1 { f: func(a: s64) -> s32 }"));
        assert_ne!(base, hash("schema s version 1 { f: func(b: s32) -> s32 }"));
        assert_ne!(base, hash("schema s version 1 { f@3: func(a: s32) -> s32 }"));
        assert_ne!(base, hash("schema t version 1 { f: func(a: s32) -> s32 }"));
    }
}
