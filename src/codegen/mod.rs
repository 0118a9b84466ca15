//! Binding Generator
//!
//! Emits two artifacts per target from a normalized [`Registry`]:
//! - **native**: Rust export shims around the installed dispatcher, one
//!   symbol per function and per object constructor/method
//! - **host**: typed proxy declarations (TypeScript, Kotlin or Swift) that
//!   call through a `BridgeClient` by dispatch index
//!
//! Output depends only on the registry and the target, so repeated runs are
//! byte-identical.

mod kotlin;
mod native;
mod swift;
mod typescript;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::registry::Registry;
use crate::types::{Type, TypeDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// WebAssembly core, TypeScript host
    Web,
    /// JNI core, Kotlin host
    Android,
    /// C ABI core, Swift host
    Ios,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Web, Target::Android, Target::Ios];

    pub fn parse(name: &str) -> Result<Self, GenerateError> {
        match name {
            "web" => Ok(Target::Web),
            "android" => Ok(Target::Android),
            "ios" => Ok(Target::Ios),
            other => Err(GenerateError::UnsupportedTarget(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Target::Web => "web",
            Target::Android => "android",
            Target::Ios => "ios",
        }
    }

    pub fn host_language(self) -> &'static str {
        match self {
            Target::Web => "typescript",
            Target::Android => "kotlin",
            Target::Ios => "swift",
        }
    }

    fn host_extension(self) -> &'static str {
        match self {
            Target::Web => "ts",
            Target::Android => "kt",
            Target::Ios => "swift",
        }
    }

    /// Primitive types the target's foreign interface cannot carry.
    fn unsupported(self, ty: &Type) -> bool {
        // JNI has no unsigned 64-bit type and nothing wider to widen into
        matches!((self, ty), (Target::Android, Type::U64))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = GenerateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::parse(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("Unsupported target platform {0:?} (expected web, android or ios)")]
    UnsupportedTarget(String),

    #[error("{at}: type {ty} is not representable on target {target}")]
    UnsupportedType {
        ty: String,
        target: Target,
        at: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Suggested file name relative to the output directory.
    pub path: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bindings {
    pub native: GeneratedFile,
    pub host: GeneratedFile,
}

/// Generate native shims and host proxies for one target.
pub fn generate(registry: &Registry, target: Target) -> Result<Bindings, GenerateError> {
    check_representable(registry, target)?;

    let base = snake_case(registry.name());
    let native = GeneratedFile {
        path: format!("{base}_{}_bridge.rs", target.name()),
        contents: native::generate(registry, target),
    };
    let host_contents = match target {
        Target::Web => typescript::generate(registry),
        Target::Android => kotlin::generate(registry),
        Target::Ios => swift::generate(registry),
    };
    let host = GeneratedFile {
        path: format!("{}.{}", pascal_case(registry.name()), target.host_extension()),
        contents: host_contents,
    };

    tracing::debug!(
        schema = registry.name(),
        target = %target,
        native_bytes = native.contents.len(),
        host_bytes = host.contents.len(),
        "generated bindings"
    );
    Ok(Bindings { native, host })
}

fn check_representable(registry: &Registry, target: Target) -> Result<(), GenerateError> {
    fn walk(ty: &Type, target: Target, at: &str) -> Result<(), GenerateError> {
        if target.unsupported(ty) {
            return Err(GenerateError::UnsupportedType {
                ty: ty.to_string(),
                target,
                at: at.to_string(),
            });
        }
        match ty {
            Type::Option(inner) | Type::List(inner) | Type::Boxed(inner) => walk(inner, target, at),
            Type::Map { key, value } => {
                walk(key, target, at)?;
                walk(value, target, at)
            }
            _ => Ok(()),
        }
    }

    for def in registry.types() {
        match def {
            TypeDef::Record { name, fields } => {
                for f in fields {
                    walk(&f.ty, target, &format!("record {name}, field {}", f.name))?;
                }
            }
            TypeDef::Enum { name, cases } => {
                for c in cases {
                    if let Some(ty) = &c.payload {
                        walk(ty, target, &format!("enum {name}, case {}", c.name))?;
                    }
                }
            }
            TypeDef::Alias { .. } => {}
        }
    }
    for func in registry.functions() {
        let at = format!("function {}", func.name);
        for p in &func.params {
            walk(&p.ty, target, &format!("{at}, param {}", p.name))?;
        }
        if let Some(ty) = &func.returns {
            walk(ty, target, &format!("{at}, return"))?;
        }
    }
    for object in registry.objects() {
        if let Some(ctor) = &object.constructor {
            for p in &ctor.params {
                walk(
                    &p.ty,
                    target,
                    &format!("object {}, constructor, param {}", object.name, p.name),
                )?;
            }
        }
        for method in &object.methods {
            let at = format!("object {}, method {}", object.name, method.name);
            for p in &method.params {
                walk(&p.ty, target, &format!("{at}, param {}", p.name))?;
            }
            if let Some(ty) = &method.returns {
                walk(ty, target, &format!("{at}, return"))?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Symbol naming
// ============================================================================

/// `<schema>_fn<index>_<name>`
pub fn function_symbol(schema: &str, index: u32, name: &str) -> String {
    format!("{}_fn{index}_{}", snake_case(schema), snake_case(name))
}

/// `<schema>_obj<index>_<object>_new`
pub fn constructor_symbol(schema: &str, object_index: u32, object: &str) -> String {
    format!(
        "{}_obj{object_index}_{}_new",
        snake_case(schema),
        snake_case(object)
    )
}

/// `<schema>_obj<index>_<object>_m<index>_<method>`
pub fn method_symbol(
    schema: &str,
    object_index: u32,
    object: &str,
    method_index: u32,
    method: &str,
) -> String {
    format!(
        "{}_obj{object_index}_{}_m{method_index}_{}",
        snake_case(schema),
        snake_case(object),
        snake_case(method)
    )
}

pub(crate) fn snake_case(name: &str) -> String {
    name.replace('-', "_")
}

pub(crate) fn pascal_case(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

pub(crate) fn camel_case(name: &str) -> String {
    let pascal = pascal_case(name);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => pascal,
    }
}

/// Generated-file banner lines, without comment markers.
fn banner(registry: &Registry, target: Target) -> Vec<String> {
    vec![
        format!(
            "Generated by plugbridge from schema `{}` version {} for target {}.",
            registry.name(),
            registry.version(),
            target
        ),
        format!("Interface hash: {}", registry.hash()),
        "Do not edit by hand.".to_string(),
    ]
}

/// Indentation-aware text buffer shared by the emitters.
pub(crate) struct Code {
    out: String,
    depth: usize,
    unit: &'static str,
}

impl Code {
    pub(crate) fn new(unit: &'static str) -> Self {
        Self {
            out: String::new(),
            depth: 0,
            unit,
        }
    }

    pub(crate) fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(self.unit);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    pub(crate) fn blank(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    /// Write `text` and indent what follows.
    pub(crate) fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.depth += 1;
    }

    pub(crate) fn indent(&mut self) {
        self.depth += 1;
    }

    /// Dedent and write `text`.
    pub(crate) fn close(&mut self, text: impl AsRef<str>) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    pub(crate) fn finish(mut self) -> String {
        while self.out.ends_with("\n\n") {
            self.out.pop();
        }
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn registry(src: &str) -> Registry {
        Registry::new(parse_schema(src).expect("parse")).expect("valid")
    }

    #[test]
    fn symbol_names_follow_convention() {
        assert_eq!(function_symbol("ledger", 3, "post-transaction"), "ledger_fn3_post_transaction");
        assert_eq!(
            method_symbol("ledger", 0, "ledger", 2, "balance"),
            "ledger_obj0_ledger_m2_balance"
        );
        assert_eq!(constructor_symbol("my-app", 1, "counter"), "my_app_obj1_counter_new");
    }

    #[test]
    fn case_conversions() {
        assert_eq!(pascal_case("ledger-error"), "LedgerError");
        assert_eq!(camel_case("post-transaction"), "postTransaction");
        assert_eq!(camel_case("add"), "add");
        assert_eq!(snake_case("not-found"), "not_found");
    }

    #[test]
    fn unknown_target_rejected() {
        assert_eq!(
            Target::parse("windows-phone"),
            Err(GenerateError::UnsupportedTarget("windows-phone".into()))
        );
        assert_eq!("ios".parse::<Target>(), Ok(Target::Ios));
    }

    #[test]
    fn android_rejects_u64() {
        let reg = registry(
            r#"
            schema s version 1 {
                record stamp { nanos: u64 }
                now: func() -> stamp
            }
            "#,
        );
        let err = generate(&reg, Target::Android).unwrap_err();
        assert_eq!(
            err,
            GenerateError::UnsupportedType {
                ty: "u64".into(),
                target: Target::Android,
                at: "record stamp, field nanos".into(),
            }
        );
        generate(&reg, Target::Web).expect("web carries u64 as bigint");
        generate(&reg, Target::Ios).expect("swift has UInt64");
    }

    #[test]
    fn code_buffer_indents() {
        let mut code = Code::new("  ");
        code.open("a {");
        code.line("b");
        code.close("}");
        code.blank();
        code.blank();
        assert_eq!(code.finish(), "a {\n  b\n}\n");
    }
}
