//! Swift host proxies (ios).

use std::collections::BTreeSet;

use super::{banner, camel_case, pascal_case, Code, Target};
use crate::registry::Registry;
use crate::types::{Param, Type, TypeDef};

const KEYWORDS: &[&str] = &[
    "as", "associatedtype", "break", "case", "class", "continue", "default", "defer", "deinit",
    "do", "else", "enum", "extension", "fallthrough", "false", "fileprivate", "for", "func",
    "guard", "if", "import", "in", "init", "inout", "internal", "is", "let", "nil", "open",
    "operator", "private", "protocol", "public", "repeat", "rethrows", "return", "self",
    "static", "struct", "subscript", "super", "switch", "throw", "throws", "true", "try",
    "var", "where", "while",
];

fn ident(name: &str) -> String {
    let name = camel_case(name);
    if KEYWORDS.contains(&name.as_str()) {
        format!("`{name}`")
    } else {
        name
    }
}

fn swift_type(ty: &Type) -> String {
    match ty {
        Type::Bool => "Bool".into(),
        Type::U8 => "UInt8".into(),
        Type::U16 => "UInt16".into(),
        Type::U32 => "UInt32".into(),
        Type::U64 => "UInt64".into(),
        Type::S8 => "Int8".into(),
        Type::S16 => "Int16".into(),
        Type::S32 => "Int32".into(),
        Type::S64 => "Int64".into(),
        Type::F32 => "Float".into(),
        Type::F64 => "Double".into(),
        Type::String => "String".into(),
        Type::Bytes => "Data".into(),
        Type::Option(inner) => format!("{}?", swift_type(inner)),
        Type::List(inner) => format!("[{}]", swift_type(inner)),
        Type::Map { key, value } => format!("[{}: {}]", swift_type(key), swift_type(value)),
        Type::Boxed(inner) => format!("Boxed<{}>", swift_type(inner)),
        Type::Named(name) => pascal_case(name),
        Type::Object(_) => "UInt64".into(),
    }
}

fn swift_signature_type(ty: &Type) -> String {
    match ty {
        Type::Object(name) => pascal_case(name),
        other => swift_type(other),
    }
}

fn params(params: &[Param]) -> Vec<String> {
    params
        .iter()
        .map(|p| format!("{}: {}", ident(&p.name), swift_signature_type(&p.ty)))
        .collect()
}

fn args(params: &[Param]) -> String {
    let items: Vec<String> = params
        .iter()
        .map(|p| {
            let value = match &p.ty {
                Type::Object(_) => format!("{}.handle", ident(&p.name)),
                _ => ident(&p.name),
            };
            format!("({value}, {:?})", p.ty.to_string())
        })
        .collect();
    format!("[{}]", items.join(", "))
}

fn descriptor(ty: &Option<Type>) -> String {
    match ty {
        Some(ty) => format!("{:?}", ty.to_string()),
        None => "nil".into(),
    }
}

fn member(code: &mut Code, prefix: &str, name: &str, params: &[String], returns: &Option<Type>, call: &str) {
    let sig = params.join(", ");
    match returns {
        None => {
            code.open(format!("{prefix}func {name}({sig}) async throws {{"));
            code.line(format!("_ = try await {call}"));
        }
        Some(Type::Object(object)) => {
            let class = pascal_case(object);
            code.open(format!("{prefix}func {name}({sig}) async throws -> {class} {{"));
            code.line(format!("let handle = try await {call} as! UInt64"));
            code.line(format!("return {class}(client: client, handle: handle)"));
        }
        Some(ty) => {
            code.open(format!(
                "{prefix}func {name}({sig}) async throws -> {} {{",
                swift_signature_type(ty)
            ));
            code.line(format!("return try await {call} as! {}", swift_type(ty)));
        }
    }
    code.close("}");
}

pub(super) fn generate(registry: &Registry) -> String {
    let mut code = Code::new("    ");
    for line in banner(registry, Target::Ios) {
        code.line(format!("// {line}"));
    }
    code.blank();
    code.line("import Foundation");
    code.blank();
    code.line(format!("public let schemaName = {:?}", registry.name()));
    code.line(format!("public let schemaVersion: UInt32 = {}", registry.version()));
    code.line(format!("public let interfaceHash = \"{}\"", registry.hash()));
    code.blank();

    runtime_interface(&mut code);
    shapes(&mut code, registry);
    declarations(&mut code, registry);
    functions(&mut code, registry);
    objects(&mut code, registry);
    code.finish()
}

fn runtime_interface(code: &mut Code) {
    code.open("public enum CallTarget: Equatable {");
    code.line("case function(index: UInt32)");
    code.line("case constructor(object: UInt32)");
    code.line("case method(handle: UInt64, index: UInt32)");
    code.line("case release(handle: UInt64)");
    code.close("}");
    code.blank();

    code.line("/// Encodes arguments, carries envelopes and decodes results.");
    code.open("public protocol BridgeClient: AnyObject {");
    code.line("func call(_ target: CallTarget, _ args: [(Any?, String)], returns: String?) async throws -> Any?");
    code.line("func releaseDetached(_ handle: UInt64)");
    code.close("}");
    code.blank();

    code.open("public enum TypeShape {");
    code.line("case record(fields: [(String, String)])");
    code.line("case enumeration(cases: [(String, String?)])");
    code.close("}");
    code.blank();

    code.line("/// Explicit indirection for `box<T>` fields.");
    code.open("public final class Boxed<T> {");
    code.line("public let value: T");
    code.blank();
    code.open("public init(_ value: T) {");
    code.line("self.value = value");
    code.close("}");
    code.close("}");
    code.blank();
}

fn shapes(code: &mut Code, registry: &Registry) {
    if registry.types().is_empty() {
        code.line("public let types: [String: TypeShape] = [:]");
        code.blank();
        return;
    }
    code.open("public let types: [String: TypeShape] = [");
    for def in registry.types() {
        match def {
            TypeDef::Record { name, fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|f| format!("({:?}, {:?})", camel_case(&f.name), f.ty.to_string()))
                    .collect();
                code.line(format!(
                    "{name:?}: .record(fields: [{}]),",
                    fields.join(", ")
                ));
            }
            TypeDef::Enum { name, cases } => {
                let cases: Vec<String> = cases
                    .iter()
                    .map(|c| match &c.payload {
                        Some(ty) => format!("({:?}, {:?})", c.name, ty.to_string()),
                        None => format!("({:?}, nil)", c.name),
                    })
                    .collect();
                code.line(format!(
                    "{name:?}: .enumeration(cases: [{}]),",
                    cases.join(", ")
                ));
            }
            TypeDef::Alias { .. } => {}
        }
    }
    code.close("]");
    code.blank();
}

/// Enums named by some `throws` clause become Swift `Error`s.
fn error_enums(registry: &Registry) -> BTreeSet<&str> {
    let mut out = BTreeSet::new();
    for func in registry.functions() {
        if let Some(err) = &func.throws {
            out.insert(err.as_str());
        }
    }
    for object in registry.objects() {
        if let Some(err) = object.constructor.as_ref().and_then(|c| c.throws.as_ref()) {
            out.insert(err.as_str());
        }
        for method in &object.methods {
            if let Some(err) = &method.throws {
                out.insert(err.as_str());
            }
        }
    }
    out
}

fn declarations(code: &mut Code, registry: &Registry) {
    let errors = error_enums(registry);
    for def in registry.types() {
        match def {
            TypeDef::Record { name, fields } => {
                code.open(format!("public struct {} {{", pascal_case(name)));
                for f in fields {
                    code.line(format!("public var {}: {}", ident(&f.name), swift_type(&f.ty)));
                }
                code.blank();
                let init_params: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}: {}", ident(&f.name), swift_type(&f.ty)))
                    .collect();
                code.open(format!("public init({}) {{", init_params.join(", ")));
                for f in fields {
                    let field = ident(&f.name);
                    code.line(format!("self.{field} = {field}"));
                }
                code.close("}");
                code.close("}");
                code.blank();
            }
            TypeDef::Enum { name, cases } => {
                let conformance = if errors.contains(name.as_str()) {
                    ": Error"
                } else {
                    ""
                };
                code.open(format!("public enum {}{conformance} {{", pascal_case(name)));
                for case in cases {
                    match &case.payload {
                        Some(ty) => code.line(format!(
                            "case {}({})",
                            ident(&case.name),
                            swift_type(ty)
                        )),
                        None => code.line(format!("case {}", ident(&case.name))),
                    }
                }
                code.close("}");
                code.blank();
            }
            TypeDef::Alias { .. } => {}
        }
    }
}

fn functions(code: &mut Code, registry: &Registry) {
    if registry.functions().next().is_none() {
        return;
    }
    code.line("/// Top-level functions of the native core.");
    code.open(format!("public struct {}Api {{", pascal_case(registry.name())));
    code.line("let client: BridgeClient");
    code.blank();
    code.open("public init(client: BridgeClient) {");
    code.line("self.client = client");
    code.close("}");
    for func in registry.functions() {
        code.blank();
        if let Some(err) = &func.throws {
            code.line(format!("/// Throws a `{}` domain error.", pascal_case(err)));
        }
        let call = format!(
            "client.call(.function(index: {}), {}, returns: {})",
            func.index.unwrap_or(0),
            args(&func.params),
            descriptor(&func.returns)
        );
        member(code, "public ", &ident(&func.name), &params(&func.params), &func.returns, &call);
    }
    code.close("}");
    code.blank();
}

fn objects(code: &mut Code, registry: &Registry) {
    for object in registry.objects() {
        let object_index = object.index.unwrap_or(0);
        let class = pascal_case(&object.name);
        code.open(format!("public final class {class} {{"));
        code.line("let client: BridgeClient");
        code.line("public let handle: UInt64");
        code.line("private var released = false");
        code.blank();
        code.open("init(client: BridgeClient, handle: UInt64) {");
        code.line("self.client = client");
        code.line("self.handle = handle");
        code.close("}");
        code.blank();
        code.line("/// Best-effort release when the last reference goes away.");
        code.open("deinit {");
        code.open("if !released {");
        code.line("client.releaseDetached(handle)");
        code.close("}");
        code.close("}");
        code.blank();

        if let Some(ctor) = &object.constructor {
            let mut sig = vec!["client: BridgeClient".to_string()];
            sig.extend(params(&ctor.params));
            code.open(format!(
                "public static func create({}) async throws -> {class} {{",
                sig.join(", ")
            ));
            code.line(format!(
                "let handle = try await client.call(.constructor(object: {object_index}), {}, returns: {:?}) as! UInt64",
                args(&ctor.params),
                Type::object(object.name.clone()).to_string()
            ));
            code.line(format!("return {class}(client: client, handle: handle)"));
            code.close("}");
            code.blank();
        }

        for method in registry.methods(object_index) {
            let call = format!(
                "client.call(.method(handle: handle, index: {}), {}, returns: {})",
                method.index.unwrap_or(0),
                args(&method.params),
                descriptor(&method.returns)
            );
            member(
                code,
                "public ",
                &ident(&method.name),
                &params(&method.params),
                &method.returns,
                &call,
            );
            code.blank();
        }

        code.line("/// Deterministic release; later calls fail with `invalid-handle`.");
        code.open("public func release() async throws {");
        code.open("guard !released else {");
        code.line("return");
        code.close("}");
        code.line("released = true");
        code.line("_ = try await client.call(.release(handle: handle), [], returns: nil)");
        code.close("}");
        code.close("}");
        code.blank();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    #[test]
    fn maps_types() {
        assert_eq!(swift_type(&Type::map(Type::String, Type::list(Type::U64))), "[String: [UInt64]]");
        assert_eq!(swift_type(&Type::boxed(Type::named("node"))), "Boxed<Node>");
        assert_eq!(ident("default"), "`default`");
    }

    #[test]
    fn throws_enums_conform_to_error() {
        let reg = Registry::new(
            parse_schema(
                r#"
                schema demo version 1 {
                    enum demo-error { not-found(string), denied }
                    enum color { red, green }
                    paint: func(c: color) throws demo-error
                }
                "#,
            )
            .unwrap(),
        )
        .unwrap();
        let src = generate(&reg);
        assert!(src.contains("public enum DemoError: Error {\n    case notFound(String)\n    case denied\n}"));
        assert!(src.contains("public enum Color {"));
        assert!(src.contains("public func paint(c: Color) async throws {"));
        assert!(src.contains("_ = try await client.call(.function(index: 0), [(c, \"color\")], returns: nil)"));
    }
}
