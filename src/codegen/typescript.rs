//! TypeScript host proxies (web).

use super::{banner, camel_case, pascal_case, Code, Target};
use crate::registry::Registry;
use crate::types::{Param, Type, TypeDef};

const RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

fn ident(name: &str) -> String {
    let name = camel_case(name);
    if RESERVED.contains(&name.as_str()) {
        format!("{name}_")
    } else {
        name
    }
}

/// Host type in nested positions; object handles stay raw `bigint`s there.
fn ts_type(ty: &Type) -> String {
    match ty {
        Type::Bool => "boolean".into(),
        Type::U8 | Type::U16 | Type::U32 | Type::S8 | Type::S16 | Type::S32 => "number".into(),
        Type::F32 | Type::F64 => "number".into(),
        Type::U64 | Type::S64 => "bigint".into(),
        Type::String => "string".into(),
        Type::Bytes => "Uint8Array".into(),
        Type::Option(inner) => format!("{} | null", ts_type(inner)),
        Type::List(inner) => format!("Array<{}>", ts_type(inner)),
        Type::Map { key, value } => format!("Map<{}, {}>", ts_type(key), ts_type(value)),
        Type::Boxed(inner) => ts_type(inner),
        Type::Named(name) => pascal_case(name),
        Type::Object(_) => "bigint".into(),
    }
}

/// Host type at the top level of a signature, where handles become proxies.
fn ts_signature_type(ty: &Type) -> String {
    match ty {
        Type::Object(name) => pascal_case(name),
        other => ts_type(other),
    }
}

fn params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| format!("{}: {}", ident(&p.name), ts_signature_type(&p.ty)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn args(params: &[Param]) -> String {
    let items: Vec<String> = params
        .iter()
        .map(|p| {
            let value = match &p.ty {
                Type::Object(_) => format!("{}.handle", ident(&p.name)),
                _ => ident(&p.name),
            };
            format!("[{value}, {:?}]", p.ty.to_string())
        })
        .collect();
    format!("[{}]", items.join(", "))
}

fn returns(ty: &Option<Type>) -> (String, String) {
    match ty {
        Some(ty) => (ts_signature_type(ty), format!("{:?}", ty.to_string())),
        None => ("void".into(), "null".into()),
    }
}

/// Body line turning the raw call result into the declared return type.
fn return_statement(code: &mut Code, call: &str, ty: &Option<Type>, client: &str) {
    match ty {
        None => code.line(format!("await {call};")),
        Some(Type::Object(name)) => code.line(format!(
            "return {}.fromHandle({client}, (await {call}) as bigint);",
            pascal_case(name)
        )),
        Some(ty) => code.line(format!("return (await {call}) as {};", ts_type(ty))),
    }
}

pub(super) fn generate(registry: &Registry) -> String {
    let mut code = Code::new("  ");
    code.line("/*");
    for line in banner(registry, Target::Web) {
        code.line(format!(" * {line}"));
    }
    code.line(" */");
    code.blank();

    code.line(format!(
        "export const SCHEMA = {{ name: {:?}, version: {}, hash: \"{}\" }} as const;",
        registry.name(),
        registry.version(),
        registry.hash()
    ));
    code.blank();

    runtime_interface(&mut code);
    shapes(&mut code, registry);
    declarations(&mut code, registry);
    functions(&mut code, registry);
    objects(&mut code, registry);
    code.finish()
}

fn runtime_interface(code: &mut Code) {
    code.open("export type CallTarget =");
    code.line("| { kind: \"function\"; index: number }");
    code.line("| { kind: \"constructor\"; object: number }");
    code.line("| { kind: \"method\"; handle: bigint; index: number }");
    code.line("| { kind: \"release\"; handle: bigint };");
    code.close("");
    code.blank();

    code.line("/** Encodes arguments, carries envelopes and decodes results. */");
    code.open("export interface BridgeClient {");
    code.line("call(");
    code.line("  target: CallTarget,");
    code.line("  args: ReadonlyArray<readonly [unknown, string]>,");
    code.line("  returns: string | null,");
    code.line("): Promise<unknown>;");
    code.line("releaseDetached(handle: bigint): void;");
    code.close("}");
    code.blank();

    code.open("export type TypeShape =");
    code.line("| { kind: \"record\"; fields: ReadonlyArray<readonly [string, string]> }");
    code.line("| { kind: \"enum\"; cases: ReadonlyArray<readonly [string, string | null]> };");
    code.close("");
    code.blank();
}

fn shapes(code: &mut Code, registry: &Registry) {
    code.open("export const TYPES: Readonly<Record<string, TypeShape>> = {");
    for def in registry.types() {
        match def {
            TypeDef::Record { name, fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|f| format!("[{:?}, {:?}]", camel_case(&f.name), f.ty.to_string()))
                    .collect();
                code.line(format!(
                    "{name:?}: {{ kind: \"record\", fields: [{}] }},",
                    fields.join(", ")
                ));
            }
            TypeDef::Enum { name, cases } => {
                let cases: Vec<String> = cases
                    .iter()
                    .map(|c| match &c.payload {
                        Some(ty) => format!("[{:?}, {:?}]", c.name, ty.to_string()),
                        None => format!("[{:?}, null]", c.name),
                    })
                    .collect();
                code.line(format!(
                    "{name:?}: {{ kind: \"enum\", cases: [{}] }},",
                    cases.join(", ")
                ));
            }
            TypeDef::Alias { .. } => {}
        }
    }
    code.close("};");
    code.blank();
}

fn declarations(code: &mut Code, registry: &Registry) {
    for def in registry.types() {
        match def {
            TypeDef::Record { name, fields } => {
                code.open(format!("export interface {} {{", pascal_case(name)));
                for f in fields {
                    code.line(format!("{}: {};", camel_case(&f.name), ts_type(&f.ty)));
                }
                code.close("}");
                code.blank();
            }
            TypeDef::Enum { name, cases } => {
                code.open(format!("export type {} =", pascal_case(name)));
                let last = cases.len().saturating_sub(1);
                for (i, case) in cases.iter().enumerate() {
                    let end = if i == last { ";" } else { "" };
                    match &case.payload {
                        Some(ty) => code.line(format!(
                            "| {{ tag: {:?}; value: {} }}{end}",
                            case.name,
                            ts_type(ty)
                        )),
                        None => code.line(format!("| {{ tag: {:?} }}{end}", case.name)),
                    }
                }
                if cases.is_empty() {
                    code.line("never;");
                }
                code.close("");
                code.blank();
            }
            TypeDef::Alias { .. } => {}
        }
    }
}

fn functions(code: &mut Code, registry: &Registry) {
    for func in registry.functions() {
        let index = func.index.unwrap_or(0);
        let (ret, descriptor) = returns(&func.returns);
        let sig = params(&func.params);
        let sig = if sig.is_empty() {
            "client: BridgeClient".to_string()
        } else {
            format!("client: BridgeClient, {sig}")
        };
        if let Some(err) = &func.throws {
            code.line(format!("/** Rejects with a `{err}` domain error. */"));
        }
        code.open(format!(
            "export async function {}({sig}): Promise<{ret}> {{",
            ident(&func.name)
        ));
        let call = format!(
            "client.call({{ kind: \"function\", index: {index} }}, {}, {descriptor})",
            args(&func.params)
        );
        return_statement(code, &call, &func.returns, "client");
        code.close("}");
        code.blank();
    }
}

fn objects(code: &mut Code, registry: &Registry) {
    if registry.objects().next().is_none() {
        return;
    }
    code.line("/** Best-effort release of proxies the application dropped without `release()`. */");
    code.open(
        "const releaseOnCollect = new FinalizationRegistry<{ client: BridgeClient; handle: bigint }>(",
    );
    code.line("({ client, handle }) => client.releaseDetached(handle),");
    code.close(");");
    code.blank();

    for object in registry.objects() {
        let object_index = object.index.unwrap_or(0);
        let class = pascal_case(&object.name);
        code.open(format!("export class {class} {{"));
        code.line("private released = false;");
        code.blank();
        code.open("private constructor(");
        code.line("private readonly client: BridgeClient,");
        code.line("readonly handle: bigint,");
        code.close(") {");
        code.indent();
        code.line("releaseOnCollect.register(this, { client, handle }, this);");
        code.close("}");
        code.blank();

        code.open(format!(
            "static fromHandle(client: BridgeClient, handle: bigint): {class} {{"
        ));
        code.line(format!("return new {class}(client, handle);"));
        code.close("}");
        code.blank();

        if let Some(ctor) = &object.constructor {
            let sig = params(&ctor.params);
            let sig = if sig.is_empty() {
                "client: BridgeClient".to_string()
            } else {
                format!("client: BridgeClient, {sig}")
            };
            code.open(format!("static async create({sig}): Promise<{class}> {{"));
            code.line(format!(
                "const handle = await client.call({{ kind: \"constructor\", object: {object_index} }}, {}, {:?});",
                args(&ctor.params),
                Type::object(object.name.clone()).to_string()
            ));
            code.line(format!("return new {class}(client, handle as bigint);"));
            code.close("}");
            code.blank();
        }

        for method in registry.methods(object_index) {
            let index = method.index.unwrap_or(0);
            let (ret, descriptor) = returns(&method.returns);
            code.open(format!(
                "async {}({}): Promise<{ret}> {{",
                ident(&method.name),
                params(&method.params)
            ));
            let call = format!(
                "this.client.call({{ kind: \"method\", handle: this.handle, index: {index} }}, {}, {descriptor})",
                args(&method.params)
            );
            return_statement(code, &call, &method.returns, "this.client");
            code.close("}");
            code.blank();
        }

        code.line("/** Deterministic release; later calls on this proxy fail with `invalid-handle`. */");
        code.open("async release(): Promise<void> {");
        code.open("if (this.released) {");
        code.line("return;");
        code.close("}");
        code.line("this.released = true;");
        code.line("releaseOnCollect.unregister(this);");
        code.line("await this.client.call({ kind: \"release\", handle: this.handle }, [], null);");
        code.close("}");
        code.close("}");
        code.blank();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn registry(src: &str) -> Registry {
        Registry::new(parse_schema(src).unwrap()).unwrap()
    }

    #[test]
    fn maps_types() {
        assert_eq!(ts_type(&Type::S64), "bigint");
        assert_eq!(ts_type(&Type::option(Type::list(Type::U8))), "Array<number> | null");
        assert_eq!(ts_type(&Type::map(Type::String, Type::Bytes)), "Map<string, Uint8Array>");
        assert_eq!(ts_signature_type(&Type::object("ledger")), "Ledger");
        assert_eq!(ts_type(&Type::list(Type::object("ledger"))), "Array<bigint>");
    }

    #[test]
    fn reserved_names_escaped() {
        assert_eq!(ident("default"), "default_");
        assert_eq!(ident("from-account"), "fromAccount");
    }

    #[test]
    fn emits_function_wrapper_and_proxy() {
        let src = generate(&registry(
            r#"
            schema demo version 1 {
                add: func(a: s32, b: s32) -> s32
                object counter {
                    constructor()
                    increment: func() -> s32
                }
            }
            "#,
        ));
        assert!(src.contains(
            "export async function add(client: BridgeClient, a: number, b: number): Promise<number> {"
        ));
        assert!(src.contains(
            "return (await client.call({ kind: \"function\", index: 0 }, [[a, \"s32\"], [b, \"s32\"]], \"s32\")) as number;"
        ));
        assert!(src.contains("export class Counter {"));
        assert!(src.contains("static async create(client: BridgeClient): Promise<Counter> {"));
        assert!(src.contains("async increment(): Promise<number> {"));
        assert!(src.contains("async release(): Promise<void> {"));
    }
}
