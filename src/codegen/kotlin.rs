//! Kotlin host proxies (android).

use super::native::{android_package, ANDROID_CLASS};
use super::{
    banner, camel_case, constructor_symbol, function_symbol, method_symbol, pascal_case,
    snake_case, Code, Target,
};
use crate::registry::Registry;
use crate::types::{Param, Type, TypeDef};

const KEYWORDS: &[&str] = &[
    "as", "break", "class", "continue", "do", "else", "false", "for", "fun", "if", "in",
    "interface", "is", "null", "object", "package", "return", "super", "this", "throw", "true",
    "try", "typealias", "typeof", "val", "var", "when", "while",
];

fn ident(name: &str) -> String {
    let name = camel_case(name);
    if KEYWORDS.contains(&name.as_str()) {
        format!("`{name}`")
    } else {
        name
    }
}

/// Unsigned widths widen to the next signed JVM type.
fn kt_type(ty: &Type) -> String {
    match ty {
        Type::Bool => "Boolean".into(),
        Type::S8 => "Byte".into(),
        Type::U8 | Type::S16 => "Short".into(),
        Type::U16 | Type::S32 => "Int".into(),
        // u64 is rejected before emission
        Type::U32 | Type::U64 | Type::S64 => "Long".into(),
        Type::F32 => "Float".into(),
        Type::F64 => "Double".into(),
        Type::String => "String".into(),
        Type::Bytes => "ByteArray".into(),
        Type::Option(inner) => {
            let inner = kt_type(inner);
            if inner.ends_with('?') {
                inner
            } else {
                format!("{inner}?")
            }
        }
        Type::List(inner) => format!("List<{}>", kt_type(inner)),
        Type::Map { key, value } => format!("Map<{}, {}>", kt_type(key), kt_type(value)),
        Type::Boxed(inner) => kt_type(inner),
        Type::Named(name) => pascal_case(name),
        Type::Object(_) => "Long".into(),
    }
}

fn kt_signature_type(ty: &Type) -> String {
    match ty {
        Type::Object(name) => pascal_case(name),
        other => kt_type(other),
    }
}

fn params(params: &[Param]) -> Vec<String> {
    params
        .iter()
        .map(|p| format!("{}: {}", ident(&p.name), kt_signature_type(&p.ty)))
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
            format!("{value} to {:?}", p.ty.to_string())
        })
        .collect();
    format!("listOf({})", items.join(", "))
}

fn descriptor(ty: &Option<Type>) -> String {
    match ty {
        Some(ty) => format!("{:?}", ty.to_string()),
        None => "null".into(),
    }
}

/// Emit a suspend function whose body forwards `call` and converts the result.
fn member(code: &mut Code, name: &str, params: &[String], returns: &Option<Type>, call: &str) {
    let sig = params.join(", ");
    match returns {
        None => {
            code.open(format!("suspend fun {name}({sig}) {{"));
            code.line(call);
            code.close("}");
        }
        Some(Type::Object(object)) => {
            let class = pascal_case(object);
            code.line(format!("suspend fun {name}({sig}): {class} ="));
            code.line(format!("    {class}(client, {call} as Long)"));
        }
        Some(ty) => {
            code.line(format!("suspend fun {name}({sig}): {} =", kt_signature_type(ty)));
            code.line(format!("    {call} as {}", kt_type(ty)));
        }
    }
}

pub(super) fn generate(registry: &Registry) -> String {
    let mut code = Code::new("    ");
    for line in banner(registry, Target::Android) {
        code.line(format!("// {line}"));
    }
    code.line("@file:Suppress(\"unused\", \"FunctionName\")");
    code.blank();
    code.line(format!("package {}", android_package(registry.name())));
    code.blank();
    code.line("import java.util.concurrent.atomic.AtomicBoolean");
    code.blank();

    code.line(format!("const val SCHEMA_NAME = {:?}", registry.name()));
    code.line(format!("const val SCHEMA_VERSION = {}", registry.version()));
    code.line(format!("const val INTERFACE_HASH = \"{}\"", registry.hash()));
    code.blank();

    runtime_interface(&mut code);
    native_bridge(&mut code, registry);
    shapes(&mut code, registry);
    declarations(&mut code, registry);
    functions(&mut code, registry);
    objects(&mut code, registry);
    code.finish()
}

fn runtime_interface(code: &mut Code) {
    code.open("sealed class CallTarget {");
    code.line("data class Function(val index: Int) : CallTarget()");
    code.line("data class Constructor(val objectIndex: Int) : CallTarget()");
    code.line("data class Method(val handle: Long, val index: Int) : CallTarget()");
    code.line("data class Release(val handle: Long) : CallTarget()");
    code.close("}");
    code.blank();

    code.line("/** Encodes arguments, carries envelopes and decodes results. */");
    code.open("interface BridgeClient {");
    code.line("suspend fun call(target: CallTarget, args: List<Pair<Any?, String>>, returns: String?): Any?");
    code.line("fun releaseDetached(handle: Long)");
    code.close("}");
    code.blank();

    code.open("sealed class TypeShape {");
    code.line("data class Record(val fields: List<Pair<String, String>>) : TypeShape()");
    code.line("data class Enum(val cases: List<Pair<String, String?>>) : TypeShape()");
    code.close("}");
    code.blank();
}

fn native_bridge(code: &mut Code, registry: &Registry) {
    let schema = registry.name();
    code.line("/** JNI entry points of the native core. */");
    code.open(format!("object {ANDROID_CLASS} {{"));
    code.open("init {");
    code.line(format!("System.loadLibrary({:?})", snake_case(schema)));
    code.close("}");
    code.blank();
    code.line("@JvmStatic");
    code.line(format!(
        "external fun {}_bridge_call(args: ByteArray): ByteArray",
        snake_case(schema)
    ));
    for func in registry.functions() {
        code.line("@JvmStatic");
        code.line(format!(
            "external fun {}(args: ByteArray): ByteArray",
            function_symbol(schema, func.index.unwrap_or(0), &func.name)
        ));
    }
    for object in registry.objects() {
        let object_index = object.index.unwrap_or(0);
        if object.constructor.is_some() {
            code.line("@JvmStatic");
            code.line(format!(
                "external fun {}(args: ByteArray): ByteArray",
                constructor_symbol(schema, object_index, &object.name)
            ));
        }
        for method in registry.methods(object_index) {
            code.line("@JvmStatic");
            code.line(format!(
                "external fun {}(handle: Long, args: ByteArray): ByteArray",
                method_symbol(
                    schema,
                    object_index,
                    &object.name,
                    method.index.unwrap_or(0),
                    &method.name
                )
            ));
        }
    }
    code.close("}");
    code.blank();
}

fn shapes(code: &mut Code, registry: &Registry) {
    code.open("val TYPES: Map<String, TypeShape> = mapOf(");
    for def in registry.types() {
        match def {
            TypeDef::Record { name, fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{:?} to {:?}", camel_case(&f.name), f.ty.to_string()))
                    .collect();
                code.line(format!(
                    "{name:?} to TypeShape.Record(listOf({})),",
                    fields.join(", ")
                ));
            }
            TypeDef::Enum { name, cases } => {
                let cases: Vec<String> = cases
                    .iter()
                    .map(|c| match &c.payload {
                        Some(ty) => format!("{:?} to {:?}", c.name, ty.to_string()),
                        None => format!("{:?} to null", c.name),
                    })
                    .collect();
                code.line(format!(
                    "{name:?} to TypeShape.Enum(listOf({})),",
                    cases.join(", ")
                ));
            }
            TypeDef::Alias { .. } => {}
        }
    }
    code.close(")");
    code.blank();
}

fn declarations(code: &mut Code, registry: &Registry) {
    for def in registry.types() {
        match def {
            TypeDef::Record { name, fields } => {
                code.open(format!("data class {}(", pascal_case(name)));
                for f in fields {
                    code.line(format!("val {}: {},", ident(&f.name), kt_type(&f.ty)));
                }
                code.close(")");
                code.blank();
            }
            TypeDef::Enum { name, cases } => {
                let class = pascal_case(name);
                code.open(format!("sealed class {class} {{"));
                for case in cases {
                    match &case.payload {
                        Some(ty) => code.line(format!(
                            "data class {}(val value: {}) : {class}()",
                            pascal_case(&case.name),
                            kt_type(ty)
                        )),
                        None => code.line(format!(
                            "object {} : {class}()",
                            pascal_case(&case.name)
                        )),
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
    code.line("/** Top-level functions of the native core. */");
    code.open(format!(
        "class {}Api(private val client: BridgeClient) {{",
        pascal_case(registry.name())
    ));
    let mut first = true;
    for func in registry.functions() {
        if !first {
            code.blank();
        }
        first = false;
        if let Some(err) = &func.throws {
            code.line(format!("/** Fails with a `{err}` domain error. */"));
        }
        let call = format!(
            "client.call(CallTarget.Function({}), {}, {})",
            func.index.unwrap_or(0),
            args(&func.params),
            descriptor(&func.returns)
        );
        member(code, &ident(&func.name), &params(&func.params), &func.returns, &call);
    }
    code.close("}");
    code.blank();
}

fn objects(code: &mut Code, registry: &Registry) {
    for object in registry.objects() {
        let object_index = object.index.unwrap_or(0);
        let class = pascal_case(&object.name);
        code.open(format!("class {class} internal constructor("));
        code.line("private val client: BridgeClient,");
        code.line("val handle: Long,");
        code.close(") : AutoCloseable {");
        code.indent();
        code.line("private val released = AtomicBoolean(false)");
        code.blank();

        if let Some(ctor) = &object.constructor {
            code.open("companion object {");
            let mut sig = vec!["client: BridgeClient".to_string()];
            sig.extend(params(&ctor.params));
            code.line(format!("suspend fun create({}): {class} =", sig.join(", ")));
            code.line(format!(
                "    {class}(client, client.call(CallTarget.Constructor({object_index}), {}, {:?}) as Long)",
                args(&ctor.params),
                Type::object(object.name.clone()).to_string()
            ));
            code.close("}");
            code.blank();
        }

        for method in registry.methods(object_index) {
            let call = format!(
                "client.call(CallTarget.Method(handle, {}), {}, {})",
                method.index.unwrap_or(0),
                args(&method.params),
                descriptor(&method.returns)
            );
            member(
                code,
                &ident(&method.name),
                &params(&method.params),
                &method.returns,
                &call,
            );
            code.blank();
        }

        code.line("/** Deterministic release; later calls fail with `invalid-handle`. */");
        code.open("suspend fun release() {");
        code.open("if (released.compareAndSet(false, true)) {");
        code.line("client.call(CallTarget.Release(handle), listOf(), null)");
        code.close("}");
        code.close("}");
        code.blank();
        code.line("/** Best-effort release without waiting for the native side. */");
        code.open("override fun close() {");
        code.open("if (released.compareAndSet(false, true)) {");
        code.line("client.releaseDetached(handle)");
        code.close("}");
        code.close("}");
        code.close("}");
        code.blank();
    }
}
