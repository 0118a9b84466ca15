//! Native-side export shims (Rust source).

use super::{banner, constructor_symbol, function_symbol, method_symbol, snake_case, Code, Target};
use crate::registry::Registry;

/// Java package for the generated Kotlin host and its JNI class.
pub(crate) fn android_package(schema: &str) -> String {
    format!("dev.plugbridge.{}", snake_case(schema))
}

pub(crate) const ANDROID_CLASS: &str = "NativeBridge";

/// JNI short-name mangling: `_` becomes `_1`, `.` becomes `_`.
fn jni_escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '_' => out.push_str("_1"),
            '.' | '/' => out.push('_'),
            ';' => out.push_str("_2"),
            '[' => out.push_str("_3"),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c => out.push_str(&format!("_0{:04x}", c as u32)),
        }
    }
    out
}

fn jni_symbol(schema: &str, symbol: &str) -> String {
    format!(
        "Java_{}_{}_{}",
        jni_escape(&android_package(schema)),
        ANDROID_CLASS,
        jni_escape(symbol)
    )
}

/// One exported entry point.
struct Export {
    symbol: String,
    target: String,
    takes_handle: bool,
}

fn exports(registry: &Registry) -> Vec<Export> {
    let schema = registry.name();
    let mut out = Vec::new();
    for func in registry.functions() {
        let index = func.index.unwrap_or(0);
        out.push(Export {
            symbol: function_symbol(schema, index, &func.name),
            target: format!("CallTarget::Function {{ index: {index} }}"),
            takes_handle: false,
        });
    }
    for object in registry.objects() {
        let object_index = object.index.unwrap_or(0);
        if object.constructor.is_some() {
            out.push(Export {
                symbol: constructor_symbol(schema, object_index, &object.name),
                target: format!("CallTarget::Constructor {{ object: {object_index} }}"),
                takes_handle: false,
            });
        }
        for method in registry.methods(object_index) {
            let index = method.index.unwrap_or(0);
            out.push(Export {
                symbol: method_symbol(schema, object_index, &object.name, index, &method.name),
                target: format!("CallTarget::Method {{ handle, index: {index} }}"),
                takes_handle: true,
            });
        }
    }
    out
}

pub(super) fn generate(registry: &Registry, target: Target) -> String {
    let mut code = Code::new("    ");
    for line in banner(registry, target) {
        code.line(format!("// {line}"));
    }
    code.blank();

    prelude(&mut code, registry);
    tables(&mut code, registry);
    install(&mut code);

    let schema = snake_case(registry.name());
    let exports = exports(registry);
    match target {
        Target::Web => web(&mut code, &schema, &exports),
        Target::Android => android(&mut code, registry.name(), &schema, &exports),
        Target::Ios => ios(&mut code, &schema, &exports),
    }
    code.finish()
}

fn prelude(code: &mut Code, registry: &Registry) {
    code.line("use std::sync::OnceLock;");
    code.blank();
    code.line("use plugbridge::abi::{CallEnvelope, CallTarget};");
    code.line("use plugbridge::dispatch::{not_installed, Dispatcher};");
    code.blank();
    code.line(format!("pub const SCHEMA: &str = {:?};", registry.name()));
    code.line(format!("pub const SCHEMA_VERSION: u32 = {};", registry.version()));
    code.line(format!(
        "pub const INTERFACE_HASH: &str = \"{}\";",
        registry.hash()
    ));
    code.blank();
}

fn tables(code: &mut Code, registry: &Registry) {
    code.line("/// `(index, name)` for every exported function.");
    code.open("pub const FUNCTION_TABLE: &[(u32, &str)] = &[");
    for func in registry.functions() {
        code.line(format!("({}, {:?}),", func.index.unwrap_or(0), func.name));
    }
    code.close("];");
    code.blank();

    code.line("/// `(index, name, methods)` for every object type.");
    code.open("pub const OBJECT_TABLES: &[(u32, &str, &[(u32, &str)])] = &[");
    for object in registry.objects() {
        let object_index = object.index.unwrap_or(0);
        let methods: Vec<String> = registry
            .methods(object_index)
            .iter()
            .map(|m| format!("({}, {:?})", m.index.unwrap_or(0), m.name))
            .collect();
        code.line(format!(
            "({object_index}, {:?}, &[{}]),",
            object.name,
            methods.join(", ")
        ));
    }
    code.close("];");
    code.blank();
}

fn install(code: &mut Code) {
    code.line("static DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();");
    code.blank();
    code.line("/// Install the dispatcher behind every export.");
    code.line("///");
    code.line("/// Hands the dispatcher back if its interface hash differs from the one");
    code.line("/// these shims were generated for, or if one is already installed.");
    code.open("pub fn install(dispatcher: Dispatcher) -> Result<(), Dispatcher> {");
    code.open("if dispatcher.registry().hash().to_hex() != INTERFACE_HASH {");
    code.line("return Err(dispatcher);");
    code.close("}");
    code.line("DISPATCHER.set(dispatcher)");
    code.close("}");
    code.blank();

    code.open("fn bridge_call(envelope: &[u8]) -> Vec<u8> {");
    code.open("match DISPATCHER.get() {");
    code.line("Some(dispatcher) => dispatcher.handle_bytes(envelope),");
    code.open("None => {");
    code.line("let call_id = CallEnvelope::from_bytes(envelope).map(|e| e.call_id).unwrap_or(0);");
    code.line("not_installed(call_id)");
    code.close("}");
    code.close("}");
    code.close("}");
    code.blank();

    code.open("fn call(target: CallTarget, args: &[u8]) -> Vec<u8> {");
    code.open("match DISPATCHER.get() {");
    code.line("Some(dispatcher) => dispatcher.call_raw(target, args),");
    code.line("None => not_installed(0),");
    code.close("}");
    code.close("}");
    code.blank();
}

fn web(code: &mut Code, schema: &str, exports: &[Export]) {
    code.line("use wasm_bindgen::prelude::wasm_bindgen;");
    code.blank();

    code.line("#[wasm_bindgen]");
    code.open(format!("pub fn {schema}_bridge_call(envelope: &[u8]) -> Vec<u8> {{"));
    code.line("bridge_call(envelope)");
    code.close("}");
    code.blank();

    for export in exports {
        code.line("#[wasm_bindgen]");
        if export.takes_handle {
            code.open(format!(
                "pub fn {}(handle: u64, args: &[u8]) -> Vec<u8> {{",
                export.symbol
            ));
        } else {
            code.open(format!("pub fn {}(args: &[u8]) -> Vec<u8> {{", export.symbol));
        }
        code.line(format!("call({}, args)", export.target));
        code.close("}");
        code.blank();
    }
}

fn android(code: &mut Code, schema_name: &str, schema: &str, exports: &[Export]) {
    code.line("use jni::objects::{JByteArray, JClass};");
    code.line("use jni::sys::{jbyteArray, jlong};");
    code.line("use jni::JNIEnv;");
    code.blank();

    code.open("fn jni_bytes(env: &mut JNIEnv, output: Vec<u8>) -> jbyteArray {");
    code.line("env.byte_array_from_slice(&output)");
    code.line("    .map(JByteArray::into_raw)");
    code.line("    .unwrap_or(std::ptr::null_mut())");
    code.close("}");
    code.blank();

    let entry = |code: &mut Code, symbol: &str, extra: &str| {
        code.line("#[no_mangle]");
        code.line("#[allow(non_snake_case)]");
        code.open(format!(
            "pub extern \"system\" fn {}<'local>(",
            jni_symbol(schema_name, symbol)
        ));
        code.line("mut env: JNIEnv<'local>,");
        code.line("_class: JClass<'local>,");
        if !extra.is_empty() {
            code.line(extra);
        }
        code.line("args: JByteArray<'local>,");
        code.close(") -> jbyteArray {");
        code.indent();
        code.line("let input = env.convert_byte_array(&args).unwrap_or_default();");
    };

    entry(code, &format!("{schema}_bridge_call"), "");
    code.line("let output = bridge_call(&input);");
    code.line("jni_bytes(&mut env, output)");
    code.close("}");
    code.blank();

    for export in exports {
        let extra = if export.takes_handle { "handle: jlong," } else { "" };
        entry(code, &export.symbol, extra);
        if export.takes_handle {
            code.line("let handle = handle as u64;");
        }
        code.line(format!("let output = call({}, &input);", export.target));
        code.line("jni_bytes(&mut env, output)");
        code.close("}");
        code.blank();
    }
}

fn ios(code: &mut Code, schema: &str, exports: &[Export]) {
    code.line("/// Response bytes owned by Rust until passed back to the free function.");
    code.line("#[repr(C)]");
    code.open("pub struct BridgeBuffer {");
    code.line("pub data: *mut u8,");
    code.line("pub len: usize,");
    code.line("pub capacity: usize,");
    code.close("}");
    code.blank();
    code.open("impl BridgeBuffer {");
    code.open("fn from_vec(bytes: Vec<u8>) -> Self {");
    code.line("let mut bytes = std::mem::ManuallyDrop::new(bytes);");
    code.open("BridgeBuffer {");
    code.line("data: bytes.as_mut_ptr(),");
    code.line("len: bytes.len(),");
    code.line("capacity: bytes.capacity(),");
    code.close("}");
    code.close("}");
    code.close("}");
    code.blank();

    code.open("unsafe fn input<'a>(data: *const u8, len: usize) -> &'a [u8] {");
    code.open("if data.is_null() || len == 0 {");
    code.line("&[]");
    code.close("} else {");
    code.indent();
    code.line("std::slice::from_raw_parts(data, len)");
    code.close("}");
    code.close("}");
    code.blank();

    code.line("/// # Safety");
    code.line("/// `envelope` must point to `len` readable bytes.");
    code.line("#[no_mangle]");
    code.open(format!(
        "pub unsafe extern \"C\" fn {schema}_bridge_call(envelope: *const u8, len: usize) -> BridgeBuffer {{"
    ));
    code.line("BridgeBuffer::from_vec(bridge_call(input(envelope, len)))");
    code.close("}");
    code.blank();

    code.line("/// # Safety");
    code.line("/// `buffer` must come from this library and be freed at most once.");
    code.line("#[no_mangle]");
    code.open(format!(
        "pub unsafe extern \"C\" fn {schema}_bridge_free(buffer: BridgeBuffer) {{"
    ));
    code.open("if !buffer.data.is_null() {");
    code.line("drop(Vec::from_raw_parts(buffer.data, buffer.len, buffer.capacity));");
    code.close("}");
    code.close("}");
    code.blank();

    for export in exports {
        code.line("/// # Safety");
        code.line("/// `args` must point to `len` readable bytes.");
        code.line("#[no_mangle]");
        let handle = if export.takes_handle { "handle: u64, " } else { "" };
        code.open(format!(
            "pub unsafe extern \"C\" fn {}({handle}args: *const u8, len: usize) -> BridgeBuffer {{",
            export.symbol
        ));
        code.line(format!(
            "BridgeBuffer::from_vec(call({}, input(args, len)))",
            export.target
        ));
        code.close("}");
        code.blank();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn counter() -> Registry {
        Registry::new(
            parse_schema(
                r#"
                schema demo version 1 {
                    add: func(a: s32, b: s32) -> s32
                    object counter {
                        constructor()
                        increment: func() -> s32
                    }
                }
                "#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn jni_names_escape_underscores() {
        assert_eq!(jni_escape("demo_fn0_add"), "demo_1fn0_1add");
        assert_eq!(
            jni_symbol("demo", "demo_fn0_add"),
            "Java_dev_plugbridge_demo_NativeBridge_demo_1fn0_1add"
        );
    }

    #[test]
    fn exports_cover_functions_constructors_and_methods() {
        let symbols: Vec<String> = exports(&counter()).into_iter().map(|e| e.symbol).collect();
        assert_eq!(
            symbols,
            vec![
                "demo_fn0_add",
                "demo_obj0_counter_new",
                "demo_obj0_counter_m0_increment",
            ]
        );
    }

    #[test]
    fn ios_shims_are_c_abi() {
        let src = generate(&counter(), Target::Ios);
        assert!(src.contains("pub unsafe extern \"C\" fn demo_fn0_add(args: *const u8, len: usize) -> BridgeBuffer {"));
        assert!(src.contains("pub unsafe extern \"C\" fn demo_obj0_counter_m0_increment(handle: u64, args"));
        assert!(src.contains("fn demo_bridge_free(buffer: BridgeBuffer)"));
        assert!(src.contains("(0, \"counter\", &[(0, \"increment\")]),"));
    }

    #[test]
    fn web_shims_use_wasm_bindgen() {
        let src = generate(&counter(), Target::Web);
        assert!(src.contains("#[wasm_bindgen]\npub fn demo_fn0_add(args: &[u8]) -> Vec<u8> {"));
        assert!(src.contains("call(CallTarget::Method { handle, index: 0 }, args)"));
    }
}
