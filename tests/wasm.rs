#![cfg(all(target_arch = "wasm32", feature = "wasm"))]

use dosload::wasm::{classify_thrown, init_logging, JsModule};
use dosload::{mount_bytes, Arg, CallError, EmulationModule, Value, ValueType};
use js_sys::{Array, Function, Reflect, Uint8Array};
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn get(target: &JsValue, key: &str) -> JsValue {
    Reflect::get(target, &JsValue::from_str(key)).expect("Reflect::get")
}

fn install(module: &JsModule, key: &str, value: &JsValue) {
    Reflect::set(module.object(), &JsValue::from_str(key), value).expect("Reflect::set");
}

/// A module object with a stub `ccall` and a 256-byte heap.
fn stub_module() -> JsModule {
    let module = JsModule::new(JsValue::NULL).expect("module object");
    let ccall = Function::new_with_args(
        "name, ret, types, values",
        "this.last = [name, ret, types.join(','), values.join(',')];
         if (name === 'dosbox_main') { throw 'SimulateInfiniteLoop'; }
         if (name === 'broken') { throw new Error('boom'); }
         return 0;",
    );
    install(&module, "ccall", &ccall);
    install(&module, "HEAPU8", &Uint8Array::new_with_length(256));
    install(&module, "_malloc", &Function::new_with_args("size", "return 64;"));

    // `_free` is called without a receiver; bind it to the record of freed pointers.
    let freed = Array::new();
    install(&module, "freed", &freed);
    install(&module, "_free", &Function::new_with_args("ptr", "this.push(ptr);").bind(&freed));
    module
}

#[wasm_bindgen_test]
fn thrown_sentinel_is_unwind() {
    assert_eq!(
        classify_thrown("dosbox_main", &JsValue::from_str("SimulateInfiniteLoop")),
        CallError::Unwind
    );

    let err: JsValue = js_sys::Error::new("RuntimeError: unreachable").into();
    assert_eq!(
        classify_thrown("dosbox_main", &err),
        CallError::Thrown {
            name: "dosbox_main".into(),
            message: "RuntimeError: unreachable".into(),
        }
    );
}

#[wasm_bindgen_test]
fn ccall_marshals_arguments() {
    let mut module = stub_module();

    let value = module
        .call("extract_zip", ValueType::Number, &[Arg::Number(64.0), Arg::Number(3.0)])
        .unwrap();
    assert_eq!(value, Value::Number(0.0));

    let last = get(module.object(), "last");
    assert_eq!(get(&last, "0").as_string().as_deref(), Some("extract_zip"));
    assert_eq!(get(&last, "1").as_string().as_deref(), Some("number"));
    assert_eq!(get(&last, "2").as_string().as_deref(), Some("number,number"));
    assert_eq!(get(&last, "3").as_string().as_deref(), Some("64,3"));

    module
        .call("dosbox_main", ValueType::Number, &[Arg::Str("GAME.EXE")])
        .unwrap_err();
    let last = get(module.object(), "last");
    assert_eq!(get(&last, "2").as_string().as_deref(), Some("string"));
    assert_eq!(get(&last, "3").as_string().as_deref(), Some("GAME.EXE"));
}

#[wasm_bindgen_test]
fn ccall_errors_are_classified() {
    let mut module = stub_module();

    assert_eq!(
        module.call("dosbox_main", ValueType::Number, &[Arg::Str("GAME.EXE")]),
        Err(CallError::Unwind)
    );
    assert!(matches!(
        module.call("broken", ValueType::Void, &[]),
        Err(CallError::Thrown { message, .. }) if message == "boom"
    ));
}

#[wasm_bindgen_test]
fn mount_copies_into_heap_and_frees() {
    let mut module = stub_module();

    mount_bytes(&mut module, "extract_zip", &[0x50, 0x4B, 0x03]).unwrap();

    let heap: Uint8Array = get(module.object(), "HEAPU8").into();
    assert_eq!(heap.subarray(64, 67).to_vec(), vec![0x50, 0x4B, 0x03]);
    let freed: Array = get(module.object(), "freed").into();
    assert_eq!(freed.length(), 1);
    assert_eq!(freed.get(0).as_f64(), Some(64.0));
}

#[wasm_bindgen_test]
fn logging_can_be_installed_twice() {
    init_logging();
    init_logging();
    tracing::error!("console logging check");
}
