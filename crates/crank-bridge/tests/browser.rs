//! js-sys host checks; run with `wasm-pack test --headless --firefox -- --features browser`.
#![cfg(all(feature = "browser", target_arch = "wasm32"))]

use std::rc::Rc;

use crank_bridge::platform::browser::{JsHost, from_js};
use crank_bridge::symbols::ITERATOR;
use crank_bridge::{BodyError, Bridge, HostValue, SymbolTable};
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn bridge() -> Bridge {
    Bridge::new(Rc::new(JsHost::new())).with_symbol_table(Rc::new(SymbolTable::new()))
}

#[wasm_bindgen_test]
fn iterator_symbol_is_canonical() {
    let bridge = bridge();
    assert_eq!(
        bridge.canonical_symbol(ITERATOR).unwrap(),
        bridge.canonical_symbol(ITERATOR).unwrap()
    );
}

#[wasm_bindgen_test]
fn mapping_reads_own_enumerable_keys() {
    let object = js_sys::eval("({ a: 1, b: 'two' })").unwrap();
    let mapping = bridge().to_mapping(&from_js(object)).unwrap();
    assert_eq!(mapping.get("a"), Some(&HostValue::from(1)));
    assert_eq!(mapping.get("b"), Some(&HostValue::from("two")));
}

#[wasm_bindgen_test]
fn wrapped_sequence_spreads_in_js() {
    let source: Vec<Result<HostValue, BodyError>> = vec![Ok(1.into()), Ok(2.into())];
    let iterable = bridge().wrap_as_iterable(source).unwrap();
    let spread = js_sys::Function::new_with_args("it", "return [...it].join(',');");
    let joined = spread
        .call1(&JsValue::NULL, &crank_bridge::platform::browser::to_js(iterable.object()))
        .unwrap();
    assert_eq!(joined.as_string().as_deref(), Some("1,2"));
}
