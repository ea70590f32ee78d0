//! Browser host backed by `js-sys`.
//!
//! Object and symbol handles carry the `JsValue` itself. Guest functions are
//! turned into real JS functions that forward `this` and their arguments.

use js_sys::{Array, Function, Object, Reflect, Symbol};
use log::trace;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::host::{Host, HostError, HostExpr};
use crate::value::{ForeignHandle, HostFunction, HostValue, PropertyKey};

thread_local! {
    static FOR_IN: Function = Function::new_with_args(
        "target",
        "const keys = []; for (const key in target) keys.push(key); return keys;",
    );
    static BIND_THIS: Function = Function::new_with_args(
        "f",
        "return function (...args) { return f(this, args); };",
    );
}

/// Host evaluating requests directly against the page's JS heap.
#[derive(Debug, Default)]
pub struct JsHost;

impl JsHost {
    pub fn new() -> Self {
        Self
    }
}

impl Host for JsHost {
    fn evaluate(&self, expr: HostExpr<'_>) -> Result<HostValue, HostError> {
        trace!("[HOST] evaluate {}", expr.label());
        match expr {
            HostExpr::ForInKeys(handle) => {
                let keys = FOR_IN
                    .with(|for_in| for_in.call1(&JsValue::NULL, &handle_to_js(handle)))
                    .map_err(host_error)?;
                Ok(from_js(keys))
            }
            HostExpr::HasOwnProperty(handle, key) => {
                let target = handle_to_js(handle);
                let has = Object::has_own(target.unchecked_ref::<Object>(), &JsValue::from_str(key));
                Ok(HostValue::Bool(has))
            }
            HostExpr::GetProperty(handle, key) => {
                let value = Reflect::get(&handle_to_js(handle), &key_to_js(key)).map_err(host_error)?;
                Ok(from_js(value))
            }
            HostExpr::WellKnownSymbol(name) => {
                let constructor = Reflect::get(&js_sys::global(), &JsValue::from_str("Symbol"))
                    .map_err(host_error)?;
                let symbol = Reflect::get(&constructor, &JsValue::from_str(name)).map_err(host_error)?;
                Ok(from_js(symbol))
            }
            HostExpr::RegisteredSymbol(key) => Ok(from_js(Symbol::for_(key).into())),
            HostExpr::NewObject(props) => {
                let object = Object::new();
                for (key, value) in props {
                    Reflect::set(&object, &key_to_js(&key), &to_js(&value)).map_err(host_error)?;
                }
                Ok(from_js(object.into()))
            }
            HostExpr::Call { callee, this, args } => {
                let function = to_js(callee)
                    .dyn_into::<Function>()
                    .map_err(|_| HostError::new(format!("TypeError: {} is not a function", callee.type_name())))?;
                let args: Array = args.iter().map(to_js).collect();
                let result = function.apply(&to_js(this), &args).map_err(host_error)?;
                Ok(from_js(result))
            }
        }
    }
}

fn handle_to_js(handle: &ForeignHandle) -> JsValue {
    handle.downcast_ref::<JsValue>().cloned().unwrap_or(JsValue::UNDEFINED)
}

fn key_to_js(key: &PropertyKey) -> JsValue {
    match key {
        PropertyKey::String(key) => JsValue::from_str(key),
        PropertyKey::Symbol(symbol) => handle_to_js(symbol.raw()),
    }
}

pub fn to_js(value: &HostValue) -> JsValue {
    match value {
        HostValue::Undefined => JsValue::UNDEFINED,
        HostValue::Null => JsValue::NULL,
        HostValue::Bool(b) => JsValue::from_bool(*b),
        HostValue::Number(n) => JsValue::from_f64(*n),
        HostValue::String(s) => JsValue::from_str(s),
        HostValue::Symbol(handle) | HostValue::Object(handle) => handle_to_js(handle),
        HostValue::Function(function) => function_to_js(function),
        HostValue::List(items) => items.iter().map(to_js).collect::<Array>().into(),
    }
}

pub fn from_js(value: JsValue) -> HostValue {
    if value.is_undefined() {
        HostValue::Undefined
    } else if value.is_null() {
        HostValue::Null
    } else if let Some(b) = value.as_bool() {
        HostValue::Bool(b)
    } else if let Some(n) = value.as_f64() {
        HostValue::Number(n)
    } else if let Some(s) = value.as_string() {
        HostValue::String(s.into())
    } else if value.is_symbol() {
        HostValue::Symbol(ForeignHandle::new(value))
    } else if Array::is_array(&value) {
        HostValue::List(value.unchecked_into::<Array>().iter().map(from_js).collect())
    } else {
        HostValue::Object(ForeignHandle::new(value))
    }
}

fn function_to_js(function: &HostFunction) -> JsValue {
    let function = function.clone();
    let callback = Closure::wrap(Box::new(move |this: JsValue, args: Array| -> Result<JsValue, JsValue> {
        let args: Vec<HostValue> = args.iter().map(from_js).collect();
        function
            .call(&from_js(this), &args)
            .map(|value| to_js(&value))
            .map_err(|error| error_to_js(&error))
    }) as Box<dyn FnMut(JsValue, Array) -> Result<JsValue, JsValue>>)
    .into_js_value();
    BIND_THIS
        .with(|bind| bind.call1(&JsValue::NULL, &callback))
        .unwrap_or(JsValue::UNDEFINED)
}

/// A `HostError` thrown into JS, with its cause attached.
fn error_to_js(error: &HostError) -> JsValue {
    let thrown = js_sys::Error::new(error.message());
    if let Some(cause) = error.cause() {
        thrown.set_cause(&JsValue::from_str(&cause.to_string()));
    }
    thrown.into()
}

fn host_error(thrown: JsValue) -> HostError {
    match thrown.dyn_ref::<js_sys::Error>() {
        Some(error) => HostError::new(String::from(error.message())),
        None => HostError::new(format!("{:?}", thrown)),
    }
}
