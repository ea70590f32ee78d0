//! Values crossing the boundary between component bodies and the host.
//!
//! Everything the host hands out is a [`HostValue`]. Primitives are copied
//! across; objects and symbols stay on the host side and are only reachable
//! through an opaque [`ForeignHandle`].

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::host::HostError;
use crate::symbols::SymbolHandle;

/// Opaque reference to an object or symbol living in the host's object space.
///
/// The host decides what sits inside: the in-process host stores an object
/// id, the browser host stores a `JsValue`. Clones share the same reference,
/// equality is reference identity.
#[derive(Clone)]
pub struct ForeignHandle(Rc<dyn Any>);

impl ForeignHandle {
    pub fn new<T: Any>(inner: T) -> Self {
        Self(Rc::new(inner))
    }

    /// Access the host-specific payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignHandle({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

impl PartialEq for ForeignHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

type HostCallback = dyn Fn(&HostValue, &[HostValue]) -> Result<HostValue, HostError>;

/// A guest-side callable handed to the host.
///
/// Once stored on a host object it becomes a host function; when the host
/// invokes it, `this` and the arguments arrive as [`HostValue`]s and an `Err`
/// is rethrown on the host side.
#[derive(Clone)]
pub struct HostFunction {
    name: Rc<str>,
    callback: Rc<HostCallback>,
}

impl HostFunction {
    pub fn new<F>(name: &str, callback: F) -> Self
    where
        F: Fn(&HostValue, &[HostValue]) -> Result<HostValue, HostError> + 'static,
    {
        Self {
            name: name.into(),
            callback: Rc::new(callback),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, this: &HostValue, args: &[HostValue]) -> Result<HostValue, HostError> {
        (self.callback)(this, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFunction({})", self.name)
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.callback, &other.callback)
    }
}

/// A value as seen from the guest side of the host boundary.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    /// A host symbol. Only [`SymbolHandle`]s from the canonical table are
    /// identity-stable; raw symbol values may differ between accesses.
    Symbol(ForeignHandle),
    /// A host object (including host functions and arrays).
    Object(ForeignHandle),
    /// A guest callable on its way to the host.
    Function(HostFunction),
    /// A host array materialized element by element.
    List(Vec<HostValue>),
}

impl HostValue {
    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            HostValue::Undefined
                | HostValue::Null
                | HostValue::Bool(_)
                | HostValue::Number(_)
                | HostValue::String(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ForeignHandle> {
        match self {
            HostValue::Object(handle) => Some(handle),
            _ => None,
        }
    }

    /// Short type label for diagnostics, following the host's `typeof` names.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Symbol(_) => "symbol",
            HostValue::Object(_) => "object",
            HostValue::Function(_) => "function",
            HostValue::List(_) => "array",
        }
    }

    /// Convert value to display string for text interpolation.
    pub fn to_display_string(&self) -> String {
        match self {
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Null => "null".to_string(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Number(n) => n.to_string(),
            HostValue::String(s) => s.to_string(),
            HostValue::Symbol(_) => "Symbol()".to_string(),
            HostValue::Object(_) => "[object Object]".to_string(),
            HostValue::Function(f) => format!("function {}()", f.name()),
            HostValue::List(items) => items
                .iter()
                .map(HostValue::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.into())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value.into())
    }
}

impl From<Rc<str>> for HostValue {
    fn from(value: Rc<str>) -> Self {
        HostValue::String(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<HostFunction> for HostValue {
    fn from(value: HostFunction) -> Self {
        HostValue::Function(value)
    }
}

/// Key of a host object property.
///
/// Symbol keys can only be built from canonical [`SymbolHandle`]s, so a
/// freshly requested (and possibly unstable) symbol never ends up as a key.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyKey {
    String(Rc<str>),
    Symbol(SymbolHandle),
}

impl PropertyKey {
    pub fn string(key: &str) -> Self {
        PropertyKey::String(key.into())
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::String(key) => f.write_str(key),
            PropertyKey::Symbol(symbol) => write!(f, "[{}]", symbol.key()),
        }
    }
}

/// Immutable set of named inputs delivered to a component on one render pass.
///
/// Replaced wholesale every cycle; clones share the same map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputSnapshot(Rc<IndexMap<Rc<str>, HostValue>>);

impl InputSnapshot {
    pub fn new(inputs: IndexMap<Rc<str>, HostValue>) -> Self {
        Self(Rc::new(inputs))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&HostValue> {
        self.0.get(key)
    }

    /// String input, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HostValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|key| key.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.0.iter().map(|(key, value)| (key.as_ref(), value))
    }

    /// True when both snapshots are the very same installed instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<K, V> FromIterator<(K, V)> for InputSnapshot
where
    K: Into<Rc<str>>,
    V: Into<HostValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_clones_share_the_installed_map() {
        let snapshot: InputSnapshot = [("name", "World")].into_iter().collect();
        let clone = snapshot.clone();
        assert!(snapshot.same_instance(&clone));
        assert_eq!(clone.get_str("name"), Some("World"));

        let rebuilt: InputSnapshot = [("name", "World")].into_iter().collect();
        assert_eq!(snapshot, rebuilt);
        assert!(!snapshot.same_instance(&rebuilt));
    }

    #[test]
    fn foreign_handles_compare_by_reference() {
        let a = ForeignHandle::new(7_u32);
        let b = ForeignHandle::new(7_u32);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<u32>(), Some(&7));
        assert!(a.downcast_ref::<String>().is_none());
    }

    #[test]
    fn nullish_and_primitive_classification() {
        assert!(HostValue::Undefined.is_nullish());
        assert!(HostValue::Null.is_nullish());
        assert!(!HostValue::from(0).is_nullish());
        assert!(HostValue::from("x").is_primitive());
        assert!(!HostValue::Object(ForeignHandle::new(())).is_primitive());
        assert_eq!(HostValue::List(vec![1.into(), "a".into()]).to_display_string(), "1,a");
    }
}
