//! Foreign object bridge.
//!
//! Converts host objects into guest structures and guest iteration into host
//! iterables. Host objects are only ever enumerated by listing their keys;
//! the bridge never asks a host object to iterate itself, since the host's
//! native iteration dispatch cannot be trusted from the guest side.

use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use log::debug;
use smallvec::SmallVec;

use crate::component::{FrameIterator, IteratorResult, IteratorStep};
use crate::error::{BodyError, BridgeError, StepError};
use crate::host::{Host, HostError, HostExpr};
use crate::platform;
use crate::symbols::{ITERATOR, SpecialTag, SymbolHandle, SymbolTable};
use crate::value::{ForeignHandle, HostFunction, HostValue, InputSnapshot, PropertyKey};

type KeyList = SmallVec<[Rc<str>; 8]>;
type SharedSource = Rc<RefCell<Box<dyn Iterator<Item = Result<HostValue, BodyError>>>>>;

/// Entry point for host object conversions.
///
/// Holds the host capability (if any) and the symbol table to use; no other
/// state survives between calls.
#[derive(Clone)]
pub struct Bridge {
    host: Option<Rc<dyn Host>>,
    symbols: Rc<SymbolTable>,
}

impl Bridge {
    pub fn new(host: Rc<dyn Host>) -> Self {
        Self {
            host: Some(host),
            symbols: SymbolTable::process(),
        }
    }

    /// Bridge over the host installed on this thread, if any.
    pub fn current() -> Self {
        Self {
            host: platform::current_host(),
            symbols: SymbolTable::process(),
        }
    }

    /// Bridge without a host. Every host operation fails with `Unavailable`.
    pub fn detached() -> Self {
        Self {
            host: None,
            symbols: SymbolTable::process(),
        }
    }

    pub fn with_symbol_table(mut self, symbols: Rc<SymbolTable>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn is_available(&self) -> bool {
        self.host.is_some()
    }

    pub fn symbols(&self) -> &Rc<SymbolTable> {
        &self.symbols
    }

    fn host(&self) -> Result<&Rc<dyn Host>, BridgeError> {
        self.host.as_ref().ok_or(BridgeError::Unavailable)
    }

    /// Own and inherited enumerable string keys, as a `for...in` loop sees them.
    pub fn list_keys(&self, value: &HostValue) -> Result<Vec<String>, BridgeError> {
        let host = self.host()?;
        let Some(handle) = convertible(value, "list_keys") else {
            return Ok(Vec::new());
        };
        let keys = for_in_keys(host.as_ref(), handle)?;
        Ok(keys.iter().map(|key| key.to_string()).collect())
    }

    /// Own enumerable string keys mapped to their values.
    ///
    /// Primitive values are copied; nested objects stay handles.
    pub fn to_mapping(&self, value: &HostValue) -> Result<IndexMap<String, HostValue>, BridgeError> {
        let host = self.host()?;
        let Some(handle) = convertible(value, "to_mapping") else {
            return Ok(IndexMap::new());
        };
        own_mapping(host.as_ref(), handle)
    }

    /// `to_mapping` frozen into an input snapshot.
    pub fn snapshot(&self, value: &HostValue) -> Result<InputSnapshot, BridgeError> {
        Ok(self.to_mapping(value)?.into_iter().collect())
    }

    /// Canonical handle for `Symbol[name]`.
    pub fn canonical_symbol(&self, name: &str) -> Result<SymbolHandle, BridgeError> {
        let host = self.host()?;
        self.symbols.get(host.as_ref(), name)
    }

    /// Canonical handle for one of the renderer's special tags.
    pub fn special_tag(&self, tag: SpecialTag) -> Result<SymbolHandle, BridgeError> {
        let host = self.host()?;
        self.symbols.registered(host.as_ref(), tag.registry_key())
    }

    /// Expose a guest sequence to the host as an iterable object.
    ///
    /// The object has a single method, keyed by the canonical iteration
    /// symbol, which returns a fresh `{ next }` iterator over the shared
    /// source on every call. A failing source surfaces as a host exception
    /// carrying the failure as its cause, after which iteration is over.
    pub fn wrap_as_iterable<I>(&self, source: I) -> Result<ForeignIterable, BridgeError>
    where
        I: IntoIterator<Item = Result<HostValue, BodyError>>,
        I::IntoIter: 'static,
    {
        let host = self.host()?;
        let symbol = self.symbols.get(host.as_ref(), ITERATOR)?;
        let source: SharedSource = Rc::new(RefCell::new(Box::new(source.into_iter().fuse())));
        let weak = Rc::downgrade(host);

        let factory = HostFunction::new("[Symbol.iterator]", move |_this, _args| {
            let host = upgrade(&weak)?;
            let next = HostFunction::new("next", {
                let weak = weak.clone();
                let source = Rc::clone(&source);
                move |_this, _args| {
                    let host = upgrade(&weak)?;
                    next_from_source(host.as_ref(), &source)
                }
            });
            host.evaluate(HostExpr::NewObject(vec![(PropertyKey::string("next"), next.into())]))
        });

        let object = host.evaluate(HostExpr::NewObject(vec![(
            PropertyKey::Symbol(symbol.clone()),
            factory.into(),
        )]))?;
        debug!("[BRIDGE] wrapped guest sequence as host iterable");
        Ok(ForeignIterable { object, symbol })
    }

    /// Hand a generator frame to the host as a native-looking iterator:
    /// `next(props?)`, `return(value?)`, `throw(reason)` and the canonical
    /// iteration method returning the object itself.
    ///
    /// Only synchronous generator frames can be driven this way.
    pub fn expose_iterator(&self, iterator: FrameIterator) -> Result<ForeignIterable, BridgeError> {
        let host = self.host()?;
        let symbol = self.symbols.get(host.as_ref(), ITERATOR)?;
        let iterator = Rc::new(iterator);
        let weak = Rc::downgrade(host);

        let next = HostFunction::new("next", {
            let iterator = Rc::clone(&iterator);
            let weak = weak.clone();
            move |_this, args| {
                let host = upgrade(&weak)?;
                let props = match args.first() {
                    Some(HostValue::Object(handle)) => Some(
                        own_mapping(host.as_ref(), handle)
                            .map_err(bridge_to_host)?
                            .into_iter()
                            .collect(),
                    ),
                    _ => None,
                };
                match iterator.next(props).map_err(step_to_host)? {
                    IteratorStep::Ready(result) => iterator_result(host.as_ref(), result),
                    IteratorStep::Pending(pending) => Err(HostError::new(format!(
                        "TypeError: {} is an async generator and cannot be stepped synchronously",
                        pending.frame_id()
                    ))),
                }
            }
        });
        let return_ = HostFunction::new("return", {
            let iterator = Rc::clone(&iterator);
            let weak = weak.clone();
            move |_this, args| {
                let host = upgrade(&weak)?;
                let value = args.first().cloned().unwrap_or_default();
                let result = iterator.return_(value).map_err(step_to_host)?;
                iterator_result(host.as_ref(), result)
            }
        });
        let throw = HostFunction::new("throw", {
            let iterator = Rc::clone(&iterator);
            move |_this, args| {
                let reason = args.first().cloned().unwrap_or_default();
                Err(step_to_host(iterator.throw_(Box::new(HostThrow(reason)))))
            }
        });
        let this_iterator = HostFunction::new("[Symbol.iterator]", |this, _args| Ok(this.clone()));

        let object = host.evaluate(HostExpr::NewObject(vec![
            (PropertyKey::string("next"), next.into()),
            (PropertyKey::string("return"), return_.into()),
            (PropertyKey::string("throw"), throw.into()),
            (PropertyKey::Symbol(symbol.clone()), this_iterator.into()),
        ]))?;
        debug!("[BRIDGE] exposed {} as host iterator", iterator.id());
        Ok(ForeignIterable { object, symbol })
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("available", &self.is_available())
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

/// A host object usable in the host's own `for...of`.
#[derive(Clone, Debug)]
pub struct ForeignIterable {
    object: HostValue,
    symbol: SymbolHandle,
}

impl ForeignIterable {
    pub fn object(&self) -> &HostValue {
        &self.object
    }

    /// The canonical symbol the iteration method is keyed by.
    pub fn symbol(&self) -> &SymbolHandle {
        &self.symbol
    }

    pub fn into_value(self) -> HostValue {
        self.object
    }
}

/// A value thrown into a frame by the host.
#[derive(Clone, Debug)]
pub struct HostThrow(pub HostValue);

impl fmt::Display for HostThrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thrown by host: {}", self.0.to_display_string())
    }
}

impl Error for HostThrow {}

/// `None` (logged) for values that convert to empty results.
fn convertible<'v>(value: &'v HostValue, operation: &str) -> Option<&'v ForeignHandle> {
    match value {
        HostValue::Object(handle) => Some(handle),
        other => {
            debug!("[BRIDGE] {} skipped conversion of {}", operation, other.type_name());
            None
        }
    }
}

fn for_in_keys(host: &dyn Host, handle: &ForeignHandle) -> Result<KeyList, BridgeError> {
    let unexpected = |found: &HostValue| BridgeError::UnexpectedValue {
        request: "for-in",
        found: found.type_name(),
    };
    match host.evaluate(HostExpr::ForInKeys(handle))? {
        HostValue::List(items) => items
            .into_iter()
            .map(|item| match item {
                HostValue::String(key) => Ok(key),
                other => Err(unexpected(&other)),
            })
            .collect(),
        other => Err(unexpected(&other)),
    }
}

fn own_mapping(host: &dyn Host, handle: &ForeignHandle) -> Result<IndexMap<String, HostValue>, BridgeError> {
    let mut mapping = IndexMap::new();
    for key in for_in_keys(host, handle)? {
        let own = match host.evaluate(HostExpr::HasOwnProperty(handle, &key))? {
            HostValue::Bool(own) => own,
            other => {
                return Err(BridgeError::UnexpectedValue {
                    request: "hasOwnProperty",
                    found: other.type_name(),
                });
            }
        };
        if !own {
            continue;
        }
        let property = PropertyKey::String(Rc::clone(&key));
        let value = host.evaluate(HostExpr::GetProperty(handle, &property))?;
        mapping.insert(key.to_string(), value);
    }
    Ok(mapping)
}

fn next_from_source(host: &dyn Host, source: &SharedSource) -> Result<HostValue, HostError> {
    let item = {
        let mut source = source
            .try_borrow_mut()
            .map_err(|_| HostError::new("TypeError: iterator is already running"))?;
        let item = source.next();
        if matches!(item, Some(Err(_))) {
            *source = Box::new(std::iter::empty());
        }
        item
    };
    let result = match item {
        Some(Ok(value)) => IteratorResult::yielded(value),
        Some(Err(error)) => {
            return Err(HostError::new("iteration source failed").with_cause(error));
        }
        None => IteratorResult::finished(None),
    };
    iterator_result(host, result)
}

fn iterator_result(host: &dyn Host, result: IteratorResult) -> Result<HostValue, HostError> {
    host.evaluate(HostExpr::NewObject(vec![
        (PropertyKey::string("value"), result.value),
        (PropertyKey::string("done"), result.done.into()),
    ]))
}

fn upgrade(host: &Weak<dyn Host>) -> Result<Rc<dyn Host>, HostError> {
    host.upgrade()
        .ok_or_else(|| HostError::new("host object outlived its host"))
}

fn step_to_host(error: StepError) -> HostError {
    HostError::new(error.to_string()).with_cause(Box::new(error))
}

fn bridge_to_host(error: BridgeError) -> HostError {
    HostError::new(error.to_string()).with_cause(Box::new(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryHost;

    fn bridge() -> (Rc<MemoryHost>, Bridge) {
        let host = Rc::new(MemoryHost::new());
        let bridge = Bridge::new(host.clone()).with_symbol_table(Rc::new(SymbolTable::new()));
        (host, bridge)
    }

    #[test]
    fn nullish_values_convert_to_empty_results() {
        let (_host, bridge) = bridge();
        assert!(bridge.list_keys(&HostValue::Null).unwrap().is_empty());
        assert!(bridge.to_mapping(&HostValue::Undefined).unwrap().is_empty());
        assert!(bridge.snapshot(&HostValue::from(3)).unwrap().is_empty());
    }

    #[test]
    fn detached_bridge_is_unavailable() {
        let bridge = Bridge::detached();
        assert!(!bridge.is_available());
        assert!(matches!(bridge.list_keys(&HostValue::Null), Err(BridgeError::Unavailable)));
        assert!(matches!(bridge.canonical_symbol(ITERATOR), Err(BridgeError::Unavailable)));
        assert!(matches!(
            bridge.wrap_as_iterable(Vec::new()),
            Err(BridgeError::Unavailable)
        ));
    }

    #[test]
    fn snapshot_keeps_nested_objects_as_handles() {
        let (host, bridge) = bridge();
        let inner = host.create_object([("x", HostValue::from(1))]);
        let props = host.create_object([("name", HostValue::from("Ann")), ("inner", inner.clone())]);

        let snapshot = bridge.snapshot(&props).unwrap();
        assert_eq!(snapshot.get_str("name"), Some("Ann"));
        assert_eq!(snapshot.get("inner"), Some(&inner));
    }

    #[test]
    fn special_tags_resolve_to_registry_symbols() {
        let (host, bridge) = bridge();
        let portal = bridge.special_tag(SpecialTag::Portal).unwrap();
        assert_eq!(portal, bridge.special_tag(SpecialTag::Portal).unwrap());
        assert_ne!(portal, bridge.special_tag(SpecialTag::Raw).unwrap());
        assert_eq!(host.symbol_lookups(), 2);
    }

    #[test]
    fn host_error_from_source_carries_the_cause() {
        let (host, bridge) = bridge();
        let source: Vec<Result<HostValue, BodyError>> = vec![Ok(1.into()), Err("source broke".into())];
        let iterable = bridge.wrap_as_iterable(source).unwrap();

        let error = host.iterate(iterable.object()).unwrap_err();
        assert_eq!(error.message(), "iteration source failed");
        assert_eq!(error.cause().map(ToString::to_string), Some("source broke".to_string()));
        assert_eq!(host.iterate(iterable.object()).unwrap(), Vec::<HostValue>::new());
    }
}
