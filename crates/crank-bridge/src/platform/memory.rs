//! In-process host object space.
//!
//! MemoryHost models the parts of a JavaScript heap the bridge relies on:
//! objects with prototype chains, enumerable and hidden properties, callable
//! objects, well-known and registry symbols. It also runs the host's own
//! `for...of` loop so tests can check that values handed to the host are
//! usable there.
//!
//! With [`MemoryHost::with_unstable_symbols`] every symbol read returns a
//! freshly minted handle, like a proxy layer that wraps the same underlying
//! symbol in a new object on each access.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use log::trace;
use smallvec::SmallVec;

use crate::host::{Host, HostError, HostExpr};
use crate::value::{ForeignHandle, HostFunction, HostValue, PropertyKey};

const WELL_KNOWN_SYMBOLS: [&str; 5] = [
    "iterator",
    "asyncIterator",
    "hasInstance",
    "toPrimitive",
    "toStringTag",
];

/// Identity of a symbol inside the host, independent of the handle that
/// carries it across the boundary.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SymbolId {
    WellKnown(Rc<str>),
    Registered(Rc<str>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Slot {
    String(Rc<str>),
    Symbol(SymbolId),
}

thread_local! {
    static NEXT_HOST_ID: Cell<u64> = const { Cell::new(1) };
}

/// Payload of object handles minted by a host.
#[derive(Debug)]
struct ObjectRef {
    host: u64,
    index: usize,
}

#[derive(Debug)]
struct Property {
    value: HostValue,
    enumerable: bool,
}

#[derive(Default)]
struct ObjectData {
    proto: Option<usize>,
    props: IndexMap<Slot, Property>,
    call: Option<HostFunction>,
}

pub struct MemoryHost {
    id: u64,
    objects: RefCell<Vec<ObjectData>>,
    symbols: RefCell<HashMap<SymbolId, ForeignHandle>>,
    unstable_symbols: bool,
    evaluations: Cell<u64>,
    symbol_lookups: Cell<u64>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        let id = NEXT_HOST_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        Self {
            id,
            objects: RefCell::default(),
            symbols: RefCell::default(),
            unstable_symbols: false,
            evaluations: Cell::new(0),
            symbol_lookups: Cell::new(0),
        }
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new symbol handle on every symbol read.
    pub fn with_unstable_symbols(mut self) -> Self {
        self.unstable_symbols = true;
        self
    }

    /// Number of `evaluate` calls served so far.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.get()
    }

    /// Number of `Symbol[name]` / `Symbol.for(key)` reads served so far.
    pub fn symbol_lookups(&self) -> u64 {
        self.symbol_lookups.get()
    }

    /// `{ key: value, ... }`
    pub fn create_object<'a>(&self, props: impl IntoIterator<Item = (&'a str, HostValue)>) -> HostValue {
        self.build_object(None, props)
    }

    /// `Object.create(proto)` followed by the given assignments.
    pub fn create_object_with_proto<'a>(
        &self,
        proto: &HostValue,
        props: impl IntoIterator<Item = (&'a str, HostValue)>,
    ) -> Result<HostValue, HostError> {
        let proto = self.object_id(proto)?;
        Ok(self.build_object(Some(proto), props))
    }

    /// `target[key] = value`
    pub fn set(&self, target: &HostValue, key: &str, value: HostValue) -> Result<(), HostError> {
        self.define(target, Slot::String(key.into()), value, true)
    }

    /// `Object.defineProperty(target, key, { value, enumerable: false })`
    pub fn define_hidden(&self, target: &HostValue, key: &str, value: HostValue) -> Result<(), HostError> {
        self.define(target, Slot::String(key.into()), value, false)
    }

    /// `target[Symbol[name]] = value`, using the host's own symbol.
    pub fn set_symbol(&self, target: &HostValue, name: &str, value: HostValue) -> Result<(), HostError> {
        self.define(target, Slot::Symbol(SymbolId::WellKnown(name.into())), value, false)
    }

    /// `target[key]`
    pub fn get(&self, target: &HostValue, key: &str) -> Result<HostValue, HostError> {
        let id = self.object_id(target)?;
        Ok(self.lookup(id, &Slot::String(key.into())))
    }

    /// Invoke a callable object (or a guest function) with `this` and `args`.
    pub fn call(&self, callee: &HostValue, this: &HostValue, args: &[HostValue]) -> Result<HostValue, HostError> {
        let function = match callee {
            HostValue::Function(function) => function.clone(),
            HostValue::Object(_) => {
                let id = self.object_id(callee)?;
                self.objects.borrow()[id]
                    .call
                    .clone()
                    .ok_or_else(|| HostError::new("TypeError: object is not a function"))?
            }
            other => {
                return Err(HostError::new(format!(
                    "TypeError: {} is not a function",
                    other.type_name()
                )));
            }
        };
        trace!("[HOST] call {}", function.name());
        let result = function.call(this, args)?;
        Ok(self.store(result))
    }

    /// The host's own `for (const item of iterable)` loop, collecting items.
    ///
    /// Dispatches through the host-native iteration symbol; no guest-side
    /// handle is involved.
    pub fn iterate(&self, iterable: &HostValue) -> Result<Vec<HostValue>, HostError> {
        let id = self.object_id(iterable)?;
        let method = self.lookup(id, &Slot::Symbol(SymbolId::WellKnown("iterator".into())));
        if method.is_nullish() {
            return Err(HostError::new("TypeError: object is not iterable"));
        }
        let iterator = self.call(&method, iterable, &[])?;
        let next = self.get(&iterator, "next")?;

        let mut items = Vec::new();
        loop {
            let result = self.call(&next, &iterator, &[])?;
            if self.get(&result, "done")?.as_bool().unwrap_or(false) {
                return Ok(items);
            }
            items.push(self.get(&result, "value")?);
        }
    }

    fn build_object<'a>(
        &self,
        proto: Option<usize>,
        props: impl IntoIterator<Item = (&'a str, HostValue)>,
    ) -> HostValue {
        let props = props
            .into_iter()
            .map(|(key, value)| {
                let property = Property {
                    value: self.store(value),
                    enumerable: true,
                };
                (Slot::String(key.into()), property)
            })
            .collect();
        self.alloc(ObjectData {
            proto,
            props,
            call: None,
        })
    }

    fn alloc(&self, data: ObjectData) -> HostValue {
        let mut objects = self.objects.borrow_mut();
        objects.push(data);
        HostValue::Object(ForeignHandle::new(ObjectRef {
            host: self.id,
            index: objects.len() - 1,
        }))
    }

    /// Guest functions become callable host objects once stored.
    fn store(&self, value: HostValue) -> HostValue {
        match value {
            HostValue::Function(function) => self.alloc(ObjectData {
                call: Some(function),
                ..ObjectData::default()
            }),
            other => other,
        }
    }

    fn define(&self, target: &HostValue, slot: Slot, value: HostValue, enumerable: bool) -> Result<(), HostError> {
        let id = self.object_id(target)?;
        let value = self.store(value);
        self.objects.borrow_mut()[id]
            .props
            .insert(slot, Property { value, enumerable });
        Ok(())
    }

    fn object_id(&self, value: &HostValue) -> Result<usize, HostError> {
        let object = value
            .as_object()
            .and_then(|handle| handle.downcast_ref::<ObjectRef>())
            .ok_or_else(|| HostError::new(format!("TypeError: {} is not an object", value.type_name())))?;
        if object.host != self.id || object.index >= self.objects.borrow().len() {
            return Err(HostError::new("TypeError: object belongs to another host"));
        }
        Ok(object.index)
    }

    /// Objects from `id` up its prototype chain.
    fn chain(&self, id: usize) -> SmallVec<[usize; 4]> {
        let objects = self.objects.borrow();
        let mut chain = SmallVec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = objects[id].proto;
        }
        chain
    }

    fn lookup(&self, id: usize, slot: &Slot) -> HostValue {
        let objects = self.objects.borrow();
        self.chain(id)
            .into_iter()
            .find_map(|id| objects[id].props.get(slot).map(|property| property.value.clone()))
            .unwrap_or_default()
    }

    fn for_in_keys(&self, id: usize) -> Vec<HostValue> {
        let objects = self.objects.borrow();
        let mut seen: Vec<&Rc<str>> = Vec::new();
        let mut keys = Vec::new();
        for id in self.chain(id) {
            for (slot, property) in &objects[id].props {
                let Slot::String(key) = slot else { continue };
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key);
                if property.enumerable {
                    keys.push(HostValue::String(Rc::clone(key)));
                }
            }
        }
        keys
    }

    fn slot(key: &PropertyKey) -> Result<Slot, HostError> {
        match key {
            PropertyKey::String(key) => Ok(Slot::String(Rc::clone(key))),
            PropertyKey::Symbol(symbol) => symbol
                .raw()
                .downcast_ref::<SymbolId>()
                .map(|id| Slot::Symbol(id.clone()))
                .ok_or_else(|| HostError::new("TypeError: symbol belongs to another host")),
        }
    }

    fn symbol(&self, id: SymbolId) -> HostValue {
        self.symbol_lookups.set(self.symbol_lookups.get() + 1);
        if self.unstable_symbols {
            return HostValue::Symbol(ForeignHandle::new(id));
        }
        let handle = self
            .symbols
            .borrow_mut()
            .entry(id.clone())
            .or_insert_with(|| ForeignHandle::new(id))
            .clone();
        HostValue::Symbol(handle)
    }
}

impl Host for MemoryHost {
    fn evaluate(&self, expr: HostExpr<'_>) -> Result<HostValue, HostError> {
        self.evaluations.set(self.evaluations.get() + 1);
        trace!("[HOST] evaluate {}", expr.label());
        match expr {
            HostExpr::ForInKeys(handle) => {
                let id = self.object_id(&HostValue::Object(handle.clone()))?;
                Ok(HostValue::List(self.for_in_keys(id)))
            }
            HostExpr::HasOwnProperty(handle, key) => {
                let id = self.object_id(&HostValue::Object(handle.clone()))?;
                let has = self.objects.borrow()[id]
                    .props
                    .contains_key(&Slot::String(key.into()));
                Ok(HostValue::Bool(has))
            }
            HostExpr::GetProperty(handle, key) => {
                let id = self.object_id(&HostValue::Object(handle.clone()))?;
                Ok(self.lookup(id, &Self::slot(key)?))
            }
            HostExpr::WellKnownSymbol(name) => {
                if WELL_KNOWN_SYMBOLS.contains(&name) {
                    Ok(self.symbol(SymbolId::WellKnown(name.into())))
                } else {
                    self.symbol_lookups.set(self.symbol_lookups.get() + 1);
                    Ok(HostValue::Undefined)
                }
            }
            HostExpr::RegisteredSymbol(key) => Ok(self.symbol(SymbolId::Registered(key.into()))),
            HostExpr::NewObject(props) => {
                let object = self.alloc(ObjectData::default());
                for (key, value) in props {
                    self.define(&object, Self::slot(&key)?, value, true)?;
                }
                Ok(object)
            }
            HostExpr::Call { callee, this, args } => self.call(callee, this, args),
        }
    }
}
