//! Canonical symbol table.
//!
//! Some hosts mint a distinct symbol-like object every time a well-known
//! symbol is read (`Symbol.iterator` through a proxy layer, for example).
//! Using such a value as a property key produces a property nobody can find
//! again. The table performs the host lookup once per name and hands out the
//! same [`SymbolHandle`] from then on.
//!
//! Each thread gets its own table, and nothing is shared or locked across
//! threads. Symbol handles are `Rc`-based and never leave the thread that
//! looked them up; an embedding that runs the host and renderer on one
//! thread sees a single table. Tests create private tables with
//! [`SymbolTable::new`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::error::BridgeError;
use crate::host::{Host, HostExpr};
use crate::value::{ForeignHandle, HostValue};

/// `Symbol.iterator`
pub const ITERATOR: &str = "iterator";
/// `Symbol.asyncIterator`
pub const ASYNC_ITERATOR: &str = "asyncIterator";

/// Identifies a cached symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKey {
    /// `Symbol[name]`
    WellKnown(Rc<str>),
    /// `Symbol.for(key)`
    Registered(Rc<str>),
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKey::WellKnown(name) => write!(f, "Symbol.{}", name),
            SymbolKey::Registered(key) => write!(f, "Symbol.for({:?})", key),
        }
    }
}

struct SymbolEntry {
    key: SymbolKey,
    raw: ForeignHandle,
}

/// Identity-stable handle to a host symbol.
///
/// Two handles are equal only if they are the same cached entry.
#[derive(Clone)]
pub struct SymbolHandle(Rc<SymbolEntry>);

impl SymbolHandle {
    pub fn key(&self) -> &SymbolKey {
        &self.0.key
    }

    /// The host's own symbol value, captured on the first lookup.
    pub fn raw(&self) -> &ForeignHandle {
        &self.0.raw
    }

    pub fn to_host_value(&self) -> HostValue {
        HostValue::Symbol(self.0.raw.clone())
    }
}

impl PartialEq for SymbolHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SymbolHandle {}

impl fmt::Debug for SymbolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolHandle({})", self.0.key)
    }
}

/// Renderer special tags, published as registry symbols by the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialTag {
    Portal,
    Copy,
    Text,
    Raw,
}

impl SpecialTag {
    pub const ALL: [SpecialTag; 4] = [
        SpecialTag::Portal,
        SpecialTag::Copy,
        SpecialTag::Text,
        SpecialTag::Raw,
    ];

    /// Key passed to `Symbol.for`.
    pub fn registry_key(&self) -> &'static str {
        match self {
            Self::Portal => "crank.Portal",
            Self::Copy => "crank.Copy",
            Self::Text => "crank.Text",
            Self::Raw => "crank.Raw",
        }
    }
}

thread_local! {
    static PROCESS_TABLE: Rc<SymbolTable> = Rc::new(SymbolTable::new());
}

/// Lazily populated cache of canonical symbols.
#[derive(Default)]
pub struct SymbolTable {
    entries: RefCell<HashMap<SymbolKey, SymbolHandle>>,
    host_lookups: Cell<u64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table shared by every bridge on this thread. Other threads get
    /// their own.
    pub fn process() -> Rc<SymbolTable> {
        PROCESS_TABLE.with(Rc::clone)
    }

    /// Canonical handle for `Symbol[name]`.
    ///
    /// The first call for `name` evaluates exactly one host lookup; every
    /// later call returns the cached handle without touching the host.
    pub fn get(&self, host: &dyn Host, name: &str) -> Result<SymbolHandle, BridgeError> {
        self.resolve(host, SymbolKey::WellKnown(name.into()))
    }

    /// Canonical handle for `Symbol.for(key)`.
    pub fn registered(&self, host: &dyn Host, key: &str) -> Result<SymbolHandle, BridgeError> {
        self.resolve(host, SymbolKey::Registered(key.into()))
    }

    /// Cached handle, without ever consulting the host.
    pub fn cached(&self, key: &SymbolKey) -> Option<SymbolHandle> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Number of lookups this table sent to a host.
    pub fn host_lookups(&self) -> u64 {
        self.host_lookups.get()
    }

    fn resolve(&self, host: &dyn Host, key: SymbolKey) -> Result<SymbolHandle, BridgeError> {
        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        self.host_lookups.set(self.host_lookups.get() + 1);
        let value = match &key {
            SymbolKey::WellKnown(name) => host.evaluate(HostExpr::WellKnownSymbol(name))?,
            SymbolKey::Registered(registry_key) => {
                host.evaluate(HostExpr::RegisteredSymbol(registry_key))?
            }
        };
        let raw = match value {
            HostValue::Symbol(raw) => raw,
            other => {
                return Err(BridgeError::NotASymbol {
                    name: key.to_string(),
                    found: other.type_name(),
                });
            }
        };

        let handle = SymbolHandle(Rc::new(SymbolEntry {
            key: key.clone(),
            raw,
        }));
        // A host callback may have populated the entry while we were away; keep the first.
        let handle = self
            .entries
            .borrow_mut()
            .entry(key)
            .or_insert(handle)
            .clone();
        debug!("[SYMBOLS] cached canonical {}", handle.key());
        Ok(handle)
    }
}
