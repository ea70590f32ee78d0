//! The host evaluation channel.
//!
//! The bridge never touches host objects directly. Every reflection step is
//! phrased as a [`HostExpr`] and handed to whatever [`Host`] the embedding
//! installed, so the same bridge code runs against the browser and against
//! the in-process object space used for native runs.

use std::error::Error;
use std::fmt;
use std::rc::Rc;

use crate::value::{ForeignHandle, HostValue, PropertyKey};

/// A reflection-style request executed in the host's object space.
#[derive(Debug)]
pub enum HostExpr<'a> {
    /// `for (k in target)`: own and inherited enumerable string keys, as a list of strings.
    ForInKeys(&'a ForeignHandle),
    /// `Object.prototype.hasOwnProperty.call(target, key)`, as a boolean.
    HasOwnProperty(&'a ForeignHandle, &'a str),
    /// `target[key]`, `undefined` when missing.
    GetProperty(&'a ForeignHandle, &'a PropertyKey),
    /// `Symbol[name]`.
    WellKnownSymbol(&'a str),
    /// `Symbol.for(key)`.
    RegisteredSymbol(&'a str),
    /// A plain object literal with the given enumerable properties.
    NewObject(Vec<(PropertyKey, HostValue)>),
    /// `callee.apply(this, args)`.
    Call {
        callee: &'a HostValue,
        this: &'a HostValue,
        args: &'a [HostValue],
    },
}

impl HostExpr<'_> {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            HostExpr::ForInKeys(_) => "for-in",
            HostExpr::HasOwnProperty(..) => "hasOwnProperty",
            HostExpr::GetProperty(..) => "get",
            HostExpr::WellKnownSymbol(_) => "Symbol[name]",
            HostExpr::RegisteredSymbol(_) => "Symbol.for",
            HostExpr::NewObject(_) => "object literal",
            HostExpr::Call { .. } => "call",
        }
    }
}

/// Capability to evaluate [`HostExpr`]s against a live host.
pub trait Host {
    fn evaluate(&self, expr: HostExpr<'_>) -> Result<HostValue, HostError>;
}

/// An error thrown on the host side, or to be thrown there.
///
/// When a guest failure is translated into a host exception the original
/// failure rides along as the `cause`.
#[derive(Clone, Debug)]
pub struct HostError {
    message: String,
    cause: Option<Rc<dyn Error>>,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Box<dyn Error>) -> Self {
        self.cause = Some(Rc::from(cause));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&dyn Error> {
        self.cause.as_deref()
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for HostError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref()
    }
}
