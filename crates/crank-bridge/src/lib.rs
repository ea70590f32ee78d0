//! Generator-style component bodies for a JavaScript-hosted Crank renderer.
//!
//! The renderer expects components to be native iterators fed through their
//! context; the host underneath cannot be trusted to dispatch iteration on
//! guest objects, and hands out a different `Symbol.iterator` on every read.
//! This crate sits between the two:
//!
//! - [`component`] classifies bodies and runs each mount as an
//!   [`ExecutionFrame`], one step per render pass;
//! - [`bridge`] turns host objects into mappings and guest sequences into
//!   host iterables without relying on the host's iteration dispatch;
//! - [`symbols`] keeps one canonical handle per symbol name.
//!
//! Everything is single-threaded: frames, the bridge and the symbol table
//! share the host's thread.

pub mod bridge;
pub mod component;
pub mod config;
pub mod error;
pub mod host;
pub mod platform;
pub mod symbols;
pub mod value;

pub use bridge::{Bridge, ForeignIterable, HostThrow};
pub use component::{
    Adapter, ComponentBody, ComponentDescriptor, Context, ExecutionFrame, FrameId, FrameIterator,
    FrameState, Invocation, IteratorResult, IteratorStep, MountContext, PendingStep, Settled,
    Shape, StepOutcome,
};
pub use config::AdapterConfig;
pub use error::{BodyError, BridgeError, ContractViolation, StepError};
pub use host::{Host, HostError, HostExpr};
pub use symbols::{SpecialTag, SymbolHandle, SymbolKey, SymbolTable};
pub use value::{ForeignHandle, HostFunction, HostValue, InputSnapshot, PropertyKey};
