//! Component function adapter and the context iteration channel.
//!
//! Bodies are classified once into a [`ComponentDescriptor`]; every mount
//! gets an [`ExecutionFrame`] bound to its own channel. Generator bodies are
//! plain `async` blocks that only this module ever polls, so each `step`
//! runs the body up to its next `yield_`.

mod adapter;
mod channel;
mod descriptor;
mod frame;

pub use adapter::{Adapter, FrameIterator, Invocation, IteratorResult, IteratorStep};
pub use channel::{Context, RefreshHook, Yield};
pub use descriptor::{
    BodyResult, ComponentBody, ComponentDescriptor, GeneratorResult, Shape, classify,
};
pub use frame::{
    ExecutionFrame, FrameId, FrameState, MountContext, PendingStep, Settled, StepOutcome,
};
