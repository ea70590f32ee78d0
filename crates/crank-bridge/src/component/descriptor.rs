//! Component bodies and their one-time classification.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use super::channel::{Context, Tracked};
use crate::error::BodyError;
use crate::value::{HostValue, InputSnapshot};

/// Result of a plain or async body.
pub type BodyResult = Result<HostValue, BodyError>;

/// Result of a generator body: the optional return value on completion.
pub type GeneratorResult = Result<Option<HostValue>, BodyError>;

pub type GeneratorFuture = LocalBoxFuture<'static, GeneratorResult>;

pub type PlainFn = dyn Fn(&InputSnapshot) -> BodyResult;
pub type ContextFn = dyn Fn(&Context, &InputSnapshot) -> BodyResult;
pub type AsyncFn = dyn Fn(Context, InputSnapshot) -> LocalBoxFuture<'static, BodyResult>;
pub type GeneratorFn = dyn Fn(Context) -> GeneratorFuture;

/// Control-flow shape of a component body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Plain,
    Async,
    Generator,
    AsyncGenerator,
}

impl Shape {
    pub fn short_name(&self) -> &'static str {
        match self {
            Shape::Plain => "plain",
            Shape::Async => "async",
            Shape::Generator => "gen",
            Shape::AsyncGenerator => "async-gen",
        }
    }

    /// Generator shapes keep a body alive between steps.
    pub fn is_generator(&self) -> bool {
        matches!(self, Shape::Generator | Shape::AsyncGenerator)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A user-supplied component body.
///
/// Clones share the same closure, and therefore the same identity.
#[derive(Clone)]
pub enum ComponentBody {
    Plain(Rc<PlainFn>),
    WithContext(Rc<ContextFn>),
    Async(Rc<AsyncFn>),
    Generator(Rc<GeneratorFn>),
    AsyncGenerator(Rc<GeneratorFn>),
}

impl ComponentBody {
    /// Body called with the inputs only.
    pub fn plain<F>(body: F) -> Self
    where
        F: Fn(&InputSnapshot) -> BodyResult + 'static,
    {
        Self::Plain(Rc::new(body))
    }

    /// Body called with its context and the inputs.
    pub fn with_context<F>(body: F) -> Self
    where
        F: Fn(&Context, &InputSnapshot) -> BodyResult + 'static,
    {
        Self::WithContext(Rc::new(body))
    }

    /// Body returning a pending operation that resolves to the rendered value.
    pub fn from_async<F, Fut>(body: F) -> Self
    where
        F: Fn(Context, InputSnapshot) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        Self::Async(Rc::new(move |ctx: Context, props: InputSnapshot| {
            body(ctx, props).boxed_local()
        }))
    }

    /// Manually driven coroutine. It may only await its own context: pulls
    /// from the input stream and `yield_`.
    pub fn generator<F, Fut>(body: F) -> Self
    where
        F: Fn(Context) -> Fut + 'static,
        Fut: Future<Output = GeneratorResult> + 'static,
    {
        Self::Generator(Rc::new(move |ctx: Context| {
            Tracked::new(&ctx, body(ctx.clone())).boxed_local()
        }))
    }

    /// Coroutine that may also await external operations between yields.
    pub fn async_generator<F, Fut>(body: F) -> Self
    where
        F: Fn(Context) -> Fut + 'static,
        Fut: Future<Output = GeneratorResult> + 'static,
    {
        Self::AsyncGenerator(Rc::new(move |ctx: Context| {
            Tracked::new(&ctx, body(ctx.clone())).boxed_local()
        }))
    }

    /// Identity of the underlying closure; stable across clones.
    pub fn identity(&self) -> usize {
        match self {
            ComponentBody::Plain(f) => Rc::as_ptr(f) as *const () as usize,
            ComponentBody::WithContext(f) => Rc::as_ptr(f) as *const () as usize,
            ComponentBody::Async(f) => Rc::as_ptr(f) as *const () as usize,
            ComponentBody::Generator(f) | ComponentBody::AsyncGenerator(f) => {
                Rc::as_ptr(f) as *const () as usize
            }
        }
    }
}

impl fmt::Debug for ComponentBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentBody::{}({:#x})", classify(self).short_name(), self.identity())
    }
}

/// Inspect a body once and report its shape.
pub fn classify(body: &ComponentBody) -> Shape {
    match body {
        ComponentBody::Plain(_) | ComponentBody::WithContext(_) => Shape::Plain,
        ComponentBody::Async(_) => Shape::Async,
        ComponentBody::Generator(_) => Shape::Generator,
        ComponentBody::AsyncGenerator(_) => Shape::AsyncGenerator,
    }
}

/// A classified component body. Immutable once created.
#[derive(Debug)]
pub struct ComponentDescriptor {
    shape: Shape,
    body: ComponentBody,
}

impl ComponentDescriptor {
    pub fn new(body: ComponentBody) -> Self {
        Self {
            shape: classify(&body),
            body,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn body(&self) -> &ComponentBody {
        &self.body
    }
}
