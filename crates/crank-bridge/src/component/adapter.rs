//! The component function adapter: what the renderer actually calls.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::debug;

use super::descriptor::{ComponentBody, ComponentDescriptor, Shape};
use super::frame::{ExecutionFrame, FrameId, FrameState, MountContext, PendingStep, Settled, StepOutcome};
use crate::config::AdapterConfig;
use crate::error::{BodyError, StepError};
use crate::value::{HostValue, InputSnapshot};

/// Classifies component bodies and mounts them.
///
/// Descriptors are cached by body identity for the adapter's lifetime; the
/// cache holds the body, so an identity is never reused while cached.
#[derive(Default)]
pub struct Adapter {
    config: AdapterConfig,
    descriptors: RefCell<HashMap<usize, Rc<ComponentDescriptor>>>,
}

impl Adapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AdapterConfig) -> Self {
        Self {
            config,
            descriptors: RefCell::default(),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Descriptor for `body`, created on first sight.
    pub fn classify(&self, body: &ComponentBody) -> Rc<ComponentDescriptor> {
        let mut descriptors = self.descriptors.borrow_mut();
        let descriptor = descriptors.entry(body.identity()).or_insert_with(|| {
            let descriptor = ComponentDescriptor::new(body.clone());
            debug!("[ADAPTER] classified {:?} as {}", body, descriptor.shape());
            Rc::new(descriptor)
        });
        Rc::clone(descriptor)
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.borrow().len()
    }

    /// Create a frame for `descriptor`. Generator bodies are started but not
    /// polled until the first step.
    pub fn instantiate(&self, descriptor: &Rc<ComponentDescriptor>, mount: MountContext) -> ExecutionFrame {
        ExecutionFrame::new(Rc::clone(descriptor), mount, self.config.clone())
    }

    /// Call a component the way the renderer does: with its props and a
    /// mount context.
    ///
    /// Plain bodies render immediately, async bodies return their pending
    /// operation, generator shapes return an iterator the renderer drives.
    pub fn invoke(
        &self,
        descriptor: &Rc<ComponentDescriptor>,
        props: InputSnapshot,
        mount: MountContext,
    ) -> Result<Invocation, StepError> {
        let frame = self.instantiate(descriptor, mount);
        match descriptor.shape() {
            Shape::Plain => match frame.step(props)? {
                StepOutcome::Render(value) => Ok(Invocation::Value(value)),
                StepOutcome::Done(value) => Ok(Invocation::Value(value.unwrap_or_default())),
                StepOutcome::Suspend(pending) => Ok(Invocation::Pending(pending)),
            },
            Shape::Async => match frame.step(props)? {
                StepOutcome::Suspend(pending) => Ok(Invocation::Pending(pending)),
                StepOutcome::Render(value) => Ok(Invocation::Value(value)),
                StepOutcome::Done(value) => Ok(Invocation::Value(value.unwrap_or_default())),
            },
            Shape::Generator | Shape::AsyncGenerator => {
                frame.install_props(props);
                Ok(Invocation::Iterator(FrameIterator { frame }))
            }
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("config", &self.config)
            .field("descriptors", &self.descriptor_count())
            .finish()
    }
}

/// What a component call hands back to the renderer.
#[derive(Debug)]
pub enum Invocation {
    Value(HostValue),
    Pending(PendingStep),
    Iterator(FrameIterator),
}

/// One result of the host iterator protocol.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IteratorResult {
    pub value: HostValue,
    pub done: bool,
}

impl IteratorResult {
    pub fn yielded(value: HostValue) -> Self {
        Self { value, done: false }
    }

    pub fn finished(value: Option<HostValue>) -> Self {
        Self {
            value: value.unwrap_or_default(),
            done: true,
        }
    }
}

impl From<Settled> for IteratorResult {
    fn from(settled: Settled) -> Self {
        match settled {
            Settled::Render(value) => IteratorResult::yielded(value),
            Settled::Done(value) => IteratorResult::finished(value),
        }
    }
}

/// Result of [`FrameIterator::next`].
#[derive(Debug)]
pub enum IteratorStep {
    Ready(IteratorResult),
    /// Async generator frames: resolves to the result.
    Pending(PendingStep),
}

/// A generator frame behind the host iterator protocol.
#[derive(Debug)]
pub struct FrameIterator {
    frame: ExecutionFrame,
}

impl FrameIterator {
    pub fn frame(&self) -> &ExecutionFrame {
        &self.frame
    }

    pub fn id(&self) -> FrameId {
        self.frame.id()
    }

    /// Advance to the next yield.
    ///
    /// `None` re-sends the current props. A finished or closing frame keeps
    /// answering `{ value: undefined, done: true }`.
    pub fn next(&self, props: Option<InputSnapshot>) -> Result<IteratorStep, StepError> {
        if self.frame.state().is_closed() {
            return Ok(IteratorStep::Ready(IteratorResult::finished(None)));
        }
        let props = props.unwrap_or_else(|| self.frame.props());
        Ok(match self.frame.step(props)? {
            StepOutcome::Render(value) => IteratorStep::Ready(IteratorResult::yielded(value)),
            StepOutcome::Done(value) => IteratorStep::Ready(IteratorResult::finished(value)),
            StepOutcome::Suspend(pending) => IteratorStep::Pending(pending),
        })
    }

    /// Finish early, as on unmount. The body's own return value wins over
    /// `value` when it produces one.
    pub fn return_(&self, value: HostValue) -> Result<IteratorResult, StepError> {
        let returned = self.frame.close()?;
        Ok(IteratorResult::finished(Some(returned.unwrap_or(value))))
    }

    /// Abort the body with `error`. Bodies cannot intercept it: the frame
    /// fails and the error comes back tagged with the frame.
    pub fn throw_(&self, error: BodyError) -> StepError {
        self.frame.throw_into(error)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.frame.state(), FrameState::Done | FrameState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::component::Context;

    fn counter() -> ComponentBody {
        ComponentBody::generator(|ctx: Context| async move {
            let mut inputs = ctx.clone();
            let mut renders = 0;
            while let Some(_props) = inputs.next().await {
                renders += 1;
                ctx.yield_(renders).await;
            }
            Ok(Some(HostValue::from("unmounted")))
        })
    }

    fn ready(step: IteratorStep) -> IteratorResult {
        match step {
            IteratorStep::Ready(result) => result,
            IteratorStep::Pending(_) => panic!("sync generator should not suspend"),
        }
    }

    #[test]
    fn classify_is_cached_by_body_identity() {
        let adapter = Adapter::new();
        let body = counter();
        let first = adapter.classify(&body);
        let second = adapter.classify(&body.clone());
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(adapter.descriptor_count(), 1);

        adapter.classify(&counter());
        assert_eq!(adapter.descriptor_count(), 2);
    }

    #[test]
    fn plain_invocation_renders_immediately() {
        let adapter = Adapter::new();
        let descriptor = adapter.classify(&ComponentBody::plain(|props| {
            Ok(HostValue::from(props.len() as f64))
        }));
        let props: InputSnapshot = [("a", 1), ("b", 2)].into_iter().collect();
        match adapter.invoke(&descriptor, props, MountContext::new()).unwrap() {
            Invocation::Value(value) => assert_eq!(value, HostValue::Number(2.0)),
            other => panic!("expected a value, got {:?}", other),
        }
    }

    #[test]
    fn generator_invocation_follows_the_iterator_protocol() {
        let adapter = Adapter::new();
        let descriptor = adapter.classify(&counter());
        let Invocation::Iterator(iterator) = adapter
            .invoke(&descriptor, InputSnapshot::empty(), MountContext::new())
            .unwrap()
        else {
            panic!("generator should be invoked as an iterator");
        };

        assert_eq!(ready(iterator.next(None).unwrap()), IteratorResult::yielded(1.into()));
        assert_eq!(ready(iterator.next(None).unwrap()), IteratorResult::yielded(2.into()));
        assert_eq!(
            iterator.return_(HostValue::Null).unwrap(),
            IteratorResult::finished(Some(HostValue::from("unmounted")))
        );
        assert!(iterator.is_done());
        assert_eq!(ready(iterator.next(None).unwrap()), IteratorResult::finished(None));
    }

    #[test]
    fn throw_fails_the_frame_with_the_given_error() {
        let adapter = Adapter::new();
        let descriptor = adapter.classify(&counter());
        let Invocation::Iterator(iterator) = adapter
            .invoke(&descriptor, InputSnapshot::empty(), MountContext::new())
            .unwrap()
        else {
            panic!("generator should be invoked as an iterator");
        };
        iterator.next(None).unwrap();

        let error = iterator.throw_("stop".into());
        assert_eq!(error.frame(), iterator.id());
        assert_eq!(error.body_error().map(ToString::to_string), Some("stop".to_string()));
        assert_eq!(iterator.frame().state(), FrameState::Failed);
    }
}
