//! Execution frames.
//!
//! A frame is the live state of one mounted component: the body (kept
//! between steps for generator shapes), the channel it reads its inputs
//! from, and the lifecycle state.
//!
//! ```text
//! Fresh -> AwaitingStep -> Yielding -> AwaitingStep -> ...
//!                       \-> SuspendedOnInput -> AwaitingStep -> ...
//! any non-terminal -> Failed    (body error, re-entrant step, throw)
//! any non-terminal -> Done      (body returned, close)
//! AwaitingStep / Yielding -> Closing -> Done   (async generator winding down)
//! ```
//!
//! Closing ends the body's input stream. The body sees the end of iteration
//! at its next pull and returns on its own. Synchronous generators get
//! `teardown_poll_budget` polls for that. Async generators keep running
//! through the outstanding [`PendingStep`], or through [`ExecutionFrame::teardown`],
//! until they return.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};

use futures_util::future::{FusedFuture, LocalBoxFuture};
use futures_util::task::noop_waker_ref;
use log::{debug, trace, warn};

use super::channel::{BodyPhase, Context, ContextChannel, RefreshHook};
use super::descriptor::{BodyResult, ComponentBody, ComponentDescriptor, GeneratorFuture, Shape};
use crate::config::AdapterConfig;
use crate::error::{BodyError, ContractViolation, StepError};
use crate::value::{HostValue, InputSnapshot};

thread_local! {
    static NEXT_FRAME_ID: Cell<u64> = const { Cell::new(1) };
}

/// Identifies an execution frame in diagnostics. Unique per thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    pub(crate) fn next() -> Self {
        NEXT_FRAME_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            FrameId(id)
        })
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Lifecycle of an execution frame.
///
/// A body that loops `pull, yield` sits in `Yielding` between render passes:
/// the next step delivers a snapshot and resumes it from its yield. It only
/// reports `SuspendedOnInput` when a step ends with the body parked in a pull
/// and no snapshot waiting, that is, a pass that rendered nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameState {
    Fresh,
    AwaitingStep,
    Yielding,
    SuspendedOnInput,
    /// Closed, with an async generator body still running to its return.
    Closing,
    Done,
    Failed,
}

impl FrameState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameState::Done | FrameState::Failed)
    }

    /// No further steps are accepted.
    pub fn is_closed(&self) -> bool {
        self.is_terminal() || *self == FrameState::Closing
    }
}

/// What the renderer hands a component when mounting it.
#[derive(Clone, Default)]
pub struct MountContext {
    on_refresh: Option<RefreshHook>,
}

impl MountContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook invoked when a body requests a refresh (once per coalesced batch).
    pub fn on_refresh(mut self, hook: impl Fn(FrameId) + 'static) -> Self {
        self.on_refresh = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for MountContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountContext")
            .field("on_refresh", &self.on_refresh.is_some())
            .finish()
    }
}

/// Result of a single step.
pub enum StepOutcome {
    /// A value to render.
    Render(HostValue),
    /// The step continues asynchronously; poll to completion.
    Suspend(PendingStep),
    /// The body returned. The frame is done.
    Done(Option<HostValue>),
}

impl fmt::Debug for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Render(value) => f.debug_tuple("Render").field(value).finish(),
            StepOutcome::Suspend(pending) => f.debug_tuple("Suspend").field(pending).finish(),
            StepOutcome::Done(value) => f.debug_tuple("Done").field(value).finish(),
        }
    }
}

/// Resolution of a [`PendingStep`].
#[derive(Clone, Debug, PartialEq)]
pub enum Settled {
    Render(HostValue),
    Done(Option<HostValue>),
}

impl From<Settled> for StepOutcome {
    fn from(settled: Settled) -> Self {
        match settled {
            Settled::Render(value) => StepOutcome::Render(value),
            Settled::Done(value) => StepOutcome::Done(value),
        }
    }
}

/// Where one poll of a generator body left it.
enum Drive {
    Yielded(HostValue),
    AwaitingInput,
    Finished(Option<HostValue>),
    Raised(BodyError),
    External,
}

enum Progress {
    Rendered(HostValue),
    AwaitingInput,
    Finished(Option<HostValue>),
}

impl Drive {
    /// `None` while the body is parked on something outside its channel.
    fn settle(self) -> Option<Result<Progress, BodyError>> {
        match self {
            Drive::Yielded(value) => Some(Ok(Progress::Rendered(value))),
            Drive::AwaitingInput => Some(Ok(Progress::AwaitingInput)),
            Drive::Finished(value) => Some(Ok(Progress::Finished(value))),
            Drive::Raised(error) => Some(Err(error)),
            Drive::External => None,
        }
    }
}

struct FrameShared {
    id: FrameId,
    descriptor: Rc<ComponentDescriptor>,
    channel: ContextChannel,
    config: AdapterConfig,
    state: Cell<FrameState>,
    outstanding: Cell<bool>,
    teardown_yields: Cell<u32>,
    body: RefCell<Option<GeneratorFuture>>,
}

impl FrameShared {
    fn transition(&self, to: FrameState) {
        let from = self.state.replace(to);
        #[cfg(feature = "debug-frames")]
        if from != to {
            trace!("[FRAME] {} {:?} -> {:?}", self.id, from, to);
        }
        if to.is_terminal() && !from.is_terminal() {
            self.channel.run_cleanups();
        }
    }

    fn begin_step(&self) -> Result<(), StepError> {
        let state = self.state.get();
        if state.is_closed() {
            return Err(StepError::FrameFinalized {
                frame: self.id,
                state,
            });
        }
        if self.outstanding.get() {
            warn!("[FRAME] {} stepped while a step is outstanding, failing frame", self.id);
            self.channel.close();
            self.transition(FrameState::Failed);
            return Err(StepError::Reentrancy { frame: self.id });
        }
        self.outstanding.set(true);
        self.transition(FrameState::AwaitingStep);
        Ok(())
    }

    /// Poll the generator body once and read where it stopped.
    fn drive(&self, cx: &mut TaskContext<'_>) -> Drive {
        let mut slot = self.body.borrow_mut();
        let Some(body) = slot.as_mut() else {
            return Drive::Finished(None);
        };
        let polled = body.as_mut().poll(cx);
        match polled {
            Poll::Ready(Ok(value)) => {
                *slot = None;
                Drive::Finished(value)
            }
            Poll::Ready(Err(error)) => {
                *slot = None;
                Drive::Raised(error)
            }
            Poll::Pending => match self.channel.phase() {
                BodyPhase::Yielded => Drive::Yielded(self.channel.take_yield().unwrap_or_default()),
                BodyPhase::SuspendedOnInput => match self.channel.take_violation() {
                    Some(violation) => {
                        *slot = None;
                        Drive::Raised(Box::new(violation))
                    }
                    None => Drive::AwaitingInput,
                },
                BodyPhase::Running | BodyPhase::Idle => Drive::External,
            },
        }
    }

    /// Drive a closed async generator body toward its return.
    ///
    /// Values it yields on the way are dropped. Once it has yielded more than
    /// `teardown_poll_budget` times, or parks in a pull, it is dropped.
    fn wind_down(&self, cx: &mut TaskContext<'_>) -> Option<Result<Progress, BodyError>> {
        loop {
            match self.drive(cx) {
                Drive::Finished(value) => return Some(Ok(Progress::Finished(value))),
                Drive::Raised(error) => return Some(Err(error)),
                Drive::External => return None,
                Drive::Yielded(_) => {
                    warn!("[FRAME] {} yielded after close, value dropped", self.id);
                    let spent = self.teardown_yields.get() + 1;
                    self.teardown_yields.set(spent);
                    if spent > self.config.teardown_poll_budget {
                        break;
                    }
                }
                Drive::AwaitingInput => break,
            }
        }
        if self.body.borrow_mut().take().is_some() {
            debug!("[FRAME] {} body did not return after close, dropped", self.id);
        }
        Some(Ok(Progress::Finished(None)))
    }

    fn finish(&self, progress: Result<Progress, BodyError>) -> Result<Settled, StepError> {
        if self.state.get().is_terminal() {
            // Failed by a re-entrant step or closed while this step ran.
            return Err(self.finalized());
        }
        self.outstanding.set(false);
        match progress {
            Ok(Progress::Rendered(value)) => {
                self.transition(FrameState::Yielding);
                Ok(Settled::Render(value))
            }
            Ok(Progress::AwaitingInput) => {
                debug!("[FRAME] {} suspended on input without yielding", self.id);
                self.transition(FrameState::SuspendedOnInput);
                Ok(Settled::Render(HostValue::Undefined))
            }
            Ok(Progress::Finished(value)) => {
                self.channel.close();
                self.transition(FrameState::Done);
                Ok(Settled::Done(value))
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    fn fail(&self, source: BodyError) -> StepError {
        self.outstanding.set(false);
        self.channel.close();
        if let Ok(mut slot) = self.body.try_borrow_mut() {
            slot.take();
        }
        self.transition(FrameState::Failed);
        warn!("[FRAME] {} ({}) failed: {}", self.id, self.descriptor.shape(), source);
        StepError::RenderFailure {
            frame: self.id,
            source,
        }
    }

    fn finalized(&self) -> StepError {
        self.outstanding.set(false);
        if let Ok(mut slot) = self.body.try_borrow_mut() {
            slot.take();
        }
        StepError::FrameFinalized {
            frame: self.id,
            state: self.state.get(),
        }
    }
}

/// The live state of one mounted component.
pub struct ExecutionFrame {
    shared: Rc<FrameShared>,
}

impl ExecutionFrame {
    pub(crate) fn new(
        descriptor: Rc<ComponentDescriptor>,
        mount: MountContext,
        config: AdapterConfig,
    ) -> Self {
        let id = FrameId::next();
        let channel = ContextChannel::new(id, mount.on_refresh, config.strict_iteration);
        let body = match descriptor.body() {
            ComponentBody::Generator(start) | ComponentBody::AsyncGenerator(start) => {
                Some(start(channel.context()))
            }
            _ => None,
        };
        debug!("[FRAME] {} mounted ({})", id, descriptor.shape());
        Self {
            shared: Rc::new(FrameShared {
                id,
                descriptor,
                channel,
                config,
                state: Cell::new(FrameState::Fresh),
                outstanding: Cell::new(false),
                teardown_yields: Cell::new(0),
                body: RefCell::new(body),
            }),
        }
    }

    pub fn id(&self) -> FrameId {
        self.shared.id
    }

    pub fn state(&self) -> FrameState {
        self.shared.state.get()
    }

    pub fn shape(&self) -> Shape {
        self.shared.descriptor.shape()
    }

    pub fn descriptor(&self) -> &Rc<ComponentDescriptor> {
        &self.shared.descriptor
    }

    /// A body-side handle to this frame's channel.
    pub fn context(&self) -> Context {
        self.shared.channel.context()
    }

    pub fn refresh_pending(&self) -> bool {
        self.shared.channel.refresh_pending()
    }

    /// The most recent snapshot handed to this frame.
    pub fn props(&self) -> InputSnapshot {
        self.shared.channel.last_seen()
    }

    pub(crate) fn install_props(&self, props: InputSnapshot) {
        self.shared.channel.install(props);
    }

    /// Advance the component with a new input snapshot.
    pub fn step(&self, snapshot: InputSnapshot) -> Result<StepOutcome, StepError> {
        let shared = &self.shared;
        shared.begin_step()?;

        match shared.descriptor.body() {
            ComponentBody::Plain(body) => {
                shared.channel.install(snapshot.clone());
                let progress = body(&snapshot).map(Progress::Rendered);
                shared.finish(progress).map(StepOutcome::from)
            }
            ComponentBody::WithContext(body) => {
                shared.channel.install(snapshot.clone());
                let progress = body(&shared.channel.context(), &snapshot).map(Progress::Rendered);
                shared.finish(progress).map(StepOutcome::from)
            }
            ComponentBody::Async(body) => {
                shared.channel.install(snapshot.clone());
                let call = body(shared.channel.context(), snapshot);
                Ok(StepOutcome::Suspend(PendingStep::new(shared, Some(call))))
            }
            ComponentBody::Generator(_) => {
                shared.channel.deliver(snapshot);
                let mut cx = TaskContext::from_waker(noop_waker_ref());
                let progress = shared.drive(&mut cx).settle().unwrap_or_else(|| {
                    Err(Box::new(ContractViolation(
                        "generator component awaited an external operation",
                    )) as BodyError)
                });
                shared.finish(progress).map(StepOutcome::from)
            }
            ComponentBody::AsyncGenerator(_) => {
                shared.channel.deliver(snapshot);
                Ok(StepOutcome::Suspend(PendingStep::new(shared, None)))
            }
        }
    }

    /// Re-enter the body with the last-seen snapshot if a refresh was
    /// requested since the previous step.
    pub fn refresh_step(&self) -> Result<Option<StepOutcome>, StepError> {
        if !self.shared.channel.take_refresh() {
            return Ok(None);
        }
        #[cfg(feature = "debug-frames")]
        trace!("[FRAME] {} refresh step", self.shared.id);
        let snapshot = self.shared.channel.last_seen();
        self.step(snapshot).map(Some)
    }

    /// Unmount: end the body's input stream and let it wind down.
    ///
    /// A synchronous generator gets `teardown_poll_budget` polls to observe
    /// termination and return; its return value is passed back, and a body
    /// still running after that is dropped.
    ///
    /// An async generator that is stepping, or that awaits an external
    /// operation on its way out, is left in `Closing` and keeps running: the
    /// outstanding [`PendingStep`] (or [`teardown`](Self::teardown)) resolves to
    /// `Settled::Done` with its return value. An async body's outstanding call
    /// is abandoned. Closing a closed frame is a no-op.
    pub fn close(&self) -> Result<Option<HostValue>, StepError> {
        let shared = &self.shared;
        let state = shared.state.get();
        if state.is_closed() {
            return Ok(None);
        }
        shared.channel.close();
        let winds_down = shared.descriptor.shape() == Shape::AsyncGenerator;

        if shared.outstanding.get() {
            if winds_down {
                debug!("[FRAME] {} closed with a step outstanding, body winds down through it", shared.id);
                shared.transition(FrameState::Closing);
            } else {
                debug!("[FRAME] {} closed with a call outstanding, abandoning it", shared.id);
                shared.outstanding.set(false);
                shared.transition(FrameState::Done);
            }
            return Ok(None);
        }

        let mut returned = None;
        if state != FrameState::Fresh {
            let mut cx = TaskContext::from_waker(noop_waker_ref());
            for _ in 0..shared.config.teardown_poll_budget {
                match shared.drive(&mut cx) {
                    Drive::Finished(value) => {
                        returned = value;
                        break;
                    }
                    Drive::Raised(error) => return Err(shared.fail(error)),
                    Drive::Yielded(_) => {
                        warn!("[FRAME] {} yielded after close, value dropped", shared.id);
                    }
                    Drive::External if winds_down => {
                        debug!("[FRAME] {} awaiting an operation after close, winding down", shared.id);
                        shared.transition(FrameState::Closing);
                        return Ok(None);
                    }
                    Drive::AwaitingInput | Drive::External => break,
                }
            }
        }
        if shared.body.borrow_mut().take().is_some() {
            debug!("[FRAME] {} body did not return after close, dropped", shared.id);
        }
        shared.transition(FrameState::Done);
        Ok(returned)
    }

    /// Drive an async generator that [`close`](Self::close) left in `Closing`.
    ///
    /// `None` unless the frame is closing with no step outstanding.
    pub fn teardown(&self) -> Option<PendingStep> {
        let shared = &self.shared;
        if shared.state.get() != FrameState::Closing || shared.outstanding.get() {
            return None;
        }
        shared.outstanding.set(true);
        Some(PendingStep::new(shared, None))
    }

    /// Abort the body with `error`. The frame fails; the error comes back as
    /// the frame's `RenderFailure`.
    pub(crate) fn throw_into(&self, error: BodyError) -> StepError {
        let shared = &self.shared;
        let state = shared.state.get();
        if state.is_terminal() {
            return StepError::FrameFinalized {
                frame: shared.id,
                state,
            };
        }
        shared.fail(error)
    }
}

impl fmt::Debug for ExecutionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionFrame")
            .field("id", &self.shared.id)
            .field("shape", &self.shared.descriptor.shape())
            .field("state", &self.shared.state.get())
            .finish()
    }
}

/// A step that continues asynchronously.
///
/// Resolves once the body reaches its next yield (async generators) or its
/// pending operation completes (async bodies). For a frame closed meanwhile
/// it resolves when the body returns. While it is unresolved the
/// frame counts as stepping; dropping it releases the frame.
#[must_use = "a pending step does nothing unless polled"]
pub struct PendingStep {
    frame: Rc<FrameShared>,
    call: Option<LocalBoxFuture<'static, BodyResult>>,
    completed: bool,
}

impl PendingStep {
    fn new(frame: &Rc<FrameShared>, call: Option<LocalBoxFuture<'static, BodyResult>>) -> Self {
        Self {
            frame: Rc::clone(frame),
            call,
            completed: false,
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame.id
    }
}

impl Future for PendingStep {
    type Output = Result<Settled, StepError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.completed {
            return Poll::Pending;
        }
        let frame = Rc::clone(&this.frame);
        if frame.state.get().is_terminal() {
            this.completed = true;
            this.call = None;
            return Poll::Ready(Err(frame.finalized()));
        }

        let progress = match this.call.as_mut() {
            Some(call) => match call.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => result.map(Progress::Rendered),
            },
            None => {
                let driven = if frame.state.get() == FrameState::Closing {
                    frame.wind_down(cx)
                } else {
                    frame.drive(cx).settle()
                };
                match driven {
                    Some(progress) => progress,
                    None => return Poll::Pending,
                }
            }
        };
        this.completed = true;
        this.call = None;
        Poll::Ready(frame.finish(progress))
    }
}

impl fmt::Debug for PendingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingStep")
            .field("frame", &self.frame.id)
            .field("completed", &self.completed)
            .finish()
    }
}

impl FusedFuture for PendingStep {
    fn is_terminated(&self) -> bool {
        self.completed
    }
}

impl Drop for PendingStep {
    fn drop(&mut self) {
        if !self.completed && !self.frame.state.get().is_terminal() {
            debug!("[FRAME] {} pending step dropped unresolved", self.frame.id);
            self.frame.outstanding.set(false);
        }
    }
}
