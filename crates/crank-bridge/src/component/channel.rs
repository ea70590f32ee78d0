//! Context iteration channel.
//!
//! A generator body receives its inputs by pulling from its [`Context`]
//! (`ctx.next().await`) and hands rendered values back with
//! `ctx.yield_(value).await`. Both are suspension points of the body's
//! future; the frame that polls the body reads the channel afterwards to learn
//! where the body stopped.
//!
//! Backpressure is exactly one snapshot: a delivery over an unconsumed one
//! replaces it. Refreshes carry no payload and coalesce into one re-entry
//! with the last-seen snapshot.
//!
//! Cleanup callbacks registered with [`Context::cleanup`] run once, in
//! registration order, when the frame reaches `Done` or `Failed`.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll, Waker};

use futures_util::Stream;
use log::{debug, trace};
use pin_project::pin_project;

use super::frame::FrameId;
use crate::error::ContractViolation;
use crate::value::{HostValue, InputSnapshot};

/// Called once per coalesced refresh request, with the frame to re-render.
pub type RefreshHook = Rc<dyn Fn(FrameId)>;

/// Where the body stopped when its future last returned `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyPhase {
    /// Not polled yet.
    Idle,
    /// Being polled, or parked on something other than the channel.
    Running,
    /// Parked in `yield_` with a value waiting to be taken.
    Yielded,
    /// Parked in a pull with no snapshot available.
    SuspendedOnInput,
}

struct ChannelState {
    frame: FrameId,
    pending: Option<InputSnapshot>,
    last_seen: InputSnapshot,
    closed: bool,
    refresh_pending: bool,
    on_refresh: Option<RefreshHook>,
    phase: BodyPhase,
    yielded: Option<HostValue>,
    pulled_since_yield: bool,
    strict: bool,
    violation: Option<ContractViolation>,
    waker: Option<Waker>,
    cleanups: Vec<Box<dyn FnOnce()>>,
    cleaned_up: bool,
}

/// Frame-side end of the channel.
#[derive(Clone)]
pub(crate) struct ContextChannel {
    state: Rc<RefCell<ChannelState>>,
}

impl ContextChannel {
    pub(crate) fn new(frame: FrameId, on_refresh: Option<RefreshHook>, strict: bool) -> Self {
        Self {
            state: Rc::new(RefCell::new(ChannelState {
                frame,
                pending: None,
                last_seen: InputSnapshot::empty(),
                closed: false,
                refresh_pending: false,
                on_refresh,
                phase: BodyPhase::Idle,
                yielded: None,
                pulled_since_yield: false,
                strict,
                violation: None,
                waker: None,
                cleanups: Vec::new(),
                cleaned_up: false,
            })),
        }
    }

    /// Body-side handle bound to this channel.
    pub(crate) fn context(&self) -> Context {
        Context {
            state: Rc::clone(&self.state),
        }
    }

    /// Make `snapshot` the next input the body will pull.
    pub(crate) fn deliver(&self, snapshot: InputSnapshot) {
        let waker = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                debug!("[CHANNEL] {} delivery after close ignored", state.frame);
                return;
            }
            if state.pending.is_some() {
                debug!("[CHANNEL] {} replaced an unconsumed snapshot", state.frame);
            }
            #[cfg(feature = "debug-frames")]
            trace!("[CHANNEL] {} deliver {} inputs", state.frame, snapshot.len());
            state.last_seen = snapshot.clone();
            state.pending = Some(snapshot);
            state.refresh_pending = false;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Record `snapshot` as current without queueing it for a pull.
    ///
    /// Used by shapes that receive their inputs as call arguments.
    pub(crate) fn install(&self, snapshot: InputSnapshot) {
        let mut state = self.state.borrow_mut();
        state.last_seen = snapshot;
        state.refresh_pending = false;
    }

    pub(crate) fn begin_poll(&self) {
        self.state.borrow_mut().phase = BodyPhase::Running;
    }

    pub(crate) fn phase(&self) -> BodyPhase {
        self.state.borrow().phase
    }

    pub(crate) fn take_yield(&self) -> Option<HostValue> {
        self.state.borrow_mut().yielded.take()
    }

    pub(crate) fn take_violation(&self) -> Option<ContractViolation> {
        self.state.borrow_mut().violation.take()
    }

    /// Consume the coalesced refresh request, if any.
    pub(crate) fn take_refresh(&self) -> bool {
        std::mem::take(&mut self.state.borrow_mut().refresh_pending)
    }

    pub(crate) fn refresh_pending(&self) -> bool {
        self.state.borrow().refresh_pending
    }

    pub(crate) fn last_seen(&self) -> InputSnapshot {
        self.state.borrow().last_seen.clone()
    }

    /// Terminate iteration: a parked or future pull resolves to `None`.
    pub(crate) fn close(&self) {
        let waker = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            debug!("[CHANNEL] {} closed", state.frame);
            state.closed = true;
            state.pending = None;
            state.refresh_pending = false;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Run the registered cleanup callbacks. Later calls do nothing.
    pub(crate) fn run_cleanups(&self) {
        let (frame, callbacks) = {
            let mut state = self.state.borrow_mut();
            if state.cleaned_up {
                return;
            }
            state.cleaned_up = true;
            (state.frame, std::mem::take(&mut state.cleanups))
        };
        if !callbacks.is_empty() {
            debug!("[CHANNEL] {} running {} cleanup callbacks", frame, callbacks.len());
        }
        for callback in callbacks {
            callback();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

/// The body's view of its frame: a stream of input snapshots plus the
/// controls a component body needs.
///
/// # Usage
/// ```ignore
/// ComponentBody::generator(|ctx: Context| async move {
///     while let Some(props) = ctx.clone().next().await {
///         let name = props.get_str("name").unwrap_or("nobody");
///         ctx.yield_(format!("Hello {name}")).await;
///     }
///     Ok(None)
/// })
/// ```
#[derive(Clone)]
pub struct Context {
    state: Rc<RefCell<ChannelState>>,
}

impl Context {
    /// The last snapshot delivered to this frame.
    pub fn props(&self) -> InputSnapshot {
        self.state.borrow().last_seen.clone()
    }

    pub fn frame_id(&self) -> FrameId {
        self.state.borrow().frame
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Ask for a re-render with the current inputs.
    ///
    /// Requests made before the frame is next resumed collapse into one; the
    /// mount's refresh hook only hears about the first of them.
    pub fn refresh(&self) {
        let notify = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                debug!("[CHANNEL] {} refresh after close ignored", state.frame);
                return;
            }
            if state.refresh_pending {
                #[cfg(feature = "debug-frames")]
                trace!("[CHANNEL] {} refresh coalesced", state.frame);
                return;
            }
            state.refresh_pending = true;
            state.on_refresh.clone().map(|hook| (hook, state.frame))
        };
        if let Some((hook, frame)) = notify {
            hook(frame);
        }
    }

    /// Register `callback` to run when the frame is unmounted or fails.
    ///
    /// Registered after that point, it runs immediately.
    pub fn cleanup(&self, callback: impl FnOnce() + 'static) {
        let frame = {
            let mut state = self.state.borrow_mut();
            if !state.cleaned_up {
                state.cleanups.push(Box::new(callback));
                return;
            }
            state.frame
        };
        debug!("[CHANNEL] {} cleanup registered after unmount, running now", frame);
        callback();
    }

    /// Hand `value` to the renderer and suspend until the next step.
    pub fn yield_(&self, value: impl Into<HostValue>) -> Yield {
        Yield {
            state: Rc::clone(&self.state),
            value: Some(value.into()),
        }
    }

    pub(crate) fn channel(&self) -> ContextChannel {
        ContextChannel {
            state: Rc::clone(&self.state),
        }
    }
}

impl Stream for Context {
    type Item = InputSnapshot;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<InputSnapshot>> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Poll::Ready(None);
        }
        if state.pulled_since_yield && state.strict {
            state.violation = Some(ContractViolation(
                "context iterated twice without a yield",
            ));
            state.phase = BodyPhase::SuspendedOnInput;
            return Poll::Pending;
        }
        match state.pending.take() {
            Some(snapshot) => {
                state.pulled_since_yield = true;
                state.phase = BodyPhase::Running;
                Poll::Ready(Some(snapshot))
            }
            None => {
                state.phase = BodyPhase::SuspendedOnInput;
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// Future returned by [`Context::yield_`].
#[must_use = "yield_ does nothing unless awaited"]
pub struct Yield {
    state: Rc<RefCell<ChannelState>>,
    value: Option<HostValue>,
}

impl Future for Yield {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.value.take() {
            Some(value) => {
                let mut state = this.state.borrow_mut();
                state.yielded = Some(value);
                state.phase = BodyPhase::Yielded;
                state.pulled_since_yield = false;
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Wraps a generator body so every poll starts in the `Running` phase.
#[pin_project]
pub(crate) struct Tracked<F> {
    channel: ContextChannel,
    #[pin]
    body: F,
}

impl<F> Tracked<F> {
    pub(crate) fn new(ctx: &Context, body: F) -> Self {
        Self {
            channel: ctx.channel(),
            body,
        }
    }
}

impl<F: Future> Future for Tracked<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<F::Output> {
        let this = self.project();
        this.channel.begin_poll();
        this.body.poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures_util::StreamExt;
    use futures_util::task::noop_waker_ref;

    use super::*;

    fn snapshot(name: &str) -> InputSnapshot {
        [("name", name)].into_iter().collect()
    }

    #[test]
    fn pull_waits_until_a_snapshot_is_delivered() {
        let channel = ContextChannel::new(FrameId::next(), None, true);
        let mut ctx = channel.context();
        let mut cx = TaskContext::from_waker(noop_waker_ref());

        assert_eq!(ctx.poll_next_unpin(&mut cx), Poll::Pending);
        assert_eq!(channel.phase(), BodyPhase::SuspendedOnInput);

        channel.deliver(snapshot("World"));
        match ctx.poll_next_unpin(&mut cx) {
            Poll::Ready(Some(props)) => assert_eq!(props.get_str("name"), Some("World")),
            other => panic!("expected a snapshot, got {:?}", other),
        }
    }

    #[test]
    fn undelivered_snapshot_is_replaced_not_queued() {
        let channel = ContextChannel::new(FrameId::next(), None, false);
        let mut ctx = channel.context();
        let mut cx = TaskContext::from_waker(noop_waker_ref());

        channel.deliver(snapshot("first"));
        channel.deliver(snapshot("second"));

        match ctx.poll_next_unpin(&mut cx) {
            Poll::Ready(Some(props)) => assert_eq!(props.get_str("name"), Some("second")),
            other => panic!("expected a snapshot, got {:?}", other),
        }
        assert_eq!(ctx.poll_next_unpin(&mut cx), Poll::Pending);
        assert!(channel.take_violation().is_none());
    }

    #[test]
    fn closing_wakes_a_suspended_pull_with_termination() {
        let channel = ContextChannel::new(FrameId::next(), None, true);
        let ctx = channel.context();
        let exited = Rc::new(Cell::new(false));

        let mut body = Box::pin({
            let exited = Rc::clone(&exited);
            let mut ctx = ctx.clone();
            async move {
                while let Some(_props) = ctx.next().await {}
                exited.set(true);
            }
        });
        let mut cx = TaskContext::from_waker(noop_waker_ref());

        assert_eq!(body.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(channel.phase(), BodyPhase::SuspendedOnInput);

        channel.close();
        assert_eq!(body.as_mut().poll(&mut cx), Poll::Ready(()));
        assert!(exited.get());
        assert!(ctx.is_closed());
        assert!(channel.is_closed());
    }

    #[test]
    fn refreshes_coalesce_until_taken() {
        let notified = Rc::new(Cell::new(0));
        let hook: RefreshHook = {
            let notified = Rc::clone(&notified);
            Rc::new(move |_frame| notified.set(notified.get() + 1))
        };
        let channel = ContextChannel::new(FrameId::next(), Some(hook), true);
        let ctx = channel.context();

        ctx.refresh();
        ctx.refresh();
        ctx.refresh();
        assert_eq!(notified.get(), 1);
        assert!(channel.refresh_pending());

        assert!(channel.take_refresh());
        assert!(!channel.take_refresh());

        ctx.refresh();
        assert_eq!(notified.get(), 2);
    }

    #[test]
    fn cleanups_run_once_in_order_and_late_ones_immediately() {
        let channel = ContextChannel::new(FrameId::next(), None, true);
        let ctx = channel.context();
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second"] {
            let log = Rc::clone(&log);
            ctx.cleanup(move || log.borrow_mut().push(name));
        }
        assert!(log.borrow().is_empty());

        channel.run_cleanups();
        channel.run_cleanups();
        assert_eq!(*log.borrow(), vec!["first", "second"]);

        let late = Rc::clone(&log);
        ctx.cleanup(move || late.borrow_mut().push("late"));
        assert_eq!(*log.borrow(), vec!["first", "second", "late"]);
    }

    #[test]
    fn second_pull_without_yield_is_a_violation_when_strict() {
        let channel = ContextChannel::new(FrameId::next(), None, true);
        let mut ctx = channel.context();
        let mut cx = TaskContext::from_waker(noop_waker_ref());

        channel.deliver(snapshot("a"));
        assert!(matches!(ctx.poll_next_unpin(&mut cx), Poll::Ready(Some(_))));
        assert_eq!(ctx.poll_next_unpin(&mut cx), Poll::Pending);
        assert!(channel.take_violation().is_some());
    }
}
