//! The reactor: the [`Loop`] contract, its backends and shared
//! bookkeeping.
//!
//! Both backends drive the same [`LoopCore`]: an insertion-ordered table
//! of notifiers, a timer queue and a child-watch list. The backends
//! differ only in how they wait: [`PollLoop`] blocks in `poll(2)`,
//! [`ExternalLoop`] hands its sources to a host main loop.

mod child;
mod external;
mod poll;
mod timer;

pub(crate) mod core;

pub use self::core::LoopCore;
pub use external::{ExternalLoop, HostLoop, Readiness};
pub use poll::PollLoop;
pub use timer::{TimerFn, TimerId};

use crate::error::LoopError;
use crate::notifier::NotifierRef;

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

/// I/O interests tracked for a registered descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

/// Child-exit callback: `(pid, raw_status, cx)`.
pub type ChildFn = Box<dyn FnMut(i32, i32, &mut LoopCx<'_>)>;

/// The reactor contract implemented by every backend.
///
/// A loop multiplexes fd readiness, timer expiry and child exits,
/// dispatching each onto the matching notifier or
/// callback. All callbacks run on the thread driving the loop; the only
/// suspension point is the wait inside [`loop_once`](Self::loop_once).
///
/// Callbacks must not block and must not re-enter `loop_once` or
/// [`loop_forever`](Self::loop_forever) on the same loop. They may
/// freely mutate loop state through their [`LoopCx`]; such mutations
/// take effect before the next wait.
pub trait Loop {
    /// The shared bookkeeping this backend drives.
    fn core(&self) -> &Rc<RefCell<LoopCore>>;

    /// Waits up to `timeout` (forever when `None`) for any source to
    /// become ready, dispatches all ready fd sources and all expired
    /// timers, and returns how many fd sources were ready (zero on a
    /// pure timeout).
    ///
    /// The blocking wait is clamped to the next timer deadline when one
    /// is sooner than `timeout`.
    fn loop_once(&mut self, timeout: Option<Duration>) -> io::Result<usize>;

    /// Registers `notifier` and, recursively, its descendants.
    ///
    /// Fails if the notifier is already in a loop, or has a parent (a
    /// tree is managed through its root).
    fn add(&mut self, notifier: &NotifierRef) -> Result<(), LoopError> {
        core::add(self.core(), notifier)
    }

    /// Deregisters `notifier` and, recursively, its descendants.
    fn remove(&mut self, notifier: &NotifierRef) -> Result<(), LoopError> {
        core::remove(self.core(), notifier)
    }

    /// Adjusts the write-interest recorded for `notifier`.
    ///
    /// Equivalent to [`Notifier::set_want_writeready`], which notifiers
    /// call on themselves; exposed here so callers holding only the
    /// loop can flip interest too.
    ///
    /// [`Notifier::set_want_writeready`]: crate::notifier::Notifier::set_want_writeready
    fn notifier_want_writeready(&mut self, notifier: &NotifierRef, want: bool) {
        notifier.borrow_mut().notifier_mut().set_want_writeready(want);
    }

    /// Runs [`loop_once`](Self::loop_once) repeatedly until a callback
    /// calls [`loop_stop`](Self::loop_stop).
    fn loop_forever(&mut self) -> io::Result<()> {
        self.core().borrow_mut().set_looping(true);
        while self.core().borrow().is_looping() {
            self.loop_once(None)?;
        }
        Ok(())
    }

    /// Clears the sentinel that keeps [`loop_forever`](Self::loop_forever)
    /// iterating.
    fn loop_stop(&mut self) {
        self.core().borrow_mut().set_looping(false);
    }

    /// Schedules `f` to run once, `delay` from now. The returned id
    /// stays valid after firing for the purpose of a safe cancel.
    fn enqueue_timer(&mut self, delay: Duration, f: TimerFn) -> TimerId {
        self.core().borrow_mut().timers.enqueue(delay, f)
    }

    /// Cancels a pending timer. Unknown and already-fired ids are
    /// no-ops.
    fn cancel_timer(&mut self, id: TimerId) {
        self.core().borrow_mut().timers.cancel(id);
    }

    /// Registers a one-shot callback for the exit of child `pid`.
    fn watch_child(&mut self, pid: i32, f: ChildFn) {
        self.core().borrow_mut().watch_child(pid, f);
    }

    /// Drops every watch registered for `pid`.
    fn unwatch_child(&mut self, pid: i32) {
        self.core().borrow_mut().unwatch_child(pid);
    }
}

/// Feedback handle passed to every callback.
///
/// A `LoopCx` reaches the loop's shared bookkeeping without borrowing
/// the backend, so callbacks can mutate loop state while the backend is
/// mid-dispatch.
///
/// One restriction: [`remove`](Self::remove) must not be called on the
/// notifier currently being dispatched; a notifier withdrawing itself
/// uses [`Notifier::handle_closed`] instead.
///
/// [`Notifier::handle_closed`]: crate::notifier::Notifier::handle_closed
pub struct LoopCx<'a> {
    core: &'a Rc<RefCell<LoopCore>>,
}

impl<'a> LoopCx<'a> {
    pub(crate) fn new(core: &'a Rc<RefCell<LoopCore>>) -> Self {
        Self { core }
    }

    /// See [`Loop::loop_stop`].
    pub fn loop_stop(&mut self) {
        self.core.borrow_mut().set_looping(false);
    }

    /// See [`Loop::enqueue_timer`]. A timer enqueued from a callback
    /// with an already-past deadline fires on a subsequent iteration,
    /// not the current one.
    pub fn enqueue_timer(&mut self, delay: Duration, f: TimerFn) -> TimerId {
        self.core.borrow_mut().timers.enqueue(delay, f)
    }

    /// See [`Loop::cancel_timer`].
    pub fn cancel_timer(&mut self, id: TimerId) {
        self.core.borrow_mut().timers.cancel(id);
    }

    /// See [`Loop::add`]. Takes effect before the next wait.
    pub fn add(&mut self, notifier: &NotifierRef) -> Result<(), LoopError> {
        core::add(self.core, notifier)
    }

    /// See [`Loop::remove`]. Takes effect before the next wait.
    pub fn remove(&mut self, notifier: &NotifierRef) -> Result<(), LoopError> {
        core::remove(self.core, notifier)
    }

    /// See [`Loop::watch_child`].
    pub fn watch_child(&mut self, pid: i32, f: ChildFn) {
        self.core.borrow_mut().watch_child(pid, f);
    }

    /// See [`Loop::unwatch_child`].
    pub fn unwatch_child(&mut self, pid: i32) {
        self.core.borrow_mut().unwatch_child(pid);
    }
}
