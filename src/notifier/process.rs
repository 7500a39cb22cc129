use super::{EventSink, Notifier};
use crate::error::ConfigError;
use crate::reactor::LoopCx;
use crate::sys::platform::sys_kill;

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};

/// Exit callback, invoked with the watcher and the raw wait status.
pub type ExitFn = Box<dyn FnMut(&mut ProcessWatcher, i32, &mut LoopCx<'_>)>;

/// A one-shot child-exit watch.
///
/// A `ProcessWatcher` owns no handles. Registering it with a loop
/// installs a child-watch for its pid; when the child is reaped the exit
/// callback fires once with the raw wait status and the watcher removes
/// itself from its parent or loop. Re-adding a fired watcher installs no
/// further watch.
pub struct ProcessWatcher {
    base: Notifier,
    pid: i32,
    fired: bool,
    on_exit: Option<ExitFn>,
}

impl ProcessWatcher {
    /// Creates a watcher for `pid`.
    ///
    /// Fails if `pid` is zero.
    pub fn new(
        pid: i32,
        on_exit: impl FnMut(&mut ProcessWatcher, i32, &mut LoopCx<'_>) + 'static,
    ) -> Result<Rc<RefCell<Self>>, ConfigError> {
        if pid == 0 {
            return Err(ConfigError::InvalidPid);
        }

        Ok(Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let weak: Weak<RefCell<dyn EventSink>> = me.clone();

            RefCell::new(Self {
                base: Notifier::bare(None, None, false, weak),
                pid,
                fired: false,
                on_exit: Some(Box::new(on_exit)),
            })
        }))
    }

    /// The watched pid.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Whether the exit callback has already fired.
    pub fn fired(&self) -> bool {
        self.fired
    }

    /// Sends `signal` to the watched process.
    pub fn kill(&self, signal: i32) -> io::Result<()> {
        sys_kill(self.pid, signal)
    }

    /// Replaces the exit callback.
    ///
    /// If the watcher is currently registered, the child-watch is
    /// re-installed (remove, then add) so the new callback is the one
    /// dispatched.
    pub fn set_on_exit(
        &mut self,
        on_exit: impl FnMut(&mut ProcessWatcher, i32, &mut LoopCx<'_>) + 'static,
    ) {
        self.on_exit = Some(Box::new(on_exit));

        if let Some(core) = self.base.member_of() {
            let mut core = core.borrow_mut();
            core.unwatch_owned_by(self.base.id());
            if let Some(pid) = self.watched_pid() {
                core.watch_child_sink(pid, self.base.id(), self.base.sink_weak());
            }
        }
    }
}

impl EventSink for ProcessWatcher {
    fn notifier(&self) -> &Notifier {
        &self.base
    }

    fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.base
    }

    fn on_read_ready(&mut self, _cx: &mut LoopCx<'_>) {}

    fn on_child_exit(&mut self, status: i32, cx: &mut LoopCx<'_>) {
        self.fired = true;
        tracing::debug!(pid = self.pid, status, "watched child exited");

        if let Some(mut f) = self.on_exit.take() {
            f(self, status, cx);
            if self.on_exit.is_none() {
                self.on_exit = Some(f);
            }
        }

        // Single-shot: withdraw from the parent or loop.
        self.base.handle_closed();
    }

    fn watched_pid(&self) -> Option<i32> {
        (!self.fired).then_some(self.pid)
    }
}
